use secrecy::Secret;
use serde::Deserialize;
use std::path::Path;

/// Barcode printed on the master key card. Scanning it at the station always
/// starts the closing flow.
pub const DEFAULT_MASTER_KEYHOLDER_BARCODE: &str = "999901";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_path: String,
    pub base_url: String,
    pub host: String,
    pub port: u16,
    pub static_dir: String,

    // Sessions
    pub session_secret: Secret<String>,
    pub secure_cookies: bool,

    // Outbound mail; unset means messages are only logged
    pub smtp_host: Option<String>,
    pub ops_email: String,
    pub certifiers_email: String,

    // Encrypts the keyholder device payload
    pub keyholder_key: Option<Secret<String>>,

    pub master_keyholder_barcode: String,
}

impl Config {
    /// Loads configuration from the given file, overlaid with `CHECKMEIN__*`
    /// environment variables.
    pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("database_path", "data/checkmein.db")?
            .set_default("base_url", "http://localhost:8089")?
            .set_default("host", "127.0.0.1")?
            .set_default("port", 8089)?
            .set_default("static_dir", "static")?
            .set_default("secure_cookies", false)?
            .set_default("ops_email", "tfi-ops@googlegroups.com")?
            .set_default("certifiers_email", "shopcertifiers@theforgeinitiative.org")?
            .set_default("master_keyholder_barcode", DEFAULT_MASTER_KEYHOLDER_BARCODE)?
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("CHECKMEIN").separator("__"))
            .build()?;

        Self::from_source(&config)
    }

    fn from_source(config: &config::Config) -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_path: config.get("database_path")?,
            base_url: config.get("base_url")?,
            host: config.get("host")?,
            port: config.get("port")?,
            static_dir: config.get("static_dir")?,

            session_secret: Secret::new(config.get("session_secret")?),
            secure_cookies: config.get("secure_cookies")?,

            smtp_host: config.get("smtp_host").ok(),
            ops_email: config.get("ops_email")?,
            certifiers_email: config.get("certifiers_email")?,

            keyholder_key: config
                .get::<String>("keyholder_key")
                .ok()
                .map(Secret::new),

            master_keyholder_barcode: config.get("master_keyholder_barcode")?,
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_path: ":memory:".to_string(),
            base_url: "http://localhost:8089".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8089,
            static_dir: "static".to_string(),
            session_secret: Secret::new("test-session-secret".to_string()),
            secure_cookies: false,
            smtp_host: None,
            ops_email: "ops@example.org".to_string(),
            certifiers_email: "certifiers@example.org".to_string(),
            keyholder_key: Some(Secret::new("test-keyholder-key".to_string())),
            master_keyholder_barcode: DEFAULT_MASTER_KEYHOLDER_BARCODE.to_string(),
        }
    }
}
