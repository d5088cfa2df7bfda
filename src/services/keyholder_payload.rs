use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::models::Account;
use crate::models::Device;
use crate::services::encryption::{EncryptionError, KeyholderCipher};

/// What a door controller needs to know about one keyholder.
#[derive(Debug, Serialize)]
pub struct KeyholderEntry {
    pub user: String,
    pub barcode: String,
    pub password_hash: String,
    pub devices: Vec<String>,
}

pub async fn keyholder_entries(pool: &SqlitePool) -> Result<Vec<KeyholderEntry>> {
    let keyholders = Account::get_keyholders(pool).await?;
    let mut entries = Vec::with_capacity(keyholders.len());

    for keyholder in keyholders {
        let devices = Device::get_list(pool, &keyholder.barcode)
            .await?
            .into_iter()
            .map(|device| device.mac)
            .collect();

        entries.push(KeyholderEntry {
            user: keyholder.username,
            barcode: keyholder.barcode,
            password_hash: keyholder.password,
            devices,
        });
    }

    Ok(entries)
}

/// The keyholder list as JSON, sealed with the configured key.
pub async fn sealed_payload(pool: &SqlitePool, key: Option<&Secret<String>>) -> Result<String> {
    let key = key.ok_or(EncryptionError::MissingKey)?;
    let entries = keyholder_entries(pool).await?;
    let json = serde_json::to_string(&entries).map_err(anyhow::Error::from)?;

    tracing::info!(keyholders = entries.len(), "Keyholder payload built");
    Ok(KeyholderCipher::from_passphrase(key.expose_secret()).seal(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::account::tests::pool_with_keyholders;

    #[tokio::test]
    async fn test_entries_list_keyholders_with_devices() {
        let pool = pool_with_keyholders().await;
        Device::add(&pool, "aa:bb:cc:dd:ee:ff", "phone", "100015").await.unwrap();

        let entries = keyholder_entries(&pool).await.unwrap();

        assert_eq!(entries.len(), 2);
        let fran = entries.iter().find(|e| e.user == "fran").unwrap();
        assert_eq!(fran.devices, vec!["aa:bb:cc:dd:ee:ff"]);
        assert!(entries.iter().all(|e| e.barcode != "100032"));
    }

    #[tokio::test]
    async fn test_sealed_payload_opens_with_key() {
        let pool = pool_with_keyholders().await;
        let key = Secret::new("door-key".to_string());

        let token = sealed_payload(&pool, Some(&key)).await.unwrap();
        let json = KeyholderCipher::from_passphrase("door-key").open(&token).unwrap();

        assert!(json.contains("\"barcode\":\"100091\""));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let pool = pool_with_keyholders().await;

        let result = sealed_payload(&pool, None).await;

        assert!(matches!(result, Err(AppError::Encryption(EncryptionError::MissingKey))));
    }
}
