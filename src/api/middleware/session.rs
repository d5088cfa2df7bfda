use axum::extract::FromRef;
use sqlx::SqlitePool;
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::SqliteStore;

use crate::config::Config;
use crate::services::mailer::Mailer;
use crate::services::password_reset::AccountService;
use crate::services::updates::UpdateBroadcaster;

/// Session keys used in the application
pub const SESSION_KEY_BARCODE: &str = "barcode";
pub const SESSION_KEY_USERNAME: &str = "username";
pub const SESSION_KEY_ROLE: &str = "role";
/// Page to go back to after logging in
pub const SESSION_KEY_SOURCE: &str = "source";

/// Creates a session layer for Axum
pub async fn create_session_layer(
    pool: SqlitePool,
    secure_cookies: bool,
) -> Result<SessionManagerLayer<SqliteStore>, sqlx::Error> {
    let session_store = SqliteStore::new(pool);
    session_store.migrate().await?;

    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(secure_cookies)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(24)));

    Ok(session_layer)
}

/// Everything the handlers share
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    /// Serves typed-in report SQL
    pub read_only_pool: SqlitePool,
    pub config: Config,
    pub updates: UpdateBroadcaster,
    pub mailer: Mailer,
}

impl AppState {
    pub fn accounts(&self) -> AccountService {
        AccountService::new(
            self.pool.clone(),
            self.mailer.clone(),
            &self.config.base_url,
            &self.config.ops_email,
        )
    }
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> SqlitePool {
        state.pool.clone()
    }
}
