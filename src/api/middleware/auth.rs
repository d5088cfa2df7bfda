use tower_sessions::Session;

use super::session::{SESSION_KEY_BARCODE, SESSION_KEY_ROLE, SESSION_KEY_SOURCE, SESSION_KEY_USERNAME};
use crate::error::{AppError, Result};
use crate::models::Role;

/// The logged-in account, as remembered by the session.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub username: String,
    pub barcode: String,
    pub role: Role,
}

pub async fn current_user(session: &Session) -> Result<Option<CurrentUser>> {
    let username: Option<String> = session.get(SESSION_KEY_USERNAME).await?;
    let Some(username) = username else {
        return Ok(None);
    };

    let barcode: Option<String> = session.get(SESSION_KEY_BARCODE).await?;
    let role: Option<i64> = session.get(SESSION_KEY_ROLE).await?;

    Ok(Some(CurrentUser {
        username,
        barcode: barcode.unwrap_or_default(),
        role: Role::from_value(role.unwrap_or_default()),
    }))
}

pub async fn log_in(session: &Session, username: &str, barcode: &str, role: Role) -> Result<()> {
    session.cycle_id().await?;
    session.insert(SESSION_KEY_USERNAME, username).await?;
    session.insert(SESSION_KEY_BARCODE, barcode).await?;
    session.insert(SESSION_KEY_ROLE, role.bits()).await?;
    Ok(())
}

/// Where to send the user after logging in; cleared once read.
pub async fn take_source(session: &Session) -> Result<Option<String>> {
    Ok(session.remove::<String>(SESSION_KEY_SOURCE).await?)
}

/// Requires a logged-in user holding any of `roles`. An empty set accepts
/// anyone logged in. Otherwise remembers `source` and sends them to log in.
pub async fn require_role(session: &Session, source: &str, roles: Role) -> Result<CurrentUser> {
    if let Some(user) = current_user(session).await? {
        if roles.is_empty() || user.role.intersects(roles) {
            return Ok(user);
        }
        tracing::info!(username = %user.username, source = %source, "Missing role for page");
    }

    session.insert(SESSION_KEY_SOURCE, source).await?;
    Err(AppError::LoginRequired)
}
