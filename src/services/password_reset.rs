use chrono::Duration;
use ring::rand::{SecureRandom, SystemRandom};
use sqlx::SqlitePool;
use url::form_urlencoded;

use crate::error::{AppError, Result};
use crate::models::visit::now;
use crate::models::{Account, Role};
use crate::services::mailer::Mailer;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const TEMP_PASSWORD_LEN: usize = 12;
const RESET_TOKEN_LEN: usize = 8;

/// Random string over an alphabet without look-alike characters. Bytes past
/// the last whole multiple of the alphabet are redrawn so every character is
/// equally likely.
pub fn random_token(len: usize) -> Result<String> {
    let rng = SystemRandom::new();
    let limit = (256 / TOKEN_ALPHABET.len() * TOKEN_ALPHABET.len()) as u8;
    let mut token = String::with_capacity(len);
    let mut bytes = [0u8; 32];

    while token.len() < len {
        rng.fill(&mut bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Random source unavailable")))?;
        token.extend(
            bytes
                .iter()
                .filter(|b| **b < limit)
                .map(|b| TOKEN_ALPHABET[*b as usize % TOKEN_ALPHABET.len()] as char)
                .take(len - token.len()),
        );
    }

    Ok(token)
}

/// Hashes on the blocking pool so a login burst does not stall the runtime.
pub async fn hash_password(password: &str) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(|e| AppError::Internal(e.into()))
}

/// False for a wrong password, a malformed hash or a failed worker.
pub async fn verify_password(password: &str, hash: &str) -> bool {
    let (password, hash) = (password.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForgotOutcome {
    /// The reset mail went to this address.
    Sent(String),
    UnknownUser(String),
    RateLimited,
}

impl ForgotOutcome {
    pub fn message(&self) -> String {
        match self {
            ForgotOutcome::Sent(_) => "You have been e-mailed instructions on how to reset your password. \
                 The link will expire in 24 hours."
                .to_string(),
            ForgotOutcome::UnknownUser(user) => format!("No email sent due to not finding user: {}.", user),
            ForgotOutcome::RateLimited => "No email sent due to one sent in last minute".to_string(),
        }
    }
}

/// Account workflows that need hashing, tokens or mail on top of the
/// account table.
#[derive(Clone)]
pub struct AccountService {
    pool: SqlitePool,
    mailer: Mailer,
    base_url: String,
    ops_email: String,
}

impl AccountService {
    pub fn new(pool: SqlitePool, mailer: Mailer, base_url: &str, ops_email: &str) -> Self {
        Self {
            pool,
            mailer,
            base_url: base_url.trim_end_matches('/').to_string(),
            ops_email: ops_email.to_string(),
        }
    }

    /// Creates an account with a random password and mails the new user a
    /// reset link. The inner error is the message for a taken username.
    pub async fn add_user(&self, username: &str, barcode: &str, role: Role) -> Result<std::result::Result<(), String>> {
        if username.trim().is_empty() {
            return Ok(Err("Username must not be blank".to_string()));
        }

        let temp_password = random_token(TEMP_PASSWORD_LEN)?;
        let hash = hash_password(&temp_password).await?;

        if let Err(message) = Account::create(&self.pool, username, &hash, barcode, role).await? {
            return Ok(Err(message));
        }

        let email = Account::get_email(&self.pool, username).await?.unwrap_or_default();
        self.mailer
            .send(
                "TFI Ops",
                &self.ops_email,
                "New User",
                &format!("User {} <{}> added with roles : {}", username, email, role),
            )
            .await;

        self.forgot_password(username).await?;
        Ok(Ok(()))
    }

    pub async fn change_role(&self, barcode: &str, role: Role) -> Result<()> {
        if let Some(username) = Account::change_role(&self.pool, barcode, role).await? {
            let email = Account::get_email(&self.pool, &username).await?.unwrap_or_default();
            self.mailer
                .send(
                    "TFI Ops",
                    &self.ops_email,
                    "Role change for user",
                    &format!("User {} <{}> roles changed to : {}", username, email, role),
                )
                .await;
        }

        Ok(())
    }

    /// Changes the password after checking the old one. Returns false when
    /// the old password is wrong.
    pub async fn change_password(&self, username: &str, old_password: &str, new_password: &str) -> Result<bool> {
        if Account::get_barcode_and_role(&self.pool, username, old_password)
            .await?
            .is_none()
        {
            return Ok(false);
        }

        Account::change_password(&self.pool, username, &hash_password(new_password).await?).await?;
        tracing::info!(username = %username, "Password changed");
        Ok(true)
    }

    /// Mails a reset link to the account named by username or by email.
    /// At most one mail per minute per account.
    pub async fn forgot_password(&self, user: &str) -> Result<ForgotOutcome> {
        let mut token = Account::get_reset_token(&self.pool, user).await?;

        if token.is_none() {
            if let Some(username) = Account::find_username_by_email(&self.pool, user).await? {
                token = Account::get_reset_token(&self.pool, &username).await?;
            }
        }

        let Some(token) = token else {
            return Ok(ForgotOutcome::UnknownUser(user.to_string()));
        };

        if let Some(sent) = token.forgot_time {
            if now() - sent < Duration::seconds(60) {
                return Ok(ForgotOutcome::RateLimited);
            }
        }

        let reset = random_token(RESET_TOKEN_LEN)?;
        Account::set_reset_token(&self.pool, &token.username, &hash_password(&reset).await?, now()).await?;

        let email = Account::get_email(&self.pool, &token.username).await?.unwrap_or_default();
        self.mailer
            .send(
                &token.username,
                &email,
                "Forgotten Password",
                &self.reset_message(&token.username, &reset),
            )
            .await;

        tracing::info!(username = %token.username, "Password reset requested");
        Ok(ForgotOutcome::Sent(email))
    }

    fn reset_message(&self, username: &str, token: &str) -> String {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("user", username)
            .append_pair("token", token)
            .finish();
        let safe_username: String = form_urlencoded::byte_serialize(username.as_bytes()).collect();

        format!(
            "Please go to {}/profile/reset_password_token?{} to reset your password. \
             If you did not request that you want to reset your password, then you can \
             safely ignore this e-mail. Your username is {}. This expires in 24 hours.\n\n\
             Thank you,\nTFI",
            self.base_url, query, safe_username
        )
    }

    /// Sets a new password if the reset token matches and is under a day old.
    pub async fn verify_forgot(&self, username: &str, token: &str, new_password: &str) -> Result<bool> {
        let Some(stored) = Account::get_reset_token(&self.pool, username).await? else {
            return Ok(false);
        };

        let (Some(hash), Some(issued)) = (stored.forgot, stored.forgot_time) else {
            return Ok(false);
        };

        if hash.is_empty() || now() - issued > Duration::hours(24) {
            return Ok(false);
        }

        if !verify_password(token, &hash).await {
            return Ok(false);
        }

        Account::reset_password(&self.pool, &stored.username, &hash_password(new_password).await?).await?;
        tracing::info!(username = %stored.username, "Password reset");
        Ok(true)
    }
}
