use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use super::member::MemberName;

bitflags::bitflags! {
    /// Permissions granted to an account. Stored as an integer bit set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Role: i64 {
        const COACH = 0x04;
        const CERTIFIER = 0x08;
        const KEYHOLDER = 0x10;
        const ADMIN = 0x20;
        const STEWARD = 0x40;
    }
}

impl Role {
    pub fn from_value(value: i64) -> Self {
        Self::from_bits_truncate(value)
    }

    pub fn is_admin(&self) -> bool {
        self.contains(Role::ADMIN)
    }

    pub fn is_keyholder(&self) -> bool {
        self.contains(Role::KEYHOLDER)
    }

    pub fn is_certifier(&self) -> bool {
        self.contains(Role::CERTIFIER)
    }

    pub fn is_coach(&self) -> bool {
        self.contains(Role::COACH)
    }

    pub fn is_steward(&self) -> bool {
        self.contains(Role::STEWARD)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = [
            (Role::ADMIN, "Admin"),
            (Role::KEYHOLDER, "Keyholder"),
            (Role::CERTIFIER, "Certifier"),
            (Role::STEWARD, "Steward"),
            (Role::COACH, "Coach"),
        ]
        .into_iter()
        .filter(|(role, _)| self.contains(*role))
        .map(|(_, name)| name)
        .collect();

        f.write_str(&names.join(" "))
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Account {
    pub username: String,
    pub barcode: Option<String>,
    pub active_keyholder: bool,
    pub role: i64,
}

impl Account {
    pub fn role(&self) -> Role {
        Role::from_value(self.role)
    }
}

/// Row of the admin users table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserSummary {
    pub username: String,
    pub barcode: String,
    pub role: i64,
    pub display_name: String,
}

impl UserSummary {
    pub fn role(&self) -> Role {
        Role::from_value(self.role)
    }
}

/// Credentials pushed to keyholder door devices.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct KeyholderCredential {
    pub username: String,
    pub barcode: String,
    pub password: String,
}

/// Stored reset token hash and when it was issued.
#[derive(Debug, Clone, FromRow)]
pub struct ResetToken {
    pub username: String,
    pub forgot: Option<String>,
    pub forgot_time: Option<NaiveDateTime>,
}

impl Account {
    /// Creates an account. The inner error is the user-facing message for a
    /// username that is already taken.
    pub async fn create(
        pool: &SqlitePool,
        username: &str,
        password_hash: &str,
        barcode: &str,
        role: Role,
    ) -> Result<std::result::Result<(), String>, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (username, password, barcode, role)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(barcode)
        .bind(role.bits())
        .execute(pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(username = %username, barcode = %barcode, role = %role, "Account created");
                Ok(Ok(()))
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Ok(Err(format!("Username {} already in use.", username)))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn find_by_username(pool: &SqlitePool, username: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT username, barcode, active_keyholder, role FROM accounts WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_barcode(pool: &SqlitePool, barcode: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT username, barcode, active_keyholder, role FROM accounts WHERE barcode = ?
            "#,
        )
        .bind(barcode)
        .fetch_optional(pool)
        .await
    }

    /// Checks a login. Returns the account's barcode and role when the
    /// password matches.
    pub async fn get_barcode_and_role(
        pool: &SqlitePool,
        username: &str,
        password: &str,
    ) -> Result<Option<(String, Role)>, sqlx::Error> {
        let row = sqlx::query_as::<_, (String, Option<String>, i64)>(
            r#"
            SELECT password, barcode, role FROM accounts WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(pool)
        .await?;

        let Some((hash, barcode, role)) = row else {
            return Ok(None);
        };

        if !crate::services::password_reset::verify_password(password, &hash).await {
            tracing::info!(username = %username, "Failed login");
            return Ok(None);
        }

        Ok(Some((barcode.unwrap_or_default(), Role::from_value(role))))
    }

    pub async fn get_email(pool: &SqlitePool, username: &str) -> Result<Option<String>, sqlx::Error> {
        let email = sqlx::query_scalar::<_, Option<String>>(
            r#"
            SELECT m.email FROM accounts a
            INNER JOIN members m ON a.barcode = m.barcode
            WHERE a.username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(pool)
        .await?;

        Ok(email.flatten())
    }

    pub async fn find_username_by_email(pool: &SqlitePool, email: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT a.username FROM accounts a
            INNER JOIN members m ON a.barcode = m.barcode
            WHERE m.email = ? COLLATE NOCASE
            "#,
        )
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    pub async fn get_members_with_role(pool: &SqlitePool, role: Role) -> Result<Vec<MemberName>, sqlx::Error> {
        sqlx::query_as::<_, MemberName>(
            r#"
            SELECT cm.display_name, a.barcode FROM accounts a
            INNER JOIN current_members cm ON cm.barcode = a.barcode
            WHERE a.role & ? != 0
            ORDER BY cm.display_name
            "#,
        )
        .bind(role.bits())
        .fetch_all(pool)
        .await
    }

    pub async fn get_present_with_role(pool: &SqlitePool, role: Role) -> Result<Vec<MemberName>, sqlx::Error> {
        sqlx::query_as::<_, MemberName>(
            r#"
            SELECT cm.display_name, a.barcode FROM accounts a
            INNER JOIN current_members cm ON cm.barcode = a.barcode
            INNER JOIN visits v ON v.barcode = a.barcode
            WHERE v.status = 'In' AND a.role & ? != 0
            ORDER BY cm.display_name
            "#,
        )
        .bind(role.bits())
        .fetch_all(pool)
        .await
    }

    pub async fn change_password(pool: &SqlitePool, username: &str, password_hash: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET password = ? WHERE username = ?
            "#,
        )
        .bind(password_hash)
        .bind(username)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn get_reset_token(pool: &SqlitePool, username: &str) -> Result<Option<ResetToken>, sqlx::Error> {
        sqlx::query_as::<_, ResetToken>(
            r#"
            SELECT username, forgot, forgot_time FROM accounts WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_reset_token(
        pool: &SqlitePool,
        username: &str,
        token_hash: &str,
        issued: NaiveDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts SET forgot = ?, forgot_time = ? WHERE username = ?
            "#,
        )
        .bind(token_hash)
        .bind(issued)
        .bind(username)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Sets the new password and burns the reset token.
    pub async fn reset_password(pool: &SqlitePool, username: &str, password_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE accounts SET forgot = '', password = ? WHERE username = ?
            "#,
        )
        .bind(password_hash)
        .bind(username)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Replaces the role of the account with this barcode. Returns the
    /// username when an account was changed.
    pub async fn change_role(pool: &SqlitePool, barcode: &str, role: Role) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            UPDATE accounts SET role = ? WHERE barcode = ?
            RETURNING username
            "#,
        )
        .bind(role.bits())
        .bind(barcode)
        .fetch_optional(pool)
        .await
    }

    pub async fn remove_user(pool: &SqlitePool, barcode: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM accounts WHERE barcode = ?
            "#,
        )
        .bind(barcode)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn get_users(pool: &SqlitePool) -> Result<Vec<UserSummary>, sqlx::Error> {
        sqlx::query_as::<_, UserSummary>(
            r#"
            SELECT a.username, a.barcode, a.role, m.display_name
            FROM accounts a
            INNER JOIN members m ON m.barcode = a.barcode
            ORDER BY a.username
            "#,
        )
        .fetch_all(pool)
        .await
    }

    /// Current members who do not have an account yet.
    pub async fn get_non_accounts(pool: &SqlitePool) -> Result<Vec<MemberName>, sqlx::Error> {
        sqlx::query_as::<_, MemberName>(
            r#"
            SELECT cm.display_name, cm.barcode
            FROM current_members cm
            LEFT JOIN accounts a ON a.barcode = cm.barcode
            WHERE a.username IS NULL
            ORDER BY cm.display_name
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn inactivate_all_key_holders(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET active_keyholder = 0 WHERE active_keyholder = 1
            "#,
        )
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Makes `barcode` the single active keyholder. Fails when the barcode is
    /// empty, lacks the keyholder role or already holds the key.
    pub async fn set_key_holder_active(pool: &SqlitePool, barcode: &str) -> Result<bool, sqlx::Error> {
        if barcode.is_empty() {
            return Ok(false);
        }

        let mut tx = pool.begin().await?;

        let already_active = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT 1 FROM accounts WHERE barcode = ? AND active_keyholder = 1
            "#,
        )
        .bind(barcode)
        .fetch_optional(&mut *tx)
        .await?;

        if already_active.is_some() {
            return Ok(false);
        }

        let activated = sqlx::query(
            r#"
            UPDATE accounts SET active_keyholder = 1
            WHERE barcode = ? AND role & ? != 0
            "#,
        )
        .bind(barcode)
        .bind(Role::KEYHOLDER.bits())
        .execute(&mut *tx)
        .await?;

        if activated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE accounts SET active_keyholder = 0
            WHERE barcode != ? AND active_keyholder = 1
            "#,
        )
        .bind(barcode)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(barcode = %barcode, "Keyholder activated");
        Ok(true)
    }

    pub async fn get_active_key_holder(pool: &SqlitePool) -> Result<Option<MemberName>, sqlx::Error> {
        let active = sqlx::query_as::<_, MemberName>(
            r#"
            SELECT COALESCE(m.display_name, a.barcode) AS display_name, a.barcode
            FROM accounts a
            LEFT JOIN members m ON a.barcode = m.barcode
            WHERE a.active_keyholder = 1
            "#,
        )
        .fetch_all(pool)
        .await?;

        if active.len() > 1 {
            tracing::warn!(count = active.len(), "More than one active keyholder");
        }

        Ok(active.into_iter().next())
    }

    pub async fn get_keyholders(pool: &SqlitePool) -> Result<Vec<KeyholderCredential>, sqlx::Error> {
        sqlx::query_as::<_, KeyholderCredential>(
            r#"
            SELECT username, barcode, password FROM accounts
            WHERE role & ? != 0 AND barcode IS NOT NULL
            ORDER BY username
            "#,
        )
        .bind(Role::KEYHOLDER.bits())
        .fetch_all(pool)
        .await
    }

    pub async fn get_keyholder_barcodes(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT barcode FROM accounts WHERE role & ? != 0 AND barcode IS NOT NULL
            "#,
        )
        .bind(Role::KEYHOLDER.bits())
        .fetch_all(pool)
        .await
    }
}
