use sqlx::SqlitePool;

pub const GRACE_PERIOD: &str = "grace_period";

/// Runtime settings stored in the database `config` table.
pub struct Setting;

impl Setting {
    pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>, sqlx::Error> {
        let value = sqlx::query_scalar::<_, Option<String>>("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

        Ok(value.flatten())
    }

    pub async fn update(pool: &SqlitePool, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;

        tracing::info!(key = %key, value = %value, "Setting changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_update_grace_period() {
        let pool = test_pool().await;

        Setting::update(&pool, GRACE_PERIOD, "30").await.unwrap();

        assert_eq!(Setting::get(&pool, GRACE_PERIOD).await.unwrap().as_deref(), Some("30"));
        assert!(Setting::get(&pool, "missing").await.unwrap().is_none());
    }
}
