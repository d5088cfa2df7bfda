use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use super::visit::now;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Unlock {
    pub time: NaiveDateTime,
    pub location: String,
    pub barcode: String,
}

impl Unlock {
    pub async fn add_entry(pool: &SqlitePool, location: &str, barcode: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO unlocks (time, location, barcode) VALUES (?, ?, ?)")
            .bind(now())
            .bind(location)
            .bind(barcode)
            .execute(pool)
            .await?;

        tracing::info!(location = %location, barcode = %barcode, "Door unlocked");
        Ok(())
    }

    pub async fn recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT time, location, barcode FROM unlocks ORDER BY time DESC LIMIT ?")
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
