use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

/// A member's network device, used by the door controllers to recognise
/// keyholders.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Device {
    pub name: String,
    pub mac: String,
    pub barcode: String,
}

impl Device {
    pub async fn add(pool: &SqlitePool, mac: &str, name: &str, barcode: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO devices (barcode, mac, name) VALUES (?, ?, ?)
            ON CONFLICT (mac) DO UPDATE SET barcode = excluded.barcode, name = excluded.name
            "#,
        )
        .bind(barcode)
        .bind(mac.trim())
        .bind(name.trim())
        .execute(pool)
        .await?;

        tracing::info!(barcode = %barcode, mac = %mac, "Device added");
        Ok(())
    }

    /// Only the owner can remove a device.
    pub async fn delete(pool: &SqlitePool, mac: &str, barcode: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM devices WHERE mac = ? AND barcode = ?")
            .bind(mac)
            .bind(barcode)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn get_list(pool: &SqlitePool, barcode: &str) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT name, mac, barcode FROM devices WHERE barcode = ? ORDER BY name
            "#,
        )
        .bind(barcode)
        .fetch_all(pool)
        .await
    }
}
