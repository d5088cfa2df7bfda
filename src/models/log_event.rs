use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use super::visit::now;

pub const BULK_ADD: &str = "Bulk Add";
pub const GRACE_CHANGED: &str = "Grace changed";
pub const FORGOT_PASSWORD: &str = "Forgot password request";

/// Audit trail of administrative actions.
pub struct LogEvent;

impl LogEvent {
    pub async fn add_event(pool: &SqlitePool, what: &str, barcode: &str) -> Result<(), sqlx::Error> {
        Self::add_event_at(pool, what, barcode, now()).await
    }

    pub async fn add_event_at(
        pool: &SqlitePool,
        what: &str,
        barcode: &str,
        date: NaiveDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO log_events (what, date, barcode) VALUES (?, ?, ?)")
            .bind(what)
            .bind(date)
            .bind(barcode)
            .execute(pool)
            .await?;

        tracing::debug!(what = %what, barcode = %barcode, "Event logged");
        Ok(())
    }

    /// When the most recent event of this kind happened, and who did it.
    pub async fn get_last_event(
        pool: &SqlitePool,
        what: &str,
    ) -> Result<Option<(NaiveDateTime, String)>, sqlx::Error> {
        sqlx::query_as::<_, (NaiveDateTime, String)>(
            r#"
            SELECT date, barcode FROM log_events
            WHERE what = ?
            ORDER BY date DESC LIMIT 1
            "#,
        )
        .bind(what)
        .fetch_optional(pool)
        .await
    }
}
