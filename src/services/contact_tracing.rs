use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::models::visit::now;

/// Someone who shared the building with the traced person.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Contact {
    pub barcode: String,
    pub display_name: String,
    pub email: Option<String>,
}

/// One of the traced person's visits and everyone present during it.
#[derive(Debug, Clone, Serialize)]
pub struct TracedVisit {
    pub enter_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub contacts: Vec<Contact>,
}

/// Members and guests, other than `barcode`, whose visits overlapped the
/// window.
pub async fn who_else_was_here(
    pool: &SqlitePool,
    barcode: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<Contact>, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        r#"
        SELECT v0.barcode, m.display_name, m.email
        FROM visits v0
        INNER JOIN members m ON m.barcode = v0.barcode
        WHERE v0.enter_time <= ? AND v0.exit_time >= ? AND v0.barcode != ?
        UNION
        SELECT v1.barcode, g.display_name, g.email
        FROM visits v1
        INNER JOIN guests g ON g.guest_id = v1.barcode
        WHERE v1.enter_time <= ? AND v1.exit_time >= ? AND v1.barcode != ?
        ORDER BY display_name ASC
        "#,
    )
    .bind(end)
    .bind(start)
    .bind(barcode)
    .bind(end)
    .bind(start)
    .bind(barcode)
    .fetch_all(pool)
    .await
}

/// The person's visits over the last `num_days` days, oldest first, each
/// with the people they overlapped.
pub async fn get_dict_visits(pool: &SqlitePool, barcode: &str, num_days: i64) -> Result<Vec<TracedVisit>, sqlx::Error> {
    let end = now();
    let start = end - Duration::days(num_days);

    let visits = sqlx::query_as::<_, (NaiveDateTime, Option<NaiveDateTime>)>(
        r#"
        SELECT enter_time, exit_time FROM visits
        WHERE enter_time <= ? AND exit_time >= ? AND barcode = ?
        ORDER BY enter_time
        "#,
    )
    .bind(end)
    .bind(start)
    .bind(barcode)
    .fetch_all(pool)
    .await?;

    let mut traced = Vec::with_capacity(visits.len());
    for (enter_time, exit_time) in visits {
        let exit_time = exit_time.unwrap_or(enter_time);
        let contacts = who_else_was_here(pool, barcode, enter_time, exit_time).await?;
        traced.push(TracedVisit {
            enter_time,
            exit_time,
            contacts,
        });
    }

    tracing::info!(barcode = %barcode, num_days, visits = traced.len(), "Contact trace run");
    Ok(traced)
}
