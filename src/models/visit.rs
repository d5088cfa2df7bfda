use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum VisitStatus {
    In,
    Out,
    Forgot,
}

impl std::fmt::Display for VisitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            VisitStatus::In => "In",
            VisitStatus::Out => "Out",
            VisitStatus::Forgot => "Forgot",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Visit {
    pub id: i64,
    pub enter_time: NaiveDateTime,
    pub exit_time: Option<NaiveDateTime>,
    pub barcode: String,
    pub status: VisitStatus,
}

/// Someone currently in the building, as listed on the certification page.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PresentMember {
    pub display_name: String,
    pub barcode: String,
}

/// One corrected visit from the admin fix-data form.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitFix {
    pub id: i64,
    pub enter_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
}

pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn start_of_today() -> NaiveDateTime {
    now().date().and_hms_opt(0, 0, 0).unwrap_or_default()
}

impl Visit {
    pub async fn in_building(pool: &SqlitePool, barcode: &str) -> Result<bool, sqlx::Error> {
        let found = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT 1 FROM visits WHERE barcode = ? AND status = 'In' LIMIT 1
            "#,
        )
        .bind(barcode)
        .fetch_optional(pool)
        .await?;

        Ok(found.is_some())
    }

    /// Opens a visit unless one is already open. Returns the inserted row count.
    pub async fn enter_guest(pool: &SqlitePool, barcode: &str) -> Result<u64, sqlx::Error> {
        let now = now();
        let result = sqlx::query(
            r#"
            INSERT INTO visits (enter_time, exit_time, barcode, status)
            SELECT ?, ?, ?, 'In'
            WHERE NOT EXISTS (SELECT 1 FROM visits WHERE barcode = ? AND status = 'In')
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(barcode)
        .bind(barcode)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Closes the open visit, if any. Returns the updated row count.
    pub async fn leave_guest(pool: &SqlitePool, barcode: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE visits SET exit_time = ?, status = 'Out'
            WHERE barcode = ? AND status = 'In'
            "#,
        )
        .bind(now())
        .bind(barcode)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn check_in_member(pool: &SqlitePool, barcode: &str) -> Result<u64, sqlx::Error> {
        Self::enter_guest(pool, barcode).await
    }

    pub async fn check_out_member(pool: &SqlitePool, barcode: &str) -> Result<u64, sqlx::Error> {
        Self::leave_guest(pool, barcode).await
    }

    /// Toggles a member between in and out. Returns an error message for the
    /// page when the barcode belongs to nobody, an empty string otherwise.
    pub async fn scanned_member(pool: &SqlitePool, barcode: &str) -> Result<String, sqlx::Error> {
        let known = sqlx::query_scalar::<_, String>(
            r#"
            SELECT display_name FROM members WHERE barcode = ?
            "#,
        )
        .bind(barcode)
        .fetch_optional(pool)
        .await?;

        if known.is_none() {
            return Ok(format!("Invalid barcode: {}", barcode));
        }

        if Self::in_building(pool, barcode).await? {
            Self::check_out_member(pool, barcode).await?;
        } else {
            Self::check_in_member(pool, barcode).await?;
        }

        Ok(String::new())
    }

    /// Closes the building: everyone still in is marked Forgot, except the
    /// departing keyholder who is checked out normally.
    pub async fn empty_building(pool: &SqlitePool, keyholder_barcode: &str) -> Result<u64, sqlx::Error> {
        let now = now();
        let mut tx = pool.begin().await?;

        if !keyholder_barcode.is_empty() {
            sqlx::query(
                r#"
                UPDATE visits SET exit_time = ?, status = 'Out'
                WHERE barcode = ? AND status = 'In'
                "#,
            )
            .bind(now)
            .bind(keyholder_barcode)
            .execute(&mut *tx)
            .await?;
        }

        let forgot = sqlx::query(
            r#"
            UPDATE visits SET exit_time = ?, status = 'Forgot'
            WHERE status = 'In'
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            keyholder = %keyholder_barcode,
            forgot = forgot.rows_affected(),
            "Building emptied"
        );

        Ok(forgot.rows_affected())
    }

    /// Undoes today's accidental empty-building: visits marked Forgot today
    /// are reopened. A person who has re-entered since keeps the newer visit.
    pub async fn oops_forgot(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE OR IGNORE visits SET status = 'In'
            WHERE status = 'Forgot' AND exit_time > ?
            "#,
        )
        .bind(start_of_today())
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn get_members_in_building(pool: &SqlitePool) -> Result<Vec<PresentMember>, sqlx::Error> {
        sqlx::query_as::<_, PresentMember>(
            r#"
            SELECT m.display_name, v.barcode
            FROM visits v
            INNER JOIN members m ON m.barcode = v.barcode
            WHERE v.status = 'In'
            ORDER BY m.display_name
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_barcode(pool: &SqlitePool, barcode: &str) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT rowid AS id, enter_time, exit_time, barcode, status
            FROM visits WHERE barcode = ?
            ORDER BY enter_time
            "#,
        )
        .bind(barcode)
        .fetch_all(pool)
        .await
    }

    /// Applies the admin's corrections. Every corrected visit is closed.
    pub async fn fix(pool: &SqlitePool, fix_data: &str) -> Result<u64, sqlx::Error> {
        let mut updated = 0;

        for fix in parse_fixes(fix_data) {
            let result = sqlx::query(
                r#"
                UPDATE visits SET enter_time = ?, exit_time = ?, status = 'Out'
                WHERE rowid = ?
                "#,
            )
            .bind(fix.enter_time)
            .bind(fix.exit_time)
            .bind(fix.id)
            .execute(pool)
            .await?;

            updated += result.rows_affected();
        }

        Ok(updated)
    }

    #[cfg(test)]
    pub async fn insert_raw(
        pool: &SqlitePool,
        barcode: &str,
        enter_time: NaiveDateTime,
        exit_time: NaiveDateTime,
        status: VisitStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO visits (enter_time, exit_time, barcode, status) VALUES (?, ?, ?, ?)")
            .bind(enter_time)
            .bind(exit_time)
            .bind(barcode)
            .bind(status)
            .execute(pool)
            .await?;
        Ok(())
    }
}

/// Parses `rowid!start!end` entries separated by commas. Malformed entries are
/// skipped. An end earlier than the start means the visit crossed midnight.
pub fn parse_fixes(fix_data: &str) -> Vec<VisitFix> {
    fix_data
        .split(',')
        .filter_map(|entry| {
            let tokens: Vec<&str> = entry.split('!').collect();
            if tokens.len() != 3 {
                return None;
            }

            let id = tokens[0].trim().parse::<i64>().ok()?;
            let enter_time = parse_datetime(tokens[1])?;
            let mut exit_time = parse_datetime(tokens[2])?;

            if exit_time < enter_time {
                exit_time += Duration::days(1);
            }

            Some(VisitFix {
                id,
                enter_time,
                exit_time,
            })
        })
        .collect()
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub fn parse_datetime(input: &str) -> Option<NaiveDateTime> {
    let input = input.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
}
