use chrono::{Duration, Local};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use super::visit::now;

const STATUS_INACTIVE: i64 = 0;
const STATUS_ACTIVE: i64 = 1;
const MAX_DAILY_GUESTS: u32 = 9999;

/// A guest as listed on the guest station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Guest {
    pub guest_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct CreateGuestData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub where_found: String,
    pub newsletter: bool,
}

impl CreateGuestData {
    /// `First L.`, or just the first name when no last name was given.
    pub fn display_name(&self) -> String {
        match self.last_name.trim().chars().next() {
            Some(initial) => format!("{} {}.", self.first_name.trim(), initial),
            None => self.first_name.trim().to_string(),
        }
    }
}

impl Guest {
    /// Registers a guest under the next free id for today
    /// (`YYYYMMDD` followed by a four digit sequence).
    pub async fn add_guest(pool: &SqlitePool, data: &CreateGuestData) -> Result<Option<String>, sqlx::Error> {
        let prefix = Local::now().format("%Y%m%d").to_string();
        let display_name = data.display_name();

        let last = sqlx::query_scalar::<_, Option<String>>(
            r#"
            SELECT MAX(guest_id) FROM guests WHERE guest_id LIKE ? || '____'
            "#,
        )
        .bind(&prefix)
        .fetch_one(pool)
        .await?;

        let mut num = last
            .and_then(|id| id.get(prefix.len()..).and_then(|n| n.parse::<u32>().ok()))
            .map_or(1, |n| n + 1);

        while num <= MAX_DAILY_GUESTS {
            let guest_id = format!("{}{:04}", prefix, num);
            let result = sqlx::query(
                r#"
                INSERT INTO guests (guest_id, display_name, email, first_name, last_name, where_found, status, newsletter)
                SELECT ?, ?, ?, ?, ?, ?, ?, ?
                WHERE NOT EXISTS (SELECT 1 FROM guests WHERE guest_id = ?)
                "#,
            )
            .bind(&guest_id)
            .bind(&display_name)
            .bind(&data.email)
            .bind(&data.first_name)
            .bind(&data.last_name)
            .bind(&data.where_found)
            .bind(STATUS_ACTIVE)
            .bind(data.newsletter)
            .bind(&guest_id)
            .execute(pool)
            .await?;

            if result.rows_affected() > 0 {
                tracing::info!(guest_id = %guest_id, "Guest added");
                return Ok(Some(guest_id));
            }

            num += 1;
        }

        tracing::warn!(date = %prefix, "Ran out of guest ids for the day");
        Ok(None)
    }

    /// The guest's display name; the inner error is the user-facing message
    /// for an unknown id.
    pub async fn get_name(
        pool: &SqlitePool,
        guest_id: &str,
    ) -> Result<std::result::Result<String, String>, sqlx::Error> {
        let name = sqlx::query_scalar::<_, String>(
            r#"
            SELECT display_name FROM guests WHERE guest_id = ?
            "#,
        )
        .bind(guest_id)
        .fetch_optional(pool)
        .await?;

        Ok(name.ok_or_else(|| {
            let error = format!("Guest name not found with invalid guest_id: {}.", guest_id);
            tracing::warn!("{}", error);
            error
        }))
    }

    pub async fn get_email(
        pool: &SqlitePool,
        guest_id: &str,
    ) -> Result<std::result::Result<String, String>, sqlx::Error> {
        let email = sqlx::query_scalar::<_, Option<String>>(
            r#"
            SELECT email FROM guests WHERE guest_id = ?
            "#,
        )
        .bind(guest_id)
        .fetch_optional(pool)
        .await?;

        Ok(email.map(Option::unwrap_or_default).ok_or_else(|| {
            let error = format!("Guest email not found with invalid guest_id: {}", guest_id);
            tracing::warn!("{}", error);
            error
        }))
    }

    pub async fn get_all_guests(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT guest_id, display_name FROM guests
            WHERE status IS NOT ?
            ORDER BY display_name
            "#,
        )
        .bind(STATUS_INACTIVE)
        .fetch_all(pool)
        .await
    }

    /// Guests who visited within the last `num_days` days.
    pub async fn guests_last_in_building(pool: &SqlitePool, num_days: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT DISTINCT g.guest_id, g.display_name FROM guests g
            INNER JOIN visits v ON g.guest_id = v.barcode
            WHERE v.enter_time > ?
            ORDER BY g.display_name
            "#,
        )
        .bind(now() - Duration::days(num_days))
        .fetch_all(pool)
        .await
    }

    pub async fn guests_in_building(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT g.guest_id, g.display_name FROM visits v
            INNER JOIN guests g ON g.guest_id = v.barcode
            WHERE v.status = 'In'
            ORDER BY g.display_name
            "#,
        )
        .fetch_all(pool)
        .await
    }

    /// Splits active guests into (in the building, not here).
    pub async fn get_guest_lists(pool: &SqlitePool) -> Result<(Vec<Self>, Vec<Self>), sqlx::Error> {
        let all_guests = Self::get_all_guests(pool).await?;
        let building_guests = Self::guests_in_building(pool).await?;

        let not_here = all_guests
            .into_iter()
            .filter(|guest| !building_guests.contains(guest))
            .collect();

        Ok((building_guests, not_here))
    }
}
