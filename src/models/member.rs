use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Member {
    pub barcode: String,
    pub display_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub membership_expires: Option<NaiveDate>,
}

/// A (display name, barcode) pair, the shape most member pick lists use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct MemberName {
    pub display_name: String,
    pub barcode: String,
}

#[derive(Debug, Clone)]
pub struct CreateMemberData {
    pub barcode: String,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub membership_expires: NaiveDate,
}

#[cfg(test)]
impl CreateMemberData {
    pub fn new(barcode: &str, display_name: &str, expires: &str) -> Self {
        let (first, last) = display_name.split_once(' ').unwrap_or((display_name, ""));
        Self {
            barcode: barcode.to_string(),
            display_name: display_name.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: format!("{}@example.org", barcode),
            membership_expires: NaiveDate::parse_from_str(expires, "%Y-%m-%d").unwrap(),
        }
    }
}

impl Member {
    /// Inserts members, replacing the details of any barcode already on file.
    pub async fn add_members(pool: &SqlitePool, members: &[CreateMemberData]) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut count = 0;

        for data in members {
            sqlx::query(
                r#"
                INSERT INTO members (barcode, display_name, first_name, last_name, email, membership_expires)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (barcode) DO UPDATE SET
                    display_name = excluded.display_name,
                    first_name = excluded.first_name,
                    last_name = excluded.last_name,
                    email = excluded.email,
                    membership_expires = excluded.membership_expires
                "#,
            )
            .bind(&data.barcode)
            .bind(&data.display_name)
            .bind(&data.first_name)
            .bind(&data.last_name)
            .bind(&data.email)
            .bind(data.membership_expires)
            .execute(&mut *tx)
            .await?;

            count += 1;
        }

        tx.commit().await?;
        Ok(count)
    }

    pub async fn find_by_barcode(pool: &SqlitePool, barcode: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM members WHERE barcode = ?
            "#,
        )
        .bind(barcode)
        .fetch_optional(pool)
        .await
    }

    /// Members whose membership has not lapsed past the grace period.
    pub async fn get_active(pool: &SqlitePool) -> Result<Vec<MemberName>, sqlx::Error> {
        sqlx::query_as::<_, MemberName>(
            r#"
            SELECT display_name, barcode FROM current_members
            ORDER BY display_name ASC
            "#,
        )
        .fetch_all(pool)
        .await
    }

    /// Display name for a barcode; the inner error is the message shown in
    /// place of a name when the barcode is unknown.
    pub async fn get_name(
        pool: &SqlitePool,
        barcode: &str,
    ) -> Result<std::result::Result<String, String>, sqlx::Error> {
        let name = sqlx::query_scalar::<_, String>(
            r#"
            SELECT display_name FROM members WHERE barcode = ?
            "#,
        )
        .bind(barcode)
        .fetch_optional(pool)
        .await?;

        Ok(name.ok_or_else(|| format!("Invalid: {}", barcode)))
    }

    pub async fn get_email(pool: &SqlitePool, barcode: &str) -> Result<Option<String>, sqlx::Error> {
        let email = sqlx::query_scalar::<_, Option<String>>(
            r#"
            SELECT email FROM members WHERE barcode = ?
            "#,
        )
        .bind(barcode)
        .fetch_optional(pool)
        .await?;

        Ok(email.flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_add_and_get_name() {
        let pool = test_pool().await;
        Member::add_members(&pool, &[CreateMemberData::new("100091", "Ada L", "2099-01-01")])
            .await
            .unwrap();

        assert_eq!(Member::get_name(&pool, "100091").await.unwrap(), Ok("Ada L".to_string()));
        assert_eq!(
            Member::get_name(&pool, "404").await.unwrap(),
            Err("Invalid: 404".to_string())
        );
    }

    #[tokio::test]
    async fn test_add_members_upserts() {
        let pool = test_pool().await;
        Member::add_members(&pool, &[CreateMemberData::new("100091", "Ada L", "2099-01-01")])
            .await
            .unwrap();
        Member::add_members(&pool, &[CreateMemberData::new("100091", "Ada Lovelace", "2099-01-01")])
            .await
            .unwrap();

        let member = Member::find_by_barcode(&pool, "100091").await.unwrap().unwrap();
        assert_eq!(member.display_name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_active_excludes_lapsed_members() {
        let pool = test_pool().await;
        Member::add_members(
            &pool,
            &[
                CreateMemberData::new("100091", "Zed Z", "2099-01-01"),
                CreateMemberData::new("100032", "Amy A", "2099-01-01"),
                CreateMemberData::new("100010", "Old O", "2001-01-01"),
            ],
        )
        .await
        .unwrap();

        let active = Member::get_active(&pool).await.unwrap();
        let barcodes: Vec<&str> = active.iter().map(|m| m.barcode.as_str()).collect();

        assert_eq!(barcodes, vec!["100032", "100091"]);
    }
}
