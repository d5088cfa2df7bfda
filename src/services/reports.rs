use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::collections::HashSet;

use crate::models::visit::{now, VisitStatus};
use crate::models::Account;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PersonInBuilding {
    pub display_name: String,
    pub barcode: String,
    pub enter_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub name: String,
    pub time: NaiveDateTime,
    pub description: String,
}

/// A visit row as shown on the fix-data page.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Datum {
    pub rowid: i64,
    pub enter_time: NaiveDateTime,
    pub exit_time: Option<NaiveDateTime>,
    pub name: String,
    pub status: VisitStatus,
}

#[derive(Debug, FromRow)]
struct TransactionRow {
    display_name: String,
    enter_time: NaiveDateTime,
    exit_time: Option<NaiveDateTime>,
    status: VisitStatus,
    barcode: String,
}

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_hms_micro_opt(23, 59, 59, 999_999)
        .unwrap_or_else(|| start_of_day(date))
}

fn keyholder_name(name: String, barcode: &str, keyholders: &HashSet<String>) -> String {
    if keyholders.contains(barcode) {
        format!("{}(Keyholder)", name)
    } else {
        name
    }
}

async fn keyholder_set(pool: &SqlitePool) -> Result<HashSet<String>, sqlx::Error> {
    Ok(Account::get_keyholder_barcodes(pool).await?.into_iter().collect())
}

/// Members and guests currently in the building, by name. Keyholders are
/// marked as such.
pub async fn who_is_here(pool: &SqlitePool) -> Result<Vec<PersonInBuilding>, sqlx::Error> {
    let keyholders = keyholder_set(pool).await?;

    let present = sqlx::query_as::<_, PersonInBuilding>(
        r#"
        SELECT m.display_name, v0.barcode, v0.enter_time
        FROM visits v0
        INNER JOIN members m ON m.barcode = v0.barcode
        WHERE v0.status = 'In'
        UNION
        SELECT g.display_name, v1.barcode, v1.enter_time
        FROM visits v1
        INNER JOIN guests g ON g.guest_id = v1.barcode
        WHERE v1.status = 'In'
        ORDER BY display_name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(present
        .into_iter()
        .map(|person| PersonInBuilding {
            display_name: keyholder_name(person.display_name, &person.barcode, &keyholders),
            ..person
        })
        .collect())
}

pub async fn number_present(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM visits WHERE status = 'In'")
        .fetch_one(pool)
        .await
}

/// Arrivals and departures of visits that started in the window, newest
/// first. A visit still open only contributes its arrival.
pub async fn transactions(
    pool: &SqlitePool,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<Transaction>, sqlx::Error> {
    let keyholders = keyholder_set(pool).await?;

    let rows = sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT m.display_name, v0.enter_time, v0.exit_time, v0.status, v0.barcode
        FROM visits v0
        INNER JOIN members m ON m.barcode = v0.barcode
        WHERE v0.enter_time BETWEEN ? AND ?
        UNION
        SELECT g.display_name, v1.enter_time, v1.exit_time, v1.status, v1.barcode
        FROM visits v1
        INNER JOIN guests g ON g.guest_id = v1.barcode
        WHERE v1.enter_time BETWEEN ? AND ?
        "#,
    )
    .bind(start)
    .bind(end)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    let mut list = Vec::new();
    for row in rows {
        let name = keyholder_name(row.display_name, &row.barcode, &keyholders);

        if row.status != VisitStatus::In {
            list.push(Transaction {
                name: name.clone(),
                time: row.exit_time.unwrap_or(row.enter_time),
                description: row.status.to_string(),
            });
        }

        list.push(Transaction {
            name,
            time: row.enter_time,
            description: VisitStatus::In.to_string(),
        });
    }

    list.sort_by(|a, b| b.time.cmp(&a.time));
    Ok(list)
}

pub async fn transactions_today(pool: &SqlitePool) -> Result<Vec<Transaction>, sqlx::Error> {
    let today = now().date();
    transactions(pool, start_of_day(today), end_of_day(today)).await
}

pub async fn unique_visitors(
    pool: &SqlitePool,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(DISTINCT barcode) FROM visits WHERE enter_time BETWEEN ? AND ?
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await
}

pub async fn unique_visitors_today(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let today = now().date();
    unique_visitors(pool, start_of_day(today), end_of_day(today)).await
}

pub async fn get_earliest_date(pool: &SqlitePool) -> Result<Option<NaiveDate>, sqlx::Error> {
    let earliest = sqlx::query_scalar::<_, NaiveDateTime>(
        "SELECT enter_time FROM visits ORDER BY enter_time ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(earliest.map(|t| t.date()))
}

/// Days on which someone was left marked Forgot.
pub async fn get_forgotten_dates(pool: &SqlitePool) -> Result<Vec<NaiveDate>, sqlx::Error> {
    let times = sqlx::query_scalar::<_, NaiveDateTime>(
        "SELECT enter_time FROM visits WHERE status = 'Forgot' ORDER BY enter_time",
    )
    .fetch_all(pool)
    .await?;

    let mut dates: Vec<NaiveDate> = Vec::new();
    for time in times {
        if !dates.contains(&time.date()) {
            dates.push(time.date());
        }
    }

    Ok(dates)
}

/// Every visit that started on the given day, for manual correction.
pub async fn get_data(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<Datum>, sqlx::Error> {
    let (start, end) = (start_of_day(date), end_of_day(date));

    sqlx::query_as::<_, Datum>(
        r#"
        SELECT v0.rowid AS rowid, v0.enter_time, v0.exit_time, m.display_name AS name, v0.status
        FROM visits v0
        INNER JOIN members m ON m.barcode = v0.barcode
        WHERE v0.enter_time BETWEEN ? AND ?
        UNION
        SELECT v1.rowid AS rowid, v1.enter_time, v1.exit_time, g.display_name AS name, v1.status
        FROM visits v1
        INNER JOIN guests g ON g.guest_id = v1.barcode
        WHERE v1.enter_time BETWEEN ? AND ?
        ORDER BY enter_time
        "#,
    )
    .bind(start)
    .bind(end)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}

/// Names of the team's members whose visits overlapped the meeting.
pub async fn which_team_members_here(
    pool: &SqlitePool,
    team_id: i64,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT m.display_name FROM visits v
        INNER JOIN members m ON m.barcode = v.barcode
        INNER JOIN team_members tm ON tm.barcode = v.barcode
        WHERE v.enter_time <= ? AND v.exit_time >= ? AND tm.team_id = ?
        ORDER BY m.display_name ASC
        "#,
    )
    .bind(end)
    .bind(start)
    .bind(team_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::account::tests::pool_with_keyholders;
    use crate::models::guest::{CreateGuestData, Guest};
    use crate::models::team::{Team, TeamMemberType};
    use crate::models::visit::Visit;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[tokio::test]
    async fn test_who_is_here_marks_keyholders() {
        let pool = pool_with_keyholders().await;
        let guest_id = Guest::add_guest(
            &pool,
            &CreateGuestData {
                first_name: "Ada".to_string(),
                last_name: "Byron".to_string(),
                email: String::new(),
                where_found: String::new(),
                newsletter: false,
            },
        )
        .await
        .unwrap()
        .unwrap();
        Visit::check_in_member(&pool, "100091").await.unwrap();
        Visit::check_in_member(&pool, "100032").await.unwrap();
        Visit::enter_guest(&pool, &guest_id).await.unwrap();

        let here = who_is_here(&pool).await.unwrap();
        let names: Vec<&str> = here.iter().map(|p| p.display_name.as_str()).collect();

        assert_eq!(names, vec!["Ada B.", "Cory C", "Nick N(Keyholder)"]);
        assert_eq!(number_present(&pool).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_transactions_today() {
        let pool = pool_with_keyholders().await;
        Visit::check_in_member(&pool, "100032").await.unwrap();
        Visit::check_out_member(&pool, "100032").await.unwrap();
        Visit::check_in_member(&pool, "100015").await.unwrap();

        let list = transactions_today(&pool).await.unwrap();

        assert_eq!(list.len(), 3);
        assert!(list.windows(2).all(|w| w[0].time >= w[1].time));
        assert!(list.iter().any(|t| t.description == "Out" && t.name == "Cory C"));
        assert!(list.iter().any(|t| t.name == "Fran F(Keyholder)"));
        assert_eq!(unique_visitors_today(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_forgotten_dates_and_data() {
        let pool = pool_with_keyholders().await;
        Visit::insert_raw(&pool, "100032", at("2024-03-01 10:00"), at("2024-03-01 23:00"), VisitStatus::Forgot)
            .await
            .unwrap();
        Visit::insert_raw(&pool, "100015", at("2024-03-01 18:00"), at("2024-03-01 23:00"), VisitStatus::Forgot)
            .await
            .unwrap();
        Visit::insert_raw(&pool, "100091", at("2024-02-01 09:00"), at("2024-02-01 12:00"), VisitStatus::Out)
            .await
            .unwrap();

        let dates = get_forgotten_dates(&pool).await.unwrap();
        assert_eq!(dates, vec![NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()]);
        assert_eq!(get_earliest_date(&pool).await.unwrap(), NaiveDate::from_ymd_opt(2024, 2, 1));

        let data = get_data(&pool, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()).await.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].name, "Cory C");
        assert_eq!(data[0].status, VisitStatus::Forgot);
    }

    #[tokio::test]
    async fn test_team_members_here_during_meeting() {
        let pool = pool_with_keyholders().await;
        let team_id = Team::create_team(&pool, "FRC", 1, "Bots", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .await
            .unwrap()
            .unwrap();
        Team::add_member(&pool, team_id, "100032", TeamMemberType::Student).await.unwrap();
        Team::add_member(&pool, team_id, "100015", TeamMemberType::Student).await.unwrap();
        Visit::insert_raw(&pool, "100032", at("2024-03-01 17:30"), at("2024-03-01 19:00"), VisitStatus::Out)
            .await
            .unwrap();
        Visit::insert_raw(&pool, "100015", at("2024-03-01 12:00"), at("2024-03-01 13:00"), VisitStatus::Out)
            .await
            .unwrap();

        let here = which_team_members_here(&pool, team_id, at("2024-03-01 18:00"), at("2024-03-01 20:00"))
            .await
            .unwrap();

        assert_eq!(here, vec!["Cory C"]);
    }

    #[tokio::test]
    async fn test_empty_database() {
        let pool = test_pool().await;

        assert!(get_earliest_date(&pool).await.unwrap().is_none());
        assert!(who_is_here(&pool).await.unwrap().is_empty());
        assert_eq!(number_present(&pool).await.unwrap(), 0);
    }
}
