use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TeamMemberType {
    Student,
    Mentor,
    Coach,
    Other,
}

impl TeamMemberType {
    pub fn from_value(value: i64) -> Self {
        match value {
            1 => TeamMemberType::Mentor,
            2 => TeamMemberType::Coach,
            -1 => TeamMemberType::Other,
            _ => TeamMemberType::Student,
        }
    }

    pub fn value(self) -> i64 {
        match self {
            TeamMemberType::Student => 0,
            TeamMemberType::Mentor => 1,
            TeamMemberType::Coach => 2,
            TeamMemberType::Other => -1,
        }
    }

    /// Suffix shown after a name on the roster; students get none.
    pub fn label(self) -> &'static str {
        match self {
            TeamMemberType::Student => "",
            TeamMemberType::Mentor => "(Mentor)",
            TeamMemberType::Coach => "(Coach)",
            TeamMemberType::Other => "(Other)",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TeamInfo {
    pub team_id: i64,
    pub program_name: String,
    pub program_number: i64,
    pub team_name: String,
    pub start_date: NaiveDate,
    pub active: bool,
}

impl TeamInfo {
    /// `FRC1234`, or just the program name when it has no number.
    pub fn program_id(&self) -> String {
        if self.program_number != 0 {
            format!("{}{}", self.program_name, self.program_number)
        } else {
            self.program_name.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TeamMember {
    pub display_name: String,
    pub barcode: String,
    pub member_type: i64,
    pub present: bool,
}

impl TeamMember {
    pub fn kind(&self) -> TeamMemberType {
        TeamMemberType::from_value(self.member_type)
    }
}

const TEAM_COLUMNS: &str = "team_id, program_name, program_number, team_name, start_date, active";

pub struct Team;

impl Team {
    /// Creates a season of a team. Returns the new team id, or the message to
    /// show when that program already has a season starting on that date.
    pub async fn create_team(
        pool: &SqlitePool,
        program_name: &str,
        program_number: i64,
        team_name: &str,
        start_date: NaiveDate,
    ) -> Result<std::result::Result<i64, String>, sqlx::Error> {
        let program_name = program_name.trim().to_uppercase();
        let team_name = if team_name.trim().is_empty() {
            format!("TBD:{}{}", program_name, program_number)
        } else {
            team_name.trim().to_string()
        };

        let result = sqlx::query(
            r#"
            INSERT INTO teams (program_name, program_number, team_name, start_date, active)
            VALUES (?, ?, ?, ?, 1)
            "#,
        )
        .bind(&program_name)
        .bind(program_number)
        .bind(&team_name)
        .bind(start_date)
        .execute(pool)
        .await;

        match result {
            Ok(done) => {
                tracing::info!(program = %program_name, number = program_number, "Team created");
                Ok(Ok(done.last_insert_rowid()))
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Ok(Err("Team name already exists".to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn from_team_id(pool: &SqlitePool, team_id: i64) -> Result<Option<TeamInfo>, sqlx::Error> {
        sqlx::query_as::<_, TeamInfo>(&format!("SELECT {} FROM teams WHERE team_id = ?", TEAM_COLUMNS))
            .bind(team_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn delete_team(pool: &SqlitePool, team_id: i64) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM teams WHERE team_id = ?")
            .bind(team_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM team_members WHERE team_id = ?")
            .bind(team_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    pub async fn edit_team(
        pool: &SqlitePool,
        team_id: i64,
        program_name: &str,
        program_number: i64,
        start_date: NaiveDate,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE teams SET program_name = ?, program_number = ?, start_date = ?
            WHERE team_id = ?
            "#,
        )
        .bind(program_name.trim().to_uppercase())
        .bind(program_number)
        .bind(start_date)
        .bind(team_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn rename_team(pool: &SqlitePool, team_id: i64, new_name: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE teams SET team_name = ? WHERE team_id = ?")
            .bind(new_name)
            .bind(team_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn activate_team(pool: &SqlitePool, team_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE teams SET active = 1 WHERE team_id = ?")
            .bind(team_id)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Deactivates every season of the team's program.
    pub async fn deactivate_team(pool: &SqlitePool, team_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE teams SET active = 0
            WHERE (program_name, program_number) IN (
                SELECT program_name, program_number FROM teams WHERE team_id = ?
            )
            "#,
        )
        .bind(team_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// The latest active season of every program.
    pub async fn get_active_team_list(pool: &SqlitePool) -> Result<Vec<TeamInfo>, sqlx::Error> {
        sqlx::query_as::<_, TeamInfo>(&format!(
            r#"
            SELECT {} FROM teams t
            WHERE active = 1 AND start_date = (
                SELECT MAX(start_date) FROM teams s
                WHERE s.active = 1
                  AND s.program_name = t.program_name
                  AND s.program_number = t.program_number
            )
            ORDER BY program_name, program_number
            "#,
            TEAM_COLUMNS
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn get_inactive_team_list(pool: &SqlitePool) -> Result<Vec<TeamInfo>, sqlx::Error> {
        sqlx::query_as::<_, TeamInfo>(&format!(
            "SELECT {} FROM teams WHERE active = 0 ORDER BY program_name, program_number",
            TEAM_COLUMNS
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn get_all_seasons(pool: &SqlitePool, team: &TeamInfo) -> Result<Vec<TeamInfo>, sqlx::Error> {
        sqlx::query_as::<_, TeamInfo>(&format!(
            r#"
            SELECT {} FROM teams
            WHERE program_name = ? AND program_number = ?
            ORDER BY start_date DESC
            "#,
            TEAM_COLUMNS
        ))
        .bind(&team.program_name)
        .bind(team.program_number)
        .fetch_all(pool)
        .await
    }

    pub async fn get_team_from_program_info(
        pool: &SqlitePool,
        program_name: &str,
        program_number: i64,
    ) -> Result<Option<TeamInfo>, sqlx::Error> {
        sqlx::query_as::<_, TeamInfo>(&format!(
            r#"
            SELECT {} FROM teams
            WHERE active = 1 AND program_name = ? AND program_number = ?
            ORDER BY start_date DESC LIMIT 1
            "#,
            TEAM_COLUMNS
        ))
        .bind(program_name.trim().to_uppercase())
        .bind(program_number)
        .fetch_optional(pool)
        .await
    }

    pub async fn team_name_from_id(pool: &SqlitePool, team_id: i64) -> Result<String, sqlx::Error> {
        let name = sqlx::query_scalar::<_, String>("SELECT team_name FROM teams WHERE team_id = ?")
            .bind(team_id)
            .fetch_optional(pool)
            .await?;

        Ok(name.unwrap_or_default())
    }

    /// Adds a member to the roster. Someone already on it is left as is.
    pub async fn add_member(
        pool: &SqlitePool,
        team_id: i64,
        barcode: &str,
        member_type: TeamMemberType,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO team_members (team_id, barcode, type) VALUES (?, ?, ?)
            "#,
        )
        .bind(team_id)
        .bind(barcode)
        .bind(member_type.value())
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn remove_member(pool: &SqlitePool, team_id: i64, barcode: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM team_members WHERE team_id = ? AND barcode = ?")
            .bind(team_id)
            .bind(barcode)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Roster with coaches first, then mentors, then students, each by name.
    pub async fn get_team_members(pool: &SqlitePool, team_id: i64) -> Result<Vec<TeamMember>, sqlx::Error> {
        sqlx::query_as::<_, TeamMember>(
            r#"
            SELECT m.display_name, tm.barcode, tm.type AS member_type,
                   EXISTS (
                       SELECT 1 FROM visits v WHERE v.barcode = tm.barcode AND v.status = 'In'
                   ) AS present
            FROM team_members tm
            INNER JOIN members m ON m.barcode = tm.barcode
            WHERE tm.team_id = ?
            ORDER BY tm.type DESC, m.display_name ASC
            "#,
        )
        .bind(team_id)
        .fetch_all(pool)
        .await
    }

    pub async fn get_coaches(pool: &SqlitePool, team_id: i64) -> Result<Vec<TeamMember>, sqlx::Error> {
        sqlx::query_as::<_, TeamMember>(
            r#"
            SELECT m.display_name, tm.barcode, tm.type AS member_type, 0 AS present
            FROM team_members tm
            INNER JOIN members m ON m.barcode = tm.barcode
            WHERE tm.team_id = ? AND tm.type = ?
            ORDER BY m.display_name
            "#,
        )
        .bind(team_id)
        .bind(TeamMemberType::Coach.value())
        .fetch_all(pool)
        .await
    }

    pub async fn is_coach_of_team(pool: &SqlitePool, team_id: i64, barcode: &str) -> Result<bool, sqlx::Error> {
        let found = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT team_id FROM team_members WHERE team_id = ? AND barcode = ? AND type = ?
            "#,
        )
        .bind(team_id)
        .bind(barcode)
        .bind(TeamMemberType::Coach.value())
        .fetch_optional(pool)
        .await?;

        Ok(found.is_some())
    }

    pub async fn get_active_teams_coached(pool: &SqlitePool, barcode: &str) -> Result<Vec<TeamInfo>, sqlx::Error> {
        let mut coached = Vec::new();

        for team in Self::get_active_team_list(pool).await? {
            if Self::is_coach_of_team(pool, team.team_id, barcode).await? {
                coached.push(team);
            }
        }

        Ok(coached)
    }

    /// Starts a new season of the team's program and carries the returning
    /// members over with their roles. Returns the id of the new season.
    pub async fn new_season(
        pool: &SqlitePool,
        team: &TeamInfo,
        start_date: NaiveDate,
        returning: &[(String, TeamMemberType)],
    ) -> Result<std::result::Result<i64, String>, sqlx::Error> {
        let team_id = match Self::create_team(
            pool,
            &team.program_name,
            team.program_number,
            &team.team_name,
            start_date,
        )
        .await?
        {
            Ok(team_id) => team_id,
            Err(_) => return Ok(Err(format!("Team name {} already exists.", team.program_name))),
        };

        for (barcode, member_type) in returning {
            Self::add_member(pool, team_id, barcode, *member_type).await?;
        }

        Ok(Ok(team_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::member::{CreateMemberData, Member};
    use crate::models::visit::Visit;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn pool_with_team() -> (SqlitePool, i64) {
        let pool = test_pool().await;
        Member::add_members(
            &pool,
            &[
                CreateMemberData::new("100091", "Cole Coach", "2099-01-01"),
                CreateMemberData::new("100032", "Sam Student", "2099-01-01"),
                CreateMemberData::new("100015", "Mia Mentor", "2099-01-01"),
            ],
        )
        .await
        .unwrap();

        let team_id = Team::create_team(&pool, "frc", 1234, "Gears", date("2024-01-01"))
            .await
            .unwrap()
            .unwrap();
        Team::add_member(&pool, team_id, "100091", TeamMemberType::Coach).await.unwrap();
        Team::add_member(&pool, team_id, "100032", TeamMemberType::Student).await.unwrap();
        Team::add_member(&pool, team_id, "100015", TeamMemberType::Mentor).await.unwrap();

        (pool, team_id)
    }

    #[tokio::test]
    async fn test_create_team_upper_cases_program() {
        let (pool, team_id) = pool_with_team().await;

        let team = Team::from_team_id(&pool, team_id).await.unwrap().unwrap();

        assert_eq!(team.program_name, "FRC");
        assert_eq!(team.program_id(), "FRC1234");
        assert!(team.active);
    }

    #[tokio::test]
    async fn test_duplicate_team() {
        let (pool, _) = pool_with_team().await;

        let result = Team::create_team(&pool, "FRC", 1234, "Other", date("2024-01-01")).await.unwrap();

        assert_eq!(result, Err("Team name already exists".to_string()));
    }

    #[tokio::test]
    async fn test_blank_team_name() {
        let pool = test_pool().await;

        let team_id = Team::create_team(&pool, "ftc", 42, " ", date("2024-09-01"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(Team::team_name_from_id(&pool, team_id).await.unwrap(), "TBD:FTC42");
    }

    #[tokio::test]
    async fn test_roster_order_and_presence() {
        let (pool, team_id) = pool_with_team().await;
        Visit::check_in_member(&pool, "100032").await.unwrap();

        let members = Team::get_team_members(&pool, team_id).await.unwrap();
        let order: Vec<&str> = members.iter().map(|m| m.barcode.as_str()).collect();

        assert_eq!(order, vec!["100091", "100015", "100032"]);
        assert!(members[2].present);
        assert!(!members[0].present);
        assert_eq!(members[0].kind().label(), "(Coach)");
    }

    #[tokio::test]
    async fn test_duplicate_roster_entries_are_ignored() {
        let (pool, team_id) = pool_with_team().await;

        assert_eq!(Team::add_member(&pool, team_id, "100032", TeamMemberType::Mentor).await.unwrap(), 0);
        Team::remove_member(&pool, team_id, "100032").await.unwrap();

        assert_eq!(Team::get_team_members(&pool, team_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_new_season_replaces_old_in_active_list() {
        let (pool, team_id) = pool_with_team().await;
        let team = Team::from_team_id(&pool, team_id).await.unwrap().unwrap();

        let new_id = Team::new_season(
            &pool,
            &team,
            date("2025-01-01"),
            &[("100091".to_string(), TeamMemberType::Coach)],
        )
        .await
        .unwrap()
        .unwrap();

        let active = Team::get_active_team_list(&pool).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].team_id, new_id);
        assert_eq!(Team::get_all_seasons(&pool, &team).await.unwrap().len(), 2);
        assert!(Team::is_coach_of_team(&pool, new_id, "100091").await.unwrap());
        assert_eq!(Team::get_coaches(&pool, new_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_covers_all_seasons() {
        let (pool, team_id) = pool_with_team().await;
        let team = Team::from_team_id(&pool, team_id).await.unwrap().unwrap();
        Team::new_season(&pool, &team, date("2025-01-01"), &[]).await.unwrap().unwrap();

        Team::deactivate_team(&pool, team_id).await.unwrap();

        assert!(Team::get_active_team_list(&pool).await.unwrap().is_empty());
        assert_eq!(Team::get_inactive_team_list(&pool).await.unwrap().len(), 2);

        Team::activate_team(&pool, team_id).await.unwrap();
        let found = Team::get_team_from_program_info(&pool, "frc", 1234).await.unwrap().unwrap();
        assert_eq!(found.team_id, team_id);
    }

    #[tokio::test]
    async fn test_teams_coached() {
        let (pool, team_id) = pool_with_team().await;

        let coached = Team::get_active_teams_coached(&pool, "100091").await.unwrap();
        assert_eq!(coached.len(), 1);
        assert_eq!(coached[0].team_id, team_id);
        assert!(Team::get_active_teams_coached(&pool, "100032").await.unwrap().is_empty());

        Team::delete_team(&pool, team_id).await.unwrap();
        assert!(Team::from_team_id(&pool, team_id).await.unwrap().is_none());
    }
}
