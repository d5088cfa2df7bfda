use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;

use super::visit::now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CertificationLevel {
    None,
    Basic,
    Certified,
    Dof,
    Instructor,
    Certifier,
}

impl CertificationLevel {
    pub const ALL: [CertificationLevel; 6] = [
        CertificationLevel::None,
        CertificationLevel::Basic,
        CertificationLevel::Certified,
        CertificationLevel::Dof,
        CertificationLevel::Instructor,
        CertificationLevel::Certifier,
    ];

    pub fn from_value(value: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.value() == value)
    }

    pub fn value(self) -> i64 {
        match self {
            CertificationLevel::None => 0,
            CertificationLevel::Basic => 1,
            CertificationLevel::Certified => 10,
            CertificationLevel::Dof => 20,
            CertificationLevel::Instructor => 30,
            CertificationLevel::Certifier => 40,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CertificationLevel::None => "NONE",
            CertificationLevel::Basic => "BASIC",
            CertificationLevel::Certified => "CERTIFIED",
            CertificationLevel::Dof => "DOF",
            CertificationLevel::Instructor => "INSTRUCTOR",
            CertificationLevel::Certifier => "CERTIFIER",
        }
    }

    fn css_class(self) -> &'static str {
        match self {
            CertificationLevel::None => "clNone",
            CertificationLevel::Basic => "clBasic",
            CertificationLevel::Certified => "clCertified",
            CertificationLevel::Dof => "clDOF",
            CertificationLevel::Instructor => "clInstructor",
            CertificationLevel::Certifier => "clCertifier",
        }
    }

    fn cell_label(self) -> &'static str {
        match self {
            CertificationLevel::None => "",
            CertificationLevel::Basic => "BASIC",
            CertificationLevel::Certified => "CERTIFIED",
            CertificationLevel::Dof => "DOF",
            CertificationLevel::Instructor => "Instructor",
            CertificationLevel::Certifier => "Certifier",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Tool {
    pub id: i64,
    pub name: String,
    pub grouping: i64,
}

/// One cell of a certification grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificationCell {
    pub class: &'static str,
    pub label: &'static str,
    /// `YYYY-MM` of the certification, empty when there is none.
    pub date: String,
}

/// A member's latest certification on each tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolUser {
    pub display_name: String,
    pub barcode: String,
    tools: HashMap<i64, (NaiveDateTime, i64)>,
}

impl ToolUser {
    pub fn new(display_name: &str, barcode: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            barcode: barcode.to_string(),
            tools: HashMap::new(),
        }
    }

    /// Records a certification, keeping only the most recent per tool.
    /// Undated certifications count as 2019-01-01.
    pub fn add_tool(&mut self, tool_id: i64, date: Option<NaiveDateTime>, level: i64) {
        let date = date.unwrap_or_else(default_certification_date);

        match self.tools.get(&tool_id) {
            Some((current, _)) if *current >= date => {}
            _ => {
                self.tools.insert(tool_id, (date, level));
            }
        }
    }

    pub fn get_tool(&self, tool_id: i64) -> Option<(NaiveDateTime, CertificationLevel)> {
        self.tools.get(&tool_id).map(|(date, level)| {
            (
                *date,
                CertificationLevel::from_value(*level).unwrap_or(CertificationLevel::None),
            )
        })
    }

    pub fn cell(&self, tool_id: i64) -> CertificationCell {
        match self.get_tool(tool_id) {
            Some((date, level)) if level != CertificationLevel::None => CertificationCell {
                class: level.css_class(),
                label: level.cell_label(),
                date: date.format("%Y-%m").to_string(),
            },
            _ => CertificationCell {
                class: CertificationLevel::None.css_class(),
                label: "",
                date: String::new(),
            },
        }
    }

    /// Grid cell for a column of the certification table.
    pub fn cell_for(&self, tool: &Tool) -> CertificationCell {
        self.cell(tool.id)
    }
}

fn default_certification_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2019, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

#[derive(Debug, FromRow)]
struct CertificationRow {
    user_id: String,
    tool_id: i64,
    date: Option<NaiveDateTime>,
    level: i64,
    display_name: String,
}

/// Folds certification rows into users, keeping the order rows arrive in.
fn collect_users(users: &mut Vec<ToolUser>, rows: Vec<CertificationRow>) {
    let mut index: HashMap<String, usize> = users
        .iter()
        .enumerate()
        .map(|(i, user)| (user.barcode.clone(), i))
        .collect();

    for row in rows {
        let position = *index.entry(row.user_id.clone()).or_insert_with(|| {
            users.push(ToolUser::new(&row.display_name, &row.user_id));
            users.len() - 1
        });
        users[position].add_tool(row.tool_id, row.date, row.level);
    }
}

pub struct Certification;

impl Certification {
    pub async fn add_certification(
        pool: &SqlitePool,
        barcode: &str,
        tool_id: i64,
        level: CertificationLevel,
        date: NaiveDateTime,
        certifier: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO certifications (user_id, tool_id, certifier_id, date, level)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(barcode)
        .bind(tool_id)
        .bind(certifier)
        .bind(date)
        .bind(level.value())
        .execute(pool)
        .await?;

        tracing::info!(barcode = %barcode, tool_id, level = level.name(), certifier = %certifier, "Certification added");
        Ok(())
    }

    pub async fn add_new_certification(
        pool: &SqlitePool,
        barcode: &str,
        tool_id: i64,
        level: CertificationLevel,
        certifier: &str,
    ) -> Result<(), sqlx::Error> {
        Self::add_certification(pool, barcode, tool_id, level, now(), certifier).await
    }

    pub async fn get_all_user_list(pool: &SqlitePool) -> Result<Vec<ToolUser>, sqlx::Error> {
        let rows = sqlx::query_as::<_, CertificationRow>(
            r#"
            SELECT c.user_id, c.tool_id, c.date, c.level, cm.display_name
            FROM certifications c
            INNER JOIN current_members cm ON cm.barcode = c.user_id
            ORDER BY cm.display_name
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut users = Vec::new();
        collect_users(&mut users, rows);
        Ok(users)
    }

    pub async fn get_in_building_user_list(pool: &SqlitePool) -> Result<Vec<ToolUser>, sqlx::Error> {
        let rows = sqlx::query_as::<_, CertificationRow>(
            r#"
            SELECT c.user_id, c.tool_id, c.date, c.level, m.display_name
            FROM certifications c
            INNER JOIN members m ON c.user_id = m.barcode
            INNER JOIN visits v ON m.barcode = v.barcode
            WHERE v.status = 'In'
            ORDER BY m.display_name
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut users = Vec::new();
        collect_users(&mut users, rows);
        Ok(users)
    }

    /// Every roster member, certified or not, coaches first.
    pub async fn get_team_user_list(pool: &SqlitePool, team_id: i64) -> Result<Vec<ToolUser>, sqlx::Error> {
        let roster = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT tm.barcode, m.display_name
            FROM team_members tm
            INNER JOIN members m ON tm.barcode = m.barcode
            WHERE tm.team_id = ?
            ORDER BY tm.type DESC, m.display_name ASC
            "#,
        )
        .bind(team_id)
        .fetch_all(pool)
        .await?;

        let rows = sqlx::query_as::<_, CertificationRow>(
            r#"
            SELECT c.user_id, c.tool_id, c.date, c.level, m.display_name
            FROM certifications c
            INNER JOIN members m ON c.user_id = m.barcode
            INNER JOIN team_members tm ON m.barcode = tm.barcode
            WHERE tm.team_id = ?
            "#,
        )
        .bind(team_id)
        .fetch_all(pool)
        .await?;

        let mut users: Vec<ToolUser> = roster
            .iter()
            .map(|(barcode, name)| ToolUser::new(name, barcode))
            .collect();
        collect_users(&mut users, rows);
        Ok(users)
    }

    pub async fn get_user_list(pool: &SqlitePool, barcode: &str) -> Result<Vec<ToolUser>, sqlx::Error> {
        let rows = sqlx::query_as::<_, CertificationRow>(
            r#"
            SELECT c.user_id, c.tool_id, c.date, c.level, m.display_name
            FROM certifications c
            INNER JOIN members m ON c.user_id = m.barcode
            WHERE c.user_id = ?
            "#,
        )
        .bind(barcode)
        .fetch_all(pool)
        .await?;

        let mut users = Vec::new();
        collect_users(&mut users, rows);
        Ok(users)
    }

    pub async fn get_all_tools(pool: &SqlitePool) -> Result<Vec<Tool>, sqlx::Error> {
        sqlx::query_as::<_, Tool>(
            r#"
            SELECT id, name, grouping FROM tools ORDER BY grouping, id ASC
            "#,
        )
        .fetch_all(pool)
        .await
    }

    /// Tools named by an underscore separated id list such as `1_2_3`,
    /// in the usual grouping order.
    pub async fn get_tools_from_list(pool: &SqlitePool, input: &str) -> Result<Vec<Tool>, sqlx::Error> {
        let wanted: Vec<&str> = input.split('_').map(str::trim).collect();

        Ok(Self::get_all_tools(pool)
            .await?
            .into_iter()
            .filter(|tool| wanted.contains(&tool.id.to_string().as_str()))
            .collect())
    }

    /// Tools this member may certify others on.
    pub async fn get_list_certify_tools(pool: &SqlitePool, barcode: &str) -> Result<Vec<Tool>, sqlx::Error> {
        sqlx::query_as::<_, Tool>(
            r#"
            SELECT DISTINCT t.id, t.name, t.grouping FROM certifications c
            INNER JOIN tools t ON c.tool_id = t.id
            WHERE c.user_id = ? AND c.level >= ?
            ORDER BY t.name ASC
            "#,
        )
        .bind(barcode)
        .bind(CertificationLevel::Certifier.value())
        .fetch_all(pool)
        .await
    }

    pub async fn get_tool_name(pool: &SqlitePool, tool_id: i64) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT name FROM tools WHERE id = ?")
            .bind(tool_id)
            .fetch_optional(pool)
            .await
    }
}
