use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, FromRow, Row, SqlitePool, TypeInfo, ValueRef};

/// A saved SQL report.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Report {
    pub report_id: i64,
    pub name: String,
    pub sql_text: String,
    pub parameters: String,
    pub active: bool,
}

/// Result of an ad-hoc query, every value already rendered as text.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A saved report together with its freshly computed results.
#[derive(Debug, Clone, Serialize)]
pub struct ReportOutput {
    pub title: String,
    pub sql: String,
    pub table: Option<QueryTable>,
}

fn value_to_string(row: &SqliteRow, index: usize) -> String {
    let Ok(raw) = row.try_get_raw(index) else {
        return String::new();
    };

    if raw.is_null() {
        return String::new();
    }

    let type_name = raw.type_info().name().to_string();
    match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row
            .try_get::<i64, _>(index)
            .map(|v| v.to_string())
            .unwrap_or_default(),
        "REAL" => row
            .try_get::<f64, _>(index)
            .map(|v| v.to_string())
            .unwrap_or_default(),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|v| format!("<{} bytes>", v.len()))
            .unwrap_or_default(),
        _ => row.try_get::<String, _>(index).unwrap_or_default(),
    }
}

impl Report {
    /// Runs arbitrary SQL. Callers pass the read-only pool so a report can
    /// never change data.
    pub async fn custom_sql(read_only: &SqlitePool, sql: &str) -> Result<QueryTable, sqlx::Error> {
        let rows = sqlx::query(sql).fetch_all(read_only).await?;

        let header = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => read_only
                .describe(sql)
                .await?
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        };

        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|i| value_to_string(row, i)).collect())
            .collect();

        Ok(QueryTable { header, rows })
    }

    pub async fn find(pool: &SqlitePool, report_id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT report_id, name, sql_text, parameters, active FROM reports WHERE report_id = ?
            "#,
        )
        .bind(report_id)
        .fetch_optional(pool)
        .await
    }

    /// Runs a saved report. A missing report comes back as a title carrying
    /// the error and no table.
    pub async fn custom_report(
        pool: &SqlitePool,
        read_only: &SqlitePool,
        report_id: i64,
    ) -> Result<ReportOutput, sqlx::Error> {
        let Some(report) = Self::find(pool, report_id).await? else {
            return Ok(ReportOutput {
                title: format!("Couldn't find report with report_id '{}'.", report_id),
                sql: String::new(),
                table: None,
            });
        };

        let table = Self::custom_sql(read_only, &report.sql_text).await?;

        Ok(ReportOutput {
            title: report.name,
            sql: report.sql_text,
            table: Some(table),
        })
    }

    /// Saves a report. The inner error is the message for a duplicate name.
    pub async fn save_custom_sql(
        pool: &SqlitePool,
        sql: &str,
        name: &str,
    ) -> Result<std::result::Result<i64, String>, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO reports (name, sql_text, parameters, active) VALUES (?, ?, '', 1)
            "#,
        )
        .bind(name)
        .bind(sql)
        .execute(pool)
        .await;

        match result {
            Ok(done) => {
                tracing::info!(name = %name, "Report saved");
                Ok(Ok(done.last_insert_rowid()))
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Ok(Err(format!("Report already exists with name '{}'.", name)))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn delete(pool: &SqlitePool, report_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM reports WHERE report_id = ?")
            .bind(report_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn get_report_list(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT report_id, name, sql_text, parameters, active FROM reports
            WHERE active = 1
            ORDER BY name
            "#,
        )
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_custom_sql_stringifies_values() {
        let pool = test_pool().await;

        let table = Report::custom_sql(&pool, "SELECT id, name, 1.5 AS ratio, NULL AS empty FROM tools WHERE id = 10")
            .await
            .unwrap();

        assert_eq!(table.header, vec!["id", "name", "ratio", "empty"]);
        assert_eq!(table.rows, vec![vec!["10", "Sander", "1.5", ""]]);
    }

    #[tokio::test]
    async fn test_custom_sql_empty_result_keeps_header() {
        let pool = test_pool().await;

        let table = Report::custom_sql(&pool, "SELECT id, name FROM tools WHERE id < 0").await.unwrap();

        assert_eq!(table.header, vec!["id", "name"]);
        assert!(table.rows.is_empty());
    }

    #[tokio::test]
    async fn test_custom_sql_error() {
        let pool = test_pool().await;

        assert!(Report::custom_sql(&pool, "SELECT * FROM nowhere").await.is_err());
    }

    #[tokio::test]
    async fn test_save_and_run_report() {
        let pool = test_pool().await;

        let report_id = Report::save_custom_sql(&pool, "SELECT COUNT(*) AS tools FROM tools", "Tool count")
            .await
            .unwrap()
            .unwrap();
        let duplicate = Report::save_custom_sql(&pool, "SELECT 1", "Tool count").await.unwrap();
        assert_eq!(duplicate, Err("Report already exists with name 'Tool count'.".to_string()));

        let output = Report::custom_report(&pool, &pool, report_id).await.unwrap();
        assert_eq!(output.title, "Tool count");
        assert_eq!(output.table.unwrap().rows, vec![vec!["19"]]);

        let missing = Report::custom_report(&pool, &pool, 999).await.unwrap();
        assert_eq!(missing.title, "Couldn't find report with report_id '999'.");
        assert!(missing.table.is_none());

        assert_eq!(Report::get_report_list(&pool).await.unwrap().len(), 1);
        assert_eq!(Report::delete(&pool, report_id).await.unwrap(), 1);
    }
}
