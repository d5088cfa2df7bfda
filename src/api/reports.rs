use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tower_sessions::Session;

use crate::api::middleware::auth::require_role;
use crate::api::middleware::session::AppState;
use crate::api::parse_date;
use crate::error::{AppError, Result};
use crate::models::report::{QueryTable, Report};
use crate::models::{Guest, Member, Role};
use crate::services::contact_tracing::{self, TracedVisit};
use crate::services::reports::{self, Transaction};
use crate::services::statistics::{Statistics, FIRST_HOUR, LAST_HOUR};
use crate::services::usage_graph;

const RECENT_GUEST_DAYS: i64 = 7;
const MAX_REPORT_DAYS: i64 = 366;

#[derive(Template)]
#[template(path = "reports/index.html")]
struct ReportsTemplate {
    reports: Vec<Report>,
    transactions: Vec<Transaction>,
    unique_today: i64,
    earliest_date: String,
    recent_guests: Vec<Guest>,
}

#[derive(Template)]
#[template(path = "reports/statistics.html")]
struct StatisticsTemplate {
    stats: Statistics,
}

#[derive(Template)]
#[template(path = "reports/custom.html")]
struct CustomTemplate {
    title: String,
    sql: String,
    table: Option<QueryTable>,
    error: String,
}

#[derive(Template)]
#[template(path = "reports/tracing.html")]
struct TracingTemplate {
    name: String,
    num_days: i64,
    visits: Vec<TracedVisit>,
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    start_date: String,
    end_date: String,
}

#[derive(Debug, Deserialize)]
struct SqlForm {
    sql: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct TracingQuery {
    barcode: String,
    num_days: i64,
}

/// Report window, at most a year long.
fn range(params: &RangeQuery) -> Result<(NaiveDate, NaiveDate)> {
    let (begin, end) = (parse_date(&params.start_date)?, parse_date(&params.end_date)?);

    if end < begin {
        return Err(AppError::Validation("End date is before start date".to_string()));
    }
    if (end - begin).num_days() >= MAX_REPORT_DAYS {
        return Err(AppError::Validation(format!(
            "Reports cover at most {} days",
            MAX_REPORT_DAYS
        )));
    }

    Ok((begin, end))
}

async fn index(State(state): State<AppState>, session: Session) -> Result<ReportsTemplate> {
    require_role(&session, "/reports", Role::ADMIN).await?;

    Ok(ReportsTemplate {
        reports: Report::get_report_list(&state.pool).await?,
        transactions: reports::transactions_today(&state.pool).await?,
        unique_today: reports::unique_visitors_today(&state.pool).await?,
        earliest_date: reports::get_earliest_date(&state.pool)
            .await?
            .map(|date| date.to_string())
            .unwrap_or_default(),
        recent_guests: Guest::guests_last_in_building(&state.pool, RECENT_GUEST_DAYS).await?,
    })
}

async fn standard(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<RangeQuery>,
) -> Result<StatisticsTemplate> {
    require_role(&session, "/reports", Role::ADMIN).await?;

    let (begin, end) = range(&params)?;
    Ok(StatisticsTemplate {
        stats: Statistics::load(&state.pool, begin, end).await?,
    })
}

async fn graph(State(state): State<AppState>, session: Session, Query(params): Query<RangeQuery>) -> Result<Response> {
    require_role(&session, "/reports", Role::ADMIN).await?;

    let (begin, end) = range(&params)?;
    let stats = Statistics::load(&state.pool, begin, end).await?;
    let png = usage_graph::render_usage_png(&stats.building_usage(), (LAST_HOUR - FIRST_HOUR) as usize)?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// Runs typed-in SQL on the read-only pool. SQL errors are shown in the page.
async fn custom_sql(State(state): State<AppState>, session: Session, Form(form): Form<SqlForm>) -> Result<CustomTemplate> {
    require_role(&session, "/reports", Role::ADMIN).await?;

    let mut page = CustomTemplate {
        title: "Custom SQL".to_string(),
        sql: form.sql.clone(),
        table: None,
        error: String::new(),
    };

    match Report::custom_sql(&state.read_only_pool, &form.sql).await {
        Ok(table) => page.table = Some(table),
        Err(e) => {
            tracing::info!(error = %e, "Custom SQL failed");
            page.error = e.to_string();
            return Ok(page);
        }
    }

    if !form.name.trim().is_empty() {
        match Report::save_custom_sql(&state.pool, &form.sql, form.name.trim()).await? {
            Ok(_) => page.title = form.name.trim().to_string(),
            Err(message) => page.error = message,
        }
    }

    Ok(page)
}

async fn saved(State(state): State<AppState>, session: Session, Path(report_id): Path<i64>) -> Result<CustomTemplate> {
    require_role(&session, "/reports", Role::ADMIN).await?;

    match Report::custom_report(&state.pool, &state.read_only_pool, report_id).await {
        Ok(output) => Ok(CustomTemplate {
            title: output.title,
            sql: output.sql,
            table: output.table,
            error: String::new(),
        }),
        Err(e) => Ok(CustomTemplate {
            title: format!("Report {}", report_id),
            sql: String::new(),
            table: None,
            error: e.to_string(),
        }),
    }
}

async fn delete(State(state): State<AppState>, session: Session, Path(report_id): Path<i64>) -> Result<Redirect> {
    require_role(&session, "/reports", Role::ADMIN).await?;

    Report::delete(&state.pool, report_id).await?;
    Ok(Redirect::to("/reports"))
}

async fn tracing_page(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<TracingQuery>,
) -> Result<TracingTemplate> {
    require_role(&session, "/reports", Role::ADMIN).await?;

    let name = Member::get_name(&state.pool, &params.barcode)
        .await?
        .unwrap_or_else(|e| e);

    Ok(TracingTemplate {
        name,
        num_days: params.num_days,
        visits: contact_tracing::get_dict_visits(&state.pool, &params.barcode, params.num_days).await?,
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reports", get(index))
        .route("/reports/standard", get(standard))
        .route("/reports/graph", get(graph))
        .route("/reports/custom_sql", post(custom_sql))
        .route("/reports/saved/:report_id", get(saved))
        .route("/reports/saved/:report_id/delete", post(delete))
        .route("/reports/tracing", get(tracing_page))
}
