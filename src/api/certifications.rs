use askama::Template;
use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::get,
    Form, Router,
};
use serde::Deserialize;
use tower_sessions::Session;

use crate::api::middleware::auth::require_role;
use crate::api::middleware::session::AppState;
use crate::error::{AppError, Result};
use crate::models::certification::{Tool, ToolUser};
use crate::models::visit::PresentMember;
use crate::models::{Certification, CertificationLevel, Member, Role, Team, Visit};

/// Tools shown on the shop monitor when none are asked for.
const DEFAULT_MONITOR_TOOLS: &str = "1_2_3_4";

#[derive(Template)]
#[template(path = "certifications/grid.html")]
struct GridTemplate {
    title: String,
    tools: Vec<Tool>,
    users: Vec<ToolUser>,
    show_table_header: bool,
    show_left_names: bool,
}

#[derive(Template)]
#[template(path = "certifications/certify.html")]
struct CertifyTemplate {
    tools: Vec<Tool>,
    members: Vec<PresentMember>,
    levels: Vec<(i64, &'static str)>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    barcode: String,
}

#[derive(Debug, Deserialize)]
struct MonitorQuery {
    tools: Option<String>,
    start_row: Option<usize>,
    show_table_header: Option<bool>,
    show_left_names: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CertifyQuery {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CertifyForm {
    member_id: String,
    tool_id: i64,
    level: i64,
}

fn grid(title: String, tools: Vec<Tool>, users: Vec<ToolUser>) -> GridTemplate {
    GridTemplate {
        title,
        tools,
        users,
        show_table_header: true,
        show_left_names: true,
    }
}

async fn in_building(State(state): State<AppState>) -> Result<GridTemplate> {
    Ok(grid(
        "Certifications of people in the building".to_string(),
        Certification::get_all_tools(&state.pool).await?,
        Certification::get_in_building_user_list(&state.pool).await?,
    ))
}

async fn all(State(state): State<AppState>) -> Result<GridTemplate> {
    Ok(grid(
        "Certifications of all members".to_string(),
        Certification::get_all_tools(&state.pool).await?,
        Certification::get_all_user_list(&state.pool).await?,
    ))
}

async fn team(State(state): State<AppState>, Path(team_id): Path<i64>) -> Result<GridTemplate> {
    let name = Team::team_name_from_id(&state.pool, team_id).await?;
    if name.is_empty() {
        return Err(AppError::NotFound(format!("Team {}", team_id)));
    }

    Ok(grid(
        format!("Certifications of {}", name),
        Certification::get_all_tools(&state.pool).await?,
        Certification::get_team_user_list(&state.pool, team_id).await?,
    ))
}

async fn user(State(state): State<AppState>, Query(params): Query<UserQuery>) -> Result<GridTemplate> {
    let name = match Member::get_name(&state.pool, &params.barcode).await? {
        Ok(name) => name,
        Err(message) => return Err(AppError::NotFound(message)),
    };

    Ok(grid(
        format!("Certifications of {}", name),
        Certification::get_all_tools(&state.pool).await?,
        Certification::get_user_list(&state.pool, &params.barcode).await?,
    ))
}

/// Shop TV view: a subset of tools for the people in the building, paged by
/// start row.
async fn monitor(State(state): State<AppState>, Query(params): Query<MonitorQuery>) -> Result<GridTemplate> {
    let tools = Certification::get_tools_from_list(
        &state.pool,
        params.tools.as_deref().unwrap_or(DEFAULT_MONITOR_TOOLS),
    )
    .await?;
    let users = Certification::get_in_building_user_list(&state.pool)
        .await?
        .into_iter()
        .skip(params.start_row.unwrap_or(0))
        .collect();

    Ok(GridTemplate {
        title: "Monitor".to_string(),
        tools,
        users,
        show_table_header: params.show_table_header.unwrap_or(true),
        show_left_names: params.show_left_names.unwrap_or(true),
    })
}

async fn certify_page(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<CertifyQuery>,
) -> Result<CertifyTemplate> {
    let user = require_role(&session, "/certifications/certify", Role::CERTIFIER).await?;

    Ok(CertifyTemplate {
        tools: Certification::get_list_certify_tools(&state.pool, &user.barcode).await?,
        members: Visit::get_members_in_building(&state.pool).await?,
        levels: CertificationLevel::ALL
            .into_iter()
            .map(|level| (level.value(), level.name()))
            .collect(),
        message: params.message.unwrap_or_default(),
    })
}

async fn add_certification(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CertifyForm>,
) -> Result<Redirect> {
    let user = require_role(&session, "/certifications/certify", Role::CERTIFIER).await?;

    let level = CertificationLevel::from_value(form.level)
        .ok_or_else(|| AppError::Validation(format!("Unknown certification level {}", form.level)))?;

    let allowed = Certification::get_list_certify_tools(&state.pool, &user.barcode)
        .await?
        .iter()
        .any(|tool| tool.id == form.tool_id);
    if !allowed {
        return Err(AppError::Validation("You can not certify on that tool".to_string()));
    }

    Certification::add_new_certification(&state.pool, &form.member_id, form.tool_id, level, &user.barcode).await?;

    let member = Member::get_name(&state.pool, &form.member_id).await?.unwrap_or_else(|e| e);
    let certifier = Member::get_name(&state.pool, &user.barcode).await?.unwrap_or_default();
    let tool = Certification::get_tool_name(&state.pool, form.tool_id).await?.unwrap_or_default();
    state
        .mailer
        .send(
            "Shop Certifiers",
            &state.config.certifiers_email,
            "New Certification",
            &format!("{} certified {} on {} at level {}", certifier, member, tool, level.name()),
        )
        .await;

    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("message", &format!("{} certified on {}", member, tool))
        .finish();
    Ok(Redirect::to(&format!("/certifications/certify?{}", query)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/certifications", get(in_building))
        .route("/certifications/all", get(all))
        .route("/certifications/team/:team_id", get(team))
        .route("/certifications/user", get(user))
        .route("/certifications/monitor", get(monitor))
        .route("/certifications/certify", get(certify_page).post(add_certification))
}
