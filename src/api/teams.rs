use askama::Template;
use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::{get, post},
    Form, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tower_sessions::Session;

use crate::api::middleware::auth::{require_role, CurrentUser};
use crate::api::middleware::session::{AppState, SESSION_KEY_SOURCE};
use crate::api::{form_value, form_values, parse_date, parse_time};
use crate::error::{AppError, Result};
use crate::models::team::{TeamInfo, TeamMember};
use crate::models::{Role, Team, TeamMemberType};
use crate::services::engine;

#[derive(Template)]
#[template(path = "teams/index.html")]
struct TeamsTemplate {
    is_admin: bool,
    message: String,
    teams: Vec<TeamInfo>,
    inactive: Vec<TeamInfo>,
}

#[derive(Template)]
#[template(path = "teams/show.html")]
struct TeamTemplate {
    team: TeamInfo,
    members: Vec<TeamMember>,
    seasons: Vec<TeamInfo>,
    message: String,
}

#[derive(Template)]
#[template(path = "teams/attendance.html")]
struct AttendanceTemplate {
    team: TeamInfo,
    date: NaiveDate,
    start_time: String,
    end_time: String,
    present: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateTeamForm {
    program_name: String,
    program_number: i64,
    #[serde(default)]
    team_name: String,
    start_date: String,
}

#[derive(Debug, Deserialize)]
struct EditTeamForm {
    program_name: String,
    program_number: i64,
    start_date: String,
}

#[derive(Debug, Deserialize)]
struct RenameForm {
    new_name: String,
}

#[derive(Debug, Deserialize)]
struct AddMemberForm {
    barcode: String,
    member_type: i64,
}

#[derive(Debug, Deserialize)]
struct RemoveMemberForm {
    barcode: String,
}

#[derive(Debug, Deserialize)]
struct AttendanceQuery {
    date: String,
    start_time: String,
    end_time: String,
}

fn with_message(path: &str, message: &str) -> Redirect {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("message", message)
        .finish();
    Redirect::to(&format!("{}?{}", path, query))
}

async fn load_team(state: &AppState, team_id: i64) -> Result<TeamInfo> {
    Team::from_team_id(&state.pool, team_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Team {}", team_id)))
}

/// Admins may manage any team; coaches only the teams they coach.
async fn require_team_access(state: &AppState, session: &Session, team_id: i64) -> Result<CurrentUser> {
    let source = format!("/teams/{}", team_id);
    let user = require_role(session, &source, Role::ADMIN | Role::COACH).await?;

    if user.role.is_admin() || Team::is_coach_of_team(&state.pool, team_id, &user.barcode).await? {
        return Ok(user);
    }

    tracing::info!(username = %user.username, team_id, "Not a coach of this team");
    session.insert(SESSION_KEY_SOURCE, source).await?;
    Err(AppError::LoginRequired)
}

async fn index(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<MessageQuery>,
) -> Result<TeamsTemplate> {
    let user = require_role(&session, "/teams", Role::ADMIN | Role::COACH).await?;
    let is_admin = user.role.is_admin();

    let (teams, inactive) = if is_admin {
        (
            Team::get_active_team_list(&state.pool).await?,
            Team::get_inactive_team_list(&state.pool).await?,
        )
    } else {
        (Team::get_active_teams_coached(&state.pool, &user.barcode).await?, Vec::new())
    };

    Ok(TeamsTemplate {
        is_admin,
        message: params.message.unwrap_or_default(),
        teams,
        inactive,
    })
}

async fn create(State(state): State<AppState>, session: Session, Form(form): Form<CreateTeamForm>) -> Result<Redirect> {
    require_role(&session, "/teams", Role::ADMIN).await?;

    let start_date = parse_date(&form.start_date)?;
    match Team::create_team(&state.pool, &form.program_name, form.program_number, &form.team_name, start_date).await? {
        Ok(team_id) => Ok(Redirect::to(&format!("/teams/{}", team_id))),
        Err(message) => Ok(with_message("/teams", &message)),
    }
}

async fn show(
    State(state): State<AppState>,
    session: Session,
    Path(team_id): Path<i64>,
    Query(params): Query<MessageQuery>,
) -> Result<TeamTemplate> {
    require_team_access(&state, &session, team_id).await?;
    let team = load_team(&state, team_id).await?;

    Ok(TeamTemplate {
        members: Team::get_team_members(&state.pool, team_id).await?,
        seasons: Team::get_all_seasons(&state.pool, &team).await?,
        message: params.message.unwrap_or_default(),
        team,
    })
}

async fn edit(
    State(state): State<AppState>,
    session: Session,
    Path(team_id): Path<i64>,
    Form(form): Form<EditTeamForm>,
) -> Result<Redirect> {
    require_role(&session, &format!("/teams/{}", team_id), Role::ADMIN).await?;

    let start_date = parse_date(&form.start_date)?;
    Team::edit_team(&state.pool, team_id, &form.program_name, form.program_number, start_date).await?;
    Ok(Redirect::to(&format!("/teams/{}", team_id)))
}

async fn rename(
    State(state): State<AppState>,
    session: Session,
    Path(team_id): Path<i64>,
    Form(form): Form<RenameForm>,
) -> Result<Redirect> {
    require_team_access(&state, &session, team_id).await?;

    Team::rename_team(&state.pool, team_id, form.new_name.trim()).await?;
    Ok(Redirect::to(&format!("/teams/{}", team_id)))
}

async fn activate(State(state): State<AppState>, session: Session, Path(team_id): Path<i64>) -> Result<Redirect> {
    require_role(&session, "/teams", Role::ADMIN).await?;

    Team::activate_team(&state.pool, team_id).await?;
    Ok(Redirect::to("/teams"))
}

async fn deactivate(State(state): State<AppState>, session: Session, Path(team_id): Path<i64>) -> Result<Redirect> {
    require_role(&session, "/teams", Role::ADMIN).await?;

    Team::deactivate_team(&state.pool, team_id).await?;
    Ok(Redirect::to("/teams"))
}

async fn delete(State(state): State<AppState>, session: Session, Path(team_id): Path<i64>) -> Result<Redirect> {
    require_role(&session, "/teams", Role::ADMIN).await?;

    let name = Team::team_name_from_id(&state.pool, team_id).await?;
    Team::delete_team(&state.pool, team_id).await?;
    Ok(with_message("/teams", &format!("Team {} deleted", name)))
}

async fn add_member(
    State(state): State<AppState>,
    session: Session,
    Path(team_id): Path<i64>,
    Form(form): Form<AddMemberForm>,
) -> Result<Redirect> {
    require_team_access(&state, &session, team_id).await?;

    Team::add_member(
        &state.pool,
        team_id,
        form.barcode.trim(),
        TeamMemberType::from_value(form.member_type),
    )
    .await?;
    Ok(Redirect::to(&format!("/teams/{}", team_id)))
}

async fn remove_member(
    State(state): State<AppState>,
    session: Session,
    Path(team_id): Path<i64>,
    Form(form): Form<RemoveMemberForm>,
) -> Result<Redirect> {
    require_team_access(&state, &session, team_id).await?;

    Team::remove_member(&state.pool, team_id, &form.barcode).await?;
    Ok(Redirect::to(&format!("/teams/{}", team_id)))
}

/// Starts the next season with the ticked members carried over.
async fn new_season(
    State(state): State<AppState>,
    session: Session,
    Path(team_id): Path<i64>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Result<Redirect> {
    require_team_access(&state, &session, team_id).await?;
    let team = load_team(&state, team_id).await?;

    let start_date = parse_date(&form_value(&pairs, "start_date").unwrap_or_default())?;
    let returning: Vec<String> = form_values(&pairs, "returning");
    let roster = Team::get_team_members(&state.pool, team_id).await?;
    let carried: Vec<(String, TeamMemberType)> = roster
        .into_iter()
        .filter(|member| returning.contains(&member.barcode))
        .map(|member| {
            let kind = member.kind();
            (member.barcode, kind)
        })
        .collect();

    match Team::new_season(&state.pool, &team, start_date, &carried).await? {
        Ok(new_id) => Ok(Redirect::to(&format!("/teams/{}", new_id))),
        Err(message) => Ok(with_message(&format!("/teams/{}", team_id), &message)),
    }
}

/// Bulk check in/out from the roster. When the keyholder asks to leave they
/// are sent to the keyholder page to hand over.
async fn checkin(
    State(state): State<AppState>,
    session: Session,
    Path(team_id): Path<i64>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Result<Redirect> {
    require_team_access(&state, &session, team_id).await?;

    let leaving = engine::bulk_checkout(
        &state.pool,
        &form_values(&pairs, "checkin"),
        &form_values(&pairs, "checkout"),
    )
    .await?;
    state.updates.publish("teams");

    if leaving.is_empty() {
        Ok(Redirect::to(&format!("/teams/{}", team_id)))
    } else {
        Ok(Redirect::to("/station/keyholder"))
    }
}

async fn attendance(
    State(state): State<AppState>,
    session: Session,
    Path(team_id): Path<i64>,
    Query(params): Query<AttendanceQuery>,
) -> Result<AttendanceTemplate> {
    require_team_access(&state, &session, team_id).await?;
    let team = load_team(&state, team_id).await?;

    let date = parse_date(&params.date)?;
    let start = date.and_time(parse_time(&params.start_time)?);
    let end = date.and_time(parse_time(&params.end_time)?);

    Ok(AttendanceTemplate {
        present: crate::services::reports::which_team_members_here(&state.pool, team_id, start, end).await?,
        team,
        date,
        start_time: params.start_time,
        end_time: params.end_time,
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/teams", get(index))
        .route("/teams/create", post(create))
        .route("/teams/:team_id", get(show))
        .route("/teams/:team_id/edit", post(edit))
        .route("/teams/:team_id/rename", post(rename))
        .route("/teams/:team_id/activate", post(activate))
        .route("/teams/:team_id/deactivate", post(deactivate))
        .route("/teams/:team_id/delete", post(delete))
        .route("/teams/:team_id/add_member", post(add_member))
        .route("/teams/:team_id/remove_member", post(remove_member))
        .route("/teams/:team_id/new_season", post(new_season))
        .route("/teams/:team_id/checkin", post(checkin))
        .route("/teams/:team_id/attendance", get(attendance))
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{body_text, get_with_cookie, location, login, post_form_with_cookie, test_state};
    use crate::models::account::tests::pool_with_keyholders;
    use crate::models::{Team, TeamMemberType, Visit};
    use axum::http::StatusCode;
    use chrono::NaiveDate;

    async fn team_with_coach(pool: &sqlx::SqlitePool) -> i64 {
        let team_id = Team::create_team(pool, "frc", 1234, "Robots", NaiveDate::from_ymd_opt(2024, 1, 6).unwrap())
            .await
            .unwrap()
            .unwrap();
        Team::add_member(pool, team_id, "100032", TeamMemberType::Coach).await.unwrap();
        Team::add_member(pool, team_id, "100015", TeamMemberType::Student).await.unwrap();
        team_id
    }

    #[tokio::test]
    async fn test_admin_creates_team() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "nick", "password").await;

        let response = post_form_with_cookie(
            &state,
            "/teams/create",
            "program_name=ftc&program_number=42&team_name=&start_date=2024-09-01",
            &cookie,
        )
        .await;

        assert!(location(&response).starts_with("/teams/"));
        let body = body_text(get_with_cookie(&state, "/teams", &cookie).await).await;
        assert!(body.contains("TBD:FTC42"));

        let duplicate = post_form_with_cookie(
            &state,
            "/teams/create",
            "program_name=FTC&program_number=42&team_name=x&start_date=2024-09-01",
            &cookie,
        )
        .await;
        assert!(location(&duplicate).contains("Team+name+already+exists"));
    }

    #[tokio::test]
    async fn test_coach_sees_only_own_team() {
        let state = test_state(pool_with_keyholders().await);
        let team_id = team_with_coach(&state.pool).await;
        let other = Team::create_team(&state.pool, "FLL", 7, "Bricks", NaiveDate::from_ymd_opt(2024, 1, 6).unwrap())
            .await
            .unwrap()
            .unwrap();
        let cookie = login(&state, "cory", "password").await;

        let own = get_with_cookie(&state, &format!("/teams/{}", team_id), &cookie).await;
        assert_eq!(own.status(), StatusCode::OK);
        assert!(body_text(own).await.contains("Fran F"));

        let theirs = get_with_cookie(&state, &format!("/teams/{}", other), &cookie).await;
        assert_eq!(location(&theirs), "/profile/login");
    }

    #[tokio::test]
    async fn test_roster_checkin() {
        let state = test_state(pool_with_keyholders().await);
        let team_id = team_with_coach(&state.pool).await;
        let cookie = login(&state, "cory", "password").await;

        post_form_with_cookie(
            &state,
            &format!("/teams/{}/checkin", team_id),
            "checkin=100015&checkin=100032",
            &cookie,
        )
        .await;

        assert!(Visit::in_building(&state.pool, "100015").await.unwrap());
        assert!(Visit::in_building(&state.pool, "100032").await.unwrap());
    }

    #[tokio::test]
    async fn test_new_season_carries_members() {
        let state = test_state(pool_with_keyholders().await);
        let team_id = team_with_coach(&state.pool).await;
        let cookie = login(&state, "nick", "password").await;

        let response = post_form_with_cookie(
            &state,
            &format!("/teams/{}/new_season", team_id),
            "start_date=2025-01-04&returning=100032",
            &cookie,
        )
        .await;

        let new_id: i64 = location(&response).trim_start_matches("/teams/").parse().unwrap();
        let members = Team::get_team_members(&state.pool, new_id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].kind(), TeamMemberType::Coach);
    }
}
