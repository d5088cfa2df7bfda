use askama::Template;
use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Redirect,
    },
    routing::{get, post},
    Form, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tower_sessions::Session;

use crate::api::form_values;
use crate::api::middleware::auth::{current_user, require_role};
use crate::api::middleware::session::AppState;
use crate::error::Result;
use crate::models::team::TeamInfo;
use crate::models::{Account, Member, Role, Team, Unlock, Visit};
use crate::services::engine;
use crate::services::reports::{self, PersonInBuilding};

#[derive(Template)]
#[template(path = "links.html")]
struct LinksTemplate {
    name: String,
    role: Role,
    in_building: bool,
    number_present: i64,
    teams: Vec<TeamInfo>,
}

#[derive(Template)]
#[template(path = "who_is_here.html")]
struct WhoIsHereTemplate {
    keyholder: String,
    can_check_out: bool,
    people: Vec<PersonInBuilding>,
}

#[derive(Debug, Deserialize)]
struct LinksQuery {
    barcode: Option<String>,
}

/// Landing page; with a barcode, the pages that member can use. Role links
/// only show for the logged-in user's own barcode.
async fn links(
    State(state): State<AppState>,
    Query(params): Query<LinksQuery>,
    session: Session,
) -> Result<LinksTemplate> {
    let user = current_user(&session).await?;
    let barcode = match params.barcode.filter(|bc| !bc.trim().is_empty()) {
        Some(barcode) => Some(barcode.trim().to_string()),
        None => user.as_ref().map(|user| user.barcode.clone()),
    };

    let mut page = LinksTemplate {
        name: String::new(),
        role: Role::empty(),
        in_building: false,
        number_present: reports::number_present(&state.pool).await?,
        teams: Vec::new(),
    };

    if let Some(barcode) = barcode {
        page.name = Member::get_name(&state.pool, &barcode).await?.unwrap_or_default();
        page.in_building = Visit::in_building(&state.pool, &barcode).await?;

        if let Some(user) = user.filter(|user| user.barcode == barcode) {
            page.role = user.role;
            page.teams = Team::get_active_teams_coached(&state.pool, &barcode).await?;
        }
    }

    Ok(page)
}

async fn who_is_here(State(state): State<AppState>, session: Session) -> Result<WhoIsHereTemplate> {
    let keyholder = Account::get_active_key_holder(&state.pool)
        .await?
        .map(|kh| kh.display_name)
        .unwrap_or_default();

    Ok(WhoIsHereTemplate {
        keyholder,
        can_check_out: current_user(&session)
            .await?
            .is_some_and(|user| user.role.is_keyholder()),
        people: reports::who_is_here(&state.pool).await?,
    })
}

/// Checks out the ticked people. Keyholders only; the active keyholder stays
/// in until relieved.
async fn checkout_who_is_here(
    State(state): State<AppState>,
    session: Session,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Result<Redirect> {
    let user = require_role(&session, "/whoishere", Role::KEYHOLDER).await?;

    let check_outs = form_values(&pairs, "checkout");
    let keyholder = Account::get_active_key_holder(&state.pool)
        .await?
        .map(|kh| kh.barcode)
        .unwrap_or_default();

    let leaving = engine::checkout(&state.pool, &keyholder, &check_outs).await?;
    state.updates.publish("checkout");
    tracing::info!(by = %user.username, count = check_outs.len(), "Checked out from who is here");

    if leaving.is_empty() {
        Ok(Redirect::to("/whoishere"))
    } else {
        Ok(Redirect::to("/station/keyholder"))
    }
}

async fn metrics(State(state): State<AppState>) -> Result<String> {
    let present = reports::number_present(&state.pool).await?;
    let unique_today = reports::unique_visitors_today(&state.pool).await?;

    Ok(format!(
        "checkmein_people_in_building {}\ncheckmein_unique_visitors_today {}\n",
        present, unique_today
    ))
}

#[derive(Debug, Deserialize)]
struct UnlockQuery {
    location: String,
    barcode: String,
}

/// Called by door controllers when a keyholder opens a door.
async fn unlock(State(state): State<AppState>, Query(params): Query<UnlockQuery>) -> Result<String> {
    Unlock::add_entry(&state.pool, &params.location, &params.barcode).await?;
    engine::checkin(&state.pool, &[params.barcode.clone()]).await?;
    state.updates.publish("unlock");

    tracing::info!(location = %params.location, barcode = %params.barcode, "Door unlocked");
    Ok("Unlocked".to_string())
}

async fn update_sse(State(state): State<AppState>) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = state
        .updates
        .stream()
        .map(|what| Ok(Event::default().event("update").data(what)));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(links))
        .route("/links", get(links))
        .route("/whoishere", get(who_is_here))
        .route("/checkout_who_is_here", post(checkout_who_is_here))
        .route("/metrics", get(metrics))
        .route("/unlock", get(unlock))
        .route("/updateSSE", get(update_sse))
}
