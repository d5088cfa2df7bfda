use askama::Template;
use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;

use crate::api::middleware::session::AppState;
use crate::error::Result;
use crate::models::guest::CreateGuestData;
use crate::models::{Guest, Visit};

const MAX_FIRST_NAME_LEN: usize = 32;

#[derive(Template)]
#[template(path = "guests.html")]
struct GuestsTemplate {
    message: String,
    in_building: Vec<Guest>,
    returning: Vec<Guest>,
}

#[derive(Debug, Deserialize)]
struct GuestsQuery {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddGuestForm {
    first: String,
    last: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    other_reason: String,
    newsletter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeaveForm {
    guest_id: String,
    #[serde(default)]
    comments: String,
}

#[derive(Debug, Deserialize)]
struct ReturnForm {
    guest_id: String,
}

fn with_message(message: &str) -> Redirect {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("message", message)
        .finish();
    Redirect::to(&format!("/guests?{}", query))
}

/// Checks the registration form. The error is shown to the guest.
fn validate(form: &AddGuestForm) -> std::result::Result<String, String> {
    if form.first.trim().is_empty() || form.last.trim().is_empty() {
        return Err("Need a first and last name".to_string());
    }
    if form.first.trim().chars().count() > MAX_FIRST_NAME_LEN {
        return Err("First name is too long".to_string());
    }

    let reason = if form.reason == "Other" || form.reason.trim().is_empty() {
        format!("Other: {}", form.other_reason.trim())
    } else {
        form.reason.trim().to_string()
    };

    Ok(reason)
}

async fn index(State(state): State<AppState>, Query(params): Query<GuestsQuery>) -> Result<GuestsTemplate> {
    let (in_building, returning) = Guest::get_guest_lists(&state.pool).await?;

    Ok(GuestsTemplate {
        message: params.message.unwrap_or_default(),
        in_building,
        returning,
    })
}

async fn add(State(state): State<AppState>, Form(form): Form<AddGuestForm>) -> Result<Redirect> {
    let where_found = match validate(&form) {
        Ok(reason) => reason,
        Err(message) => return Ok(with_message(&message)),
    };

    let data = CreateGuestData {
        first_name: form.first.trim().to_string(),
        last_name: form.last.trim().to_string(),
        email: form.email.trim().to_string(),
        where_found,
        newsletter: form.newsletter.is_some(),
    };

    let Some(guest_id) = Guest::add_guest(&state.pool, &data).await? else {
        return Ok(with_message("Too many guests today, please see a member"));
    };

    Visit::enter_guest(&state.pool, &guest_id).await?;
    state.updates.publish("guests");

    Ok(with_message(&format!(
        "Welcome {}, we are glad you are here!",
        data.display_name()
    )))
}

async fn leave(State(state): State<AppState>, Form(form): Form<LeaveForm>) -> Result<Redirect> {
    let name = match Guest::get_name(&state.pool, &form.guest_id).await? {
        Ok(name) => name,
        Err(message) => return Ok(with_message(&message)),
    };

    Visit::leave_guest(&state.pool, &form.guest_id).await?;
    state.updates.publish("guests");

    if !form.comments.trim().is_empty() {
        let email = Guest::get_email(&state.pool, &form.guest_id).await?.unwrap_or_default();
        state
            .mailer
            .send(
                "TFI Ops",
                &state.config.ops_email,
                "Comments from a guest",
                &format!("{} <{}> left the comment:\n\n{}", name, email, form.comments.trim()),
            )
            .await;
    }

    Ok(with_message(&format!("Thank you {}, we hope to see you again soon.", name)))
}

async fn return_guest(State(state): State<AppState>, Form(form): Form<ReturnForm>) -> Result<Redirect> {
    let name = match Guest::get_name(&state.pool, &form.guest_id).await? {
        Ok(name) => name,
        Err(message) => return Ok(with_message(&message)),
    };

    Visit::enter_guest(&state.pool, &form.guest_id).await?;
    state.updates.publish("guests");

    Ok(with_message(&format!("Welcome back {}, we are glad you are here!", name)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/guests", get(index))
        .route("/guests/add", post(add))
        .route("/guests/leave", post(leave))
        .route("/guests/return", post(return_guest))
}
