use askama::Template;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tower_sessions::Session;

use crate::api::middleware::auth::{log_in, require_role, take_source};
use crate::api::middleware::session::AppState;
use crate::error::Result;
use crate::models::team::TeamInfo;
use crate::models::{Account, Device, Member, Role, Team};

#[derive(Template)]
#[template(path = "profile/login.html")]
struct LoginTemplate {
    error: String,
}

#[derive(Template)]
#[template(path = "profile/index.html")]
struct ProfileTemplate {
    username: String,
    display_name: String,
    role: Role,
    devices: Vec<Device>,
    teams: Vec<TeamInfo>,
    message: String,
}

#[derive(Template)]
#[template(path = "profile/forgot.html")]
struct ForgotTemplate {
    message: String,
}

#[derive(Template)]
#[template(path = "profile/reset.html")]
struct ResetTemplate {
    user: String,
    token: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ChangePasswordForm {
    old_pass: String,
    new_pass1: String,
    new_pass2: String,
}

#[derive(Debug, Deserialize)]
struct ForgotForm {
    user: String,
}

#[derive(Debug, Deserialize)]
struct ResetQuery {
    #[serde(default)]
    user: String,
    #[serde(default)]
    token: String,
}

#[derive(Debug, Deserialize)]
struct ResetForm {
    user: String,
    token: String,
    new_pass1: String,
    new_pass2: String,
}

#[derive(Debug, Deserialize)]
struct DeviceForm {
    mac: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ProfileQuery {
    message: Option<String>,
}

async fn login_page() -> LoginTemplate {
    LoginTemplate { error: String::new() }
}

async fn login(State(state): State<AppState>, session: Session, Form(form): Form<LoginForm>) -> Result<Response> {
    let username = form.username.trim();

    let Some((barcode, role)) = Account::get_barcode_and_role(&state.pool, username, &form.password).await? else {
        tracing::info!(username = %username, "Failed login");
        return Ok(LoginTemplate {
            error: "Invalid username or password".to_string(),
        }
        .into_response());
    };

    let source = take_source(&session).await?;
    log_in(&session, username, &barcode, role).await?;
    tracing::info!(username = %username, "Logged in");

    Ok(Redirect::to(source.as_deref().unwrap_or("/profile")).into_response())
}

async fn logout(session: Session) -> Result<Redirect> {
    session.flush().await?;
    Ok(Redirect::to("/"))
}

async fn profile_page(state: &AppState, session: &Session, message: String) -> Result<ProfileTemplate> {
    let user = require_role(session, "/profile", Role::empty()).await?;

    Ok(ProfileTemplate {
        display_name: Member::get_name(&state.pool, &user.barcode).await?.unwrap_or_default(),
        devices: Device::get_list(&state.pool, &user.barcode).await?,
        teams: Team::get_active_teams_coached(&state.pool, &user.barcode).await?,
        username: user.username,
        role: user.role,
        message,
    })
}

async fn index(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<ProfileQuery>,
) -> Result<ProfileTemplate> {
    profile_page(&state, &session, params.message.unwrap_or_default()).await
}

async fn change_password(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<ChangePasswordForm>,
) -> Result<ProfileTemplate> {
    let user = require_role(&session, "/profile", Role::empty()).await?;

    let message = if form.new_pass1 != form.new_pass2 {
        "New passwords do not match"
    } else if form.new_pass1.is_empty() {
        "New password must not be empty"
    } else if state
        .accounts()
        .change_password(&user.username, &form.old_pass, &form.new_pass1)
        .await?
    {
        "Password changed"
    } else {
        "Old password is incorrect"
    };

    profile_page(&state, &session, message.to_string()).await
}

async fn add_device(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<DeviceForm>,
) -> Result<Redirect> {
    let user = require_role(&session, "/profile", Role::empty()).await?;

    if !form.mac.trim().is_empty() {
        Device::add(&state.pool, &form.mac, &form.name, &user.barcode).await?;
    }
    Ok(Redirect::to("/profile"))
}

async fn delete_device(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<DeviceForm>,
) -> Result<Redirect> {
    let user = require_role(&session, "/profile", Role::empty()).await?;

    Device::delete(&state.pool, &form.mac, &user.barcode).await?;
    Ok(Redirect::to("/profile"))
}

async fn forgot_page() -> ForgotTemplate {
    ForgotTemplate { message: String::new() }
}

async fn forgot_password(State(state): State<AppState>, Form(form): Form<ForgotForm>) -> Result<ForgotTemplate> {
    let outcome = state.accounts().forgot_password(form.user.trim()).await?;

    Ok(ForgotTemplate {
        message: outcome.message(),
    })
}

async fn reset_page(Query(params): Query<ResetQuery>) -> ResetTemplate {
    ResetTemplate {
        user: params.user,
        token: params.token,
        message: String::new(),
    }
}

async fn reset_password(State(state): State<AppState>, Form(form): Form<ResetForm>) -> Result<Response> {
    let message = if form.new_pass1 != form.new_pass2 {
        "New passwords do not match"
    } else if form.new_pass1.is_empty() {
        "New password must not be empty"
    } else if state
        .accounts()
        .verify_forgot(&form.user, &form.token, &form.new_pass1)
        .await?
    {
        return Ok(Redirect::to("/profile/login").into_response());
    } else {
        "Reset link is invalid or has expired"
    };

    Ok(ResetTemplate {
        user: form.user,
        token: form.token,
        message: message.to_string(),
    }
    .into_response())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile", get(index))
        .route("/profile/login", get(login_page).post(login))
        .route("/profile/logout", get(logout))
        .route("/profile/change_password", post(change_password))
        .route("/profile/add_device", post(add_device))
        .route("/profile/delete_device", post(delete_device))
        .route("/profile/forgot_password", get(forgot_page).post(forgot_password))
        .route("/profile/reset_password_token", get(reset_page).post(reset_password))
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{body_text, get, get_with_cookie, location, login, post_form, post_form_with_cookie, test_state};
    use crate::models::account::tests::pool_with_keyholders;
    use crate::models::Device;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_profile_requires_login() {
        let state = test_state(pool_with_keyholders().await);

        let response = get(&state, "/profile").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/profile/login");
    }

    #[tokio::test]
    async fn test_bad_login_shows_error() {
        let state = test_state(pool_with_keyholders().await);

        let response = post_form(&state, "/profile/login", "username=nick&password=nope").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Invalid username or password"));
    }

    #[tokio::test]
    async fn test_login_then_profile() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "nick", "password").await;

        let body = body_text(get_with_cookie(&state, "/profile", &cookie).await).await;

        assert!(body.contains("Nick N"));
        assert!(body.contains("Admin Keyholder"));
    }

    #[tokio::test]
    async fn test_login_returns_to_source() {
        let state = test_state(pool_with_keyholders().await);
        let first = get(&state, "/admin").await;
        let cookie = crate::api::tests::session_cookie(&first);

        let response = post_form_with_cookie(&state, "/profile/login", "username=nick&password=password", &cookie).await;

        assert_eq!(location(&response), "/admin");
    }

    #[tokio::test]
    async fn test_devices() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "fran", "password").await;

        post_form_with_cookie(&state, "/profile/add_device", "mac=aa%3Abb&name=phone", &cookie).await;
        assert_eq!(Device::get_list(&state.pool, "100015").await.unwrap().len(), 1);

        post_form_with_cookie(&state, "/profile/delete_device", "mac=aa%3Abb", &cookie).await;
        assert!(Device::get_list(&state.pool, "100015").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_password_mismatch() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "fran", "password").await;

        let response = post_form_with_cookie(
            &state,
            "/profile/change_password",
            "old_pass=password&new_pass1=a&new_pass2=b",
            &cookie,
        )
        .await;

        assert!(body_text(response).await.contains("New passwords do not match"));
    }

    #[tokio::test]
    async fn test_forgot_unknown_user() {
        let state = test_state(pool_with_keyholders().await);

        let body = body_text(post_form(&state, "/profile/forgot_password", "user=ghost").await).await;

        assert!(body.contains("No email sent due to not finding user: ghost."));
    }
}
