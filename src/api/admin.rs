use askama::Template;
use axum::{
    extract::{Multipart, Query, State},
    response::Redirect,
    routing::{get, post},
    Form, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tower_sessions::Session;

use crate::api::middleware::auth::require_role;
use crate::api::middleware::session::AppState;
use crate::api::{form_value, parse_date, role_from_form};
use crate::error::{AppError, Result};
use crate::models::account::UserSummary;
use crate::models::log_event::{BULK_ADD, GRACE_CHANGED};
use crate::models::member::MemberName;
use crate::models::setting::GRACE_PERIOD;
use crate::models::{Account, LogEvent, Role, Setting, Visit};
use crate::services::reports::{self, Datum};
use crate::services::{engine, keyholder_payload, member_import};

#[derive(Template)]
#[template(path = "admin/index.html")]
struct AdminTemplate {
    message: String,
    forgot_dates: Vec<NaiveDate>,
    last_bulk_add: String,
    grace_period: String,
    users: Vec<UserSummary>,
    non_accounts: Vec<MemberName>,
}

#[derive(Template)]
#[template(path = "admin/fix_data.html")]
struct FixDataTemplate {
    date: NaiveDate,
    data: Vec<Datum>,
}

#[derive(Debug, Deserialize)]
struct AdminQuery {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraceForm {
    grace: u32,
}

#[derive(Debug, Deserialize)]
struct FixDataQuery {
    date: String,
}

#[derive(Debug, Deserialize)]
struct FixedForm {
    output: String,
}

#[derive(Debug, Deserialize)]
struct BarcodeForm {
    barcode: String,
}

fn with_message(message: &str) -> Redirect {
    let query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("message", message)
        .finish();
    Redirect::to(&format!("/admin?{}", query))
}

async fn index(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<AdminQuery>,
) -> Result<AdminTemplate> {
    require_role(&session, "/admin", Role::ADMIN).await?;

    let last_bulk_add = match LogEvent::get_last_event(&state.pool, BULK_ADD).await? {
        Some((date, barcode)) => format!("{} by {}", date.format("%Y-%m-%d %H:%M"), barcode),
        None => "Never".to_string(),
    };

    Ok(AdminTemplate {
        message: params.message.unwrap_or_default(),
        forgot_dates: reports::get_forgotten_dates(&state.pool).await?,
        last_bulk_add,
        grace_period: Setting::get(&state.pool, GRACE_PERIOD).await?.unwrap_or_default(),
        users: Account::get_users(&state.pool).await?,
        non_accounts: Account::get_non_accounts(&state.pool).await?,
    })
}

async fn bulk_add(State(state): State<AppState>, session: Session, mut multipart: Multipart) -> Result<Redirect> {
    let user = require_role(&session, "/admin", Role::ADMIN).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?
    {
        if field.name() != Some("csvfile") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload.csv").to_string();
        let content = field.text().await.map_err(|e| AppError::Validation(e.to_string()))?;
        let message = member_import::import_members(&state.pool, &file_name, &content, &user.barcode).await?;
        return Ok(with_message(&message));
    }

    Ok(with_message("No file uploaded"))
}

async fn set_grace_period(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<GraceForm>,
) -> Result<Redirect> {
    let user = require_role(&session, "/admin", Role::ADMIN).await?;

    Setting::update(&state.pool, GRACE_PERIOD, &form.grace.to_string()).await?;
    LogEvent::add_event(&state.pool, GRACE_CHANGED, &user.barcode).await?;

    tracing::info!(grace = form.grace, "Grace period changed");
    Ok(with_message("Grace period changed"))
}

async fn empty_building(State(state): State<AppState>, session: Session) -> Result<Redirect> {
    require_role(&session, "/admin", Role::ADMIN).await?;

    let keyholder = Account::get_active_key_holder(&state.pool)
        .await?
        .map(|kh| kh.barcode)
        .unwrap_or_default();
    engine::close_building(&state.pool, &keyholder).await?;
    state.updates.publish("keyholder");

    Ok(with_message("Building emptied"))
}

async fn oops(State(state): State<AppState>, session: Session) -> Result<Redirect> {
    require_role(&session, "/admin", Role::ADMIN).await?;

    let restored = Visit::oops_forgot(&state.pool).await?;
    state.updates.publish("station");

    Ok(with_message(&format!("Restored {} visits", restored)))
}

async fn fix_data(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<FixDataQuery>,
) -> Result<FixDataTemplate> {
    require_role(&session, "/admin", Role::ADMIN).await?;

    let date = parse_date(&params.date)?;
    Ok(FixDataTemplate {
        date,
        data: reports::get_data(&state.pool, date).await?,
    })
}

async fn fixed(State(state): State<AppState>, session: Session, Form(form): Form<FixedForm>) -> Result<Redirect> {
    require_role(&session, "/admin", Role::ADMIN).await?;

    let updated = Visit::fix(&state.pool, &form.output).await?;
    tracing::info!(updated, "Visits fixed");

    Ok(with_message(&format!("Fixed {} visits", updated)))
}

async fn add_user(
    State(state): State<AppState>,
    session: Session,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Result<Redirect> {
    require_role(&session, "/admin", Role::ADMIN).await?;

    let username = form_value(&pairs, "user").unwrap_or_default();
    let barcode = form_value(&pairs, "barcode").unwrap_or_default();

    match state.accounts().add_user(&username, &barcode, role_from_form(&pairs)).await? {
        Ok(()) => Ok(with_message(&format!("User {} added", username))),
        Err(message) => Ok(with_message(&message)),
    }
}

async fn change_access(
    State(state): State<AppState>,
    session: Session,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Result<Redirect> {
    require_role(&session, "/admin", Role::ADMIN).await?;

    let barcode = form_value(&pairs, "barcode").unwrap_or_default();
    state.accounts().change_role(&barcode, role_from_form(&pairs)).await?;

    Ok(with_message("Access changed"))
}

async fn delete_user(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<BarcodeForm>,
) -> Result<Redirect> {
    let user = require_role(&session, "/admin", Role::ADMIN).await?;

    if form.barcode == user.barcode {
        return Ok(with_message("You can not delete yourself"));
    }

    Account::remove_user(&state.pool, &form.barcode).await?;
    tracing::info!(barcode = %form.barcode, by = %user.username, "User removed");
    Ok(with_message("User removed"))
}

/// Sealed keyholder list for the door controllers.
async fn keyholder_json(State(state): State<AppState>, session: Session) -> Result<String> {
    require_role(&session, "/admin", Role::ADMIN).await?;

    keyholder_payload::sealed_payload(&state.pool, state.config.keyholder_key.as_ref()).await
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin", get(index))
        .route("/admin/bulk_add", post(bulk_add))
        .route("/admin/grace_period", post(set_grace_period))
        .route("/admin/empty_building", post(empty_building))
        .route("/admin/oops", post(oops))
        .route("/admin/fix_data", get(fix_data))
        .route("/admin/fixed", post(fixed))
        .route("/admin/add_user", post(add_user))
        .route("/admin/change_access", post(change_access))
        .route("/admin/delete_user", post(delete_user))
        .route("/admin/keyholder_json", get(keyholder_json))
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{body_text, get_with_cookie, location, login, post_form_with_cookie, test_state, TestRequest};
    use crate::models::account::tests::pool_with_keyholders;
    use crate::models::setting::GRACE_PERIOD;
    use crate::models::{Account, Member, Role, Setting, Visit};
    use crate::services::encryption::KeyholderCipher;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_admin_requires_admin_role() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "fran", "password").await;

        let response = get_with_cookie(&state, "/admin", &cookie).await;

        assert_eq!(location(&response), "/profile/login");
    }

    #[tokio::test]
    async fn test_admin_page_lists_users() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "nick", "password").await;

        let response = get_with_cookie(&state, "/admin", &cookie).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("fran"));
        assert!(body.contains("Never"));
    }

    #[tokio::test]
    async fn test_grace_period_is_saved() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "nick", "password").await;

        post_form_with_cookie(&state, "/admin/grace_period", "grace=30", &cookie).await;

        assert_eq!(Setting::get(&state.pool, GRACE_PERIOD).await.unwrap().unwrap(), "30");
    }

    #[tokio::test]
    async fn test_empty_building_then_oops() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "nick", "password").await;
        crate::services::engine::checkin(&state.pool, &["100091".to_string(), "100032".to_string()])
            .await
            .unwrap();

        post_form_with_cookie(&state, "/admin/empty_building", "", &cookie).await;
        assert!(!Visit::in_building(&state.pool, "100032").await.unwrap());

        post_form_with_cookie(&state, "/admin/oops", "", &cookie).await;
        assert!(Visit::in_building(&state.pool, "100032").await.unwrap());
    }

    #[tokio::test]
    async fn test_change_access_and_delete_user() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "nick", "password").await;

        post_form_with_cookie(&state, "/admin/change_access", "barcode=100032&coach=1&certifier=1", &cookie).await;
        let cory = Account::find_by_barcode(&state.pool, "100032").await.unwrap().unwrap();
        assert_eq!(cory.role(), Role::COACH | Role::CERTIFIER);

        post_form_with_cookie(&state, "/admin/delete_user", "barcode=100032", &cookie).await;
        assert!(Account::find_by_barcode(&state.pool, "100032").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyholder_json_is_sealed() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "nick", "password").await;

        let token = body_text(get_with_cookie(&state, "/admin/keyholder_json", &cookie).await).await;

        let json = KeyholderCipher::from_passphrase("test-keyholder-key").open(&token).unwrap();
        assert!(json.contains("100015"));
    }

    #[tokio::test]
    async fn test_bulk_add_upload() {
        let state = test_state(pool_with_keyholders().await);
        let cookie = login(&state, "nick", "password").await;
        let body = "--XYZ\r\n\
Content-Disposition: form-data; name=\"csvfile\"; filename=\"members.csv\"\r\n\
Content-Type: text/csv\r\n\r\n\
TFI Display Name for Button,First Name,Last Name,TFI Barcode for Button,Email,Membership End Date\n\
Zed Z,Zed,Zulu,100300,zed@example.org,1/31/2099\n\
\r\n--XYZ--\r\n";

        let response = TestRequest::post("/admin/bulk_add")
            .cookie(&cookie)
            .content_type("multipart/form-data; boundary=XYZ")
            .body(body)
            .send(&state)
            .await;

        assert!(location(&response).contains("Imported+1+from+members.csv"));
        assert!(Member::find_by_barcode(&state.pool, "100300").await.unwrap().is_some());
    }
}
