use askama::Template;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;

use crate::api::middleware::session::AppState;
use crate::error::Result;
use crate::models::member::MemberName;
use crate::models::{Account, Role};
use crate::services::engine::{self, ScanOutcome};
use crate::services::reports::{self, PersonInBuilding};

#[derive(Template)]
#[template(path = "station.html")]
struct StationTemplate {
    keyholder: String,
    stewards: Vec<MemberName>,
    people: Vec<PersonInBuilding>,
    errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "keyholder.html")]
struct KeyholderTemplate {
    keyholder: Option<MemberName>,
    people: Vec<PersonInBuilding>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct StationQuery {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BarcodeForm {
    #[serde(default)]
    barcode: String,
}

async fn station_page(state: &AppState, errors: Vec<String>) -> Result<StationTemplate> {
    let keyholder = Account::get_active_key_holder(&state.pool)
        .await?
        .map(|kh| kh.display_name)
        .unwrap_or_default();

    Ok(StationTemplate {
        keyholder,
        stewards: Account::get_present_with_role(&state.pool, Role::STEWARD).await?,
        people: reports::who_is_here(&state.pool).await?,
        errors,
    })
}

async fn keyholder_page(state: &AppState, message: &str) -> Result<KeyholderTemplate> {
    Ok(KeyholderTemplate {
        keyholder: Account::get_active_key_holder(&state.pool).await?,
        people: reports::who_is_here(&state.pool).await?,
        message: message.to_string(),
    })
}

async fn index(State(state): State<AppState>, Query(params): Query<StationQuery>) -> Result<StationTemplate> {
    station_page(&state, params.error.into_iter().collect()).await
}

/// Main station scan. Several barcodes may arrive in one scan.
async fn checkin(State(state): State<AppState>, Form(form): Form<BarcodeForm>) -> Result<Response> {
    let outcome = engine::scan(&state.pool, &state.config.master_keyholder_barcode, &form.barcode).await?;
    state.updates.publish("station");

    match outcome {
        ScanOutcome::Updated { errors } => Ok(station_page(&state, errors).await?.into_response()),
        ScanOutcome::ShowKeyholder { .. } => Ok(keyholder_page(&state, "").await?.into_response()),
        ScanOutcome::Closed => Ok(Redirect::to("/station").into_response()),
    }
}

async fn keyholder(State(state): State<AppState>) -> Result<KeyholderTemplate> {
    keyholder_page(&state, "").await
}

/// Another keyholder takes over from the one leaving.
async fn take_over(State(state): State<AppState>, Form(form): Form<BarcodeForm>) -> Result<Response> {
    let barcode = form.barcode.trim();
    let leaving = Account::get_active_key_holder(&state.pool).await?;

    if !engine::make_keyholder(&state.pool, barcode).await? {
        let message = format!("{} can not be the keyholder", barcode);
        return Ok(keyholder_page(&state, &message).await?.into_response());
    }

    if let Some(leaving) = leaving.filter(|kh| kh.barcode != barcode) {
        crate::models::Visit::check_out_member(&state.pool, &leaving.barcode).await?;
        tracing::info!(from = %leaving.barcode, to = %barcode, "Keyholder handed over");
    }

    state.updates.publish("keyholder");
    Ok(Redirect::to("/station").into_response())
}

/// The keyholder leaves and everyone still here is marked as forgotten. Only
/// the active keyholder's barcode or the master card may close.
async fn close(State(state): State<AppState>, Form(form): Form<BarcodeForm>) -> Result<Response> {
    let barcode = form.barcode.trim();
    let keyholder = Account::get_active_key_holder(&state.pool)
        .await?
        .map(|kh| kh.barcode)
        .unwrap_or_default();

    let allowed = barcode == state.config.master_keyholder_barcode || (!keyholder.is_empty() && barcode == keyholder);
    if !allowed {
        tracing::warn!(barcode = %barcode, "Close refused");
        let message = format!("{} can not close the building", barcode);
        return Ok(keyholder_page(&state, &message).await?.into_response());
    }

    engine::close_building(&state.pool, &keyholder).await?;
    state.updates.publish("keyholder");

    tracing::info!(keyholder = %keyholder, "Building closed");
    Ok(Redirect::to("/station").into_response())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/station", get(index))
        .route("/station/checkin", post(checkin))
        .route("/station/keyholder", get(keyholder).post(take_over))
        .route("/station/close", post(close))
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{body_text, get, post_form, test_state};
    use crate::models::account::tests::pool_with_keyholders;
    use crate::models::{Account, Visit};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_scan_checks_in_and_sets_keyholder() {
        let state = test_state(pool_with_keyholders().await);

        let response = post_form(&state, "/station/checkin", "barcode=100091").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Nick N"));
        assert!(Visit::in_building(&state.pool, "100091").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_barcode_is_shown() {
        let state = test_state(pool_with_keyholders().await);

        let body = body_text(post_form(&state, "/station/checkin", "barcode=424242").await).await;

        assert!(body.contains("Invalid barcode: 424242"));
    }

    #[tokio::test]
    async fn test_lone_keyholder_scan_closes() {
        let state = test_state(pool_with_keyholders().await);
        post_form(&state, "/station/checkin", "barcode=100091").await;

        let response = post_form(&state, "/station/checkin", "barcode=100091").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(!Visit::in_building(&state.pool, "100091").await.unwrap());
    }

    #[tokio::test]
    async fn test_take_over_keyholder() {
        let state = test_state(pool_with_keyholders().await);
        post_form(&state, "/station/checkin", "barcode=100091+100032").await;

        let response = post_form(&state, "/station/keyholder", "barcode=100015").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let active = Account::get_active_key_holder(&state.pool).await.unwrap().unwrap();
        assert_eq!(active.barcode, "100015");
        assert!(!Visit::in_building(&state.pool, "100091").await.unwrap());
        assert!(Visit::in_building(&state.pool, "100032").await.unwrap());
    }

    #[tokio::test]
    async fn test_take_over_refused_for_non_keyholder() {
        let state = test_state(pool_with_keyholders().await);
        post_form(&state, "/station/checkin", "barcode=100091").await;

        let body = body_text(post_form(&state, "/station/keyholder", "barcode=100032").await).await;

        assert!(body.contains("100032 can not be the keyholder"));
    }

    #[tokio::test]
    async fn test_close_building() {
        let state = test_state(pool_with_keyholders().await);
        post_form(&state, "/station/checkin", "barcode=100091+100032").await;

        post_form(&state, "/station/close", "barcode=100091").await;

        assert!(!Visit::in_building(&state.pool, "100032").await.unwrap());
        assert!(Account::get_active_key_holder(&state.pool).await.unwrap().is_none());
        assert_eq!(get(&state, "/station").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_close_refused_without_keyholder_barcode() {
        let state = test_state(pool_with_keyholders().await);
        post_form(&state, "/station/checkin", "barcode=100091+100032").await;

        let empty = post_form(&state, "/station/close", "").await;
        assert_eq!(empty.status(), StatusCode::OK);

        let body = body_text(post_form(&state, "/station/close", "barcode=100032").await).await;
        assert!(body.contains("100032 can not close the building"));

        assert!(Visit::in_building(&state.pool, "100032").await.unwrap());
        let active = Account::get_active_key_holder(&state.pool).await.unwrap().unwrap();
        assert_eq!(active.barcode, "100091");
    }

    #[tokio::test]
    async fn test_master_card_closes() {
        let state = test_state(pool_with_keyholders().await);
        post_form(&state, "/station/checkin", "barcode=100091+100032").await;

        let response = post_form(&state, "/station/close", "barcode=999901").await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(!Visit::in_building(&state.pool, "100032").await.unwrap());
    }
}
