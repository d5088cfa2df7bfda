// HTTP endpoints

pub mod admin;
pub mod certifications;
pub mod guests;
pub mod health;
pub mod links;
pub mod middleware;
pub mod profile;
pub mod reports;
pub mod station;
pub mod teams;

use axum::Router;
use chrono::{NaiveDate, NaiveTime};

use crate::api::middleware::session::AppState;
use crate::error::{AppError, Result};
use crate::models::Role;

/// Every page of the kiosk, without sessions or static files.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(links::router())
        .merge(station::router())
        .merge(guests::router())
        .merge(profile::router())
        .merge(admin::router())
        .merge(teams::router())
        .merge(certifications::router())
        .merge(reports::router())
}

/// First value submitted under `key`.
pub(crate) fn form_value(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

/// Every value submitted under `key`, for repeated checkboxes.
pub(crate) fn form_values(pairs: &[(String, String)], key: &str) -> Vec<String> {
    pairs
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
        .collect()
}

pub(crate) fn parse_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Validation(format!("Invalid date: {}", input)))
}

pub(crate) fn parse_time(input: &str) -> Result<NaiveTime> {
    let input = input.trim();
    NaiveTime::parse_from_str(input, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M:%S"))
        .map_err(|_| AppError::Validation(format!("Invalid time: {}", input)))
}

/// Role checkboxes on the admin user forms.
pub(crate) fn role_from_form(pairs: &[(String, String)]) -> Role {
    [
        ("admin", Role::ADMIN),
        ("keyholder", Role::KEYHOLDER),
        ("certifier", Role::CERTIFIER),
        ("coach", Role::COACH),
        ("steward", Role::STEWARD),
    ]
    .into_iter()
    .filter(|(key, _)| form_value(pairs, key).is_some())
    .fold(Role::empty(), |role, (_, flag)| role | flag)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use axum::response::Response;
    use sqlx::SqlitePool;
    use tower::ServiceExt;

    use super::*;
    use crate::api::middleware::session::create_session_layer;
    use crate::config::Config;
    use crate::services::mailer::{Mailer, OutgoingMail};
    use crate::services::updates::UpdateBroadcaster;

    pub fn test_state(pool: SqlitePool) -> AppState {
        test_state_with_outbox(pool).0
    }

    pub fn test_state_with_outbox(pool: SqlitePool) -> (AppState, Arc<Mutex<Vec<OutgoingMail>>>) {
        let (mailer, outbox) = Mailer::memory();
        let state = AppState {
            read_only_pool: pool.clone(),
            pool,
            config: Config::for_tests(),
            updates: UpdateBroadcaster::new(),
            mailer,
        };
        (state, outbox)
    }

    pub struct TestRequest {
        method: Method,
        uri: String,
        cookie: Option<String>,
        content_type: Option<String>,
        body: String,
    }

    impl TestRequest {
        pub fn get(uri: &str) -> Self {
            Self::new(Method::GET, uri)
        }

        pub fn post(uri: &str) -> Self {
            Self::new(Method::POST, uri)
        }

        fn new(method: Method, uri: &str) -> Self {
            Self {
                method,
                uri: uri.to_string(),
                cookie: None,
                content_type: None,
                body: String::new(),
            }
        }

        pub fn cookie(mut self, cookie: &str) -> Self {
            self.cookie = Some(cookie.to_string());
            self
        }

        pub fn content_type(mut self, content_type: &str) -> Self {
            self.content_type = Some(content_type.to_string());
            self
        }

        pub fn body(mut self, body: &str) -> Self {
            self.body = body.to_string();
            self
        }

        pub async fn send(self, state: &AppState) -> Response {
            let session_layer = create_session_layer(state.pool.clone(), false).await.unwrap();
            let app = router().layer(session_layer).with_state(state.clone());

            let mut request = Request::builder().method(self.method).uri(self.uri);
            if let Some(cookie) = self.cookie {
                request = request.header(header::COOKIE, cookie);
            }
            if let Some(content_type) = self.content_type {
                request = request.header(header::CONTENT_TYPE, content_type);
            }

            app.oneshot(request.body(Body::from(self.body)).unwrap())
                .await
                .unwrap()
        }
    }

    const FORM: &str = "application/x-www-form-urlencoded";

    pub async fn get(state: &AppState, uri: &str) -> Response {
        TestRequest::get(uri).send(state).await
    }

    pub async fn get_with_cookie(state: &AppState, uri: &str, cookie: &str) -> Response {
        TestRequest::get(uri).cookie(cookie).send(state).await
    }

    pub async fn post_form(state: &AppState, uri: &str, body: &str) -> Response {
        TestRequest::post(uri).content_type(FORM).body(body).send(state).await
    }

    pub async fn post_form_with_cookie(state: &AppState, uri: &str, body: &str, cookie: &str) -> Response {
        TestRequest::post(uri)
            .cookie(cookie)
            .content_type(FORM)
            .body(body)
            .send(state)
            .await
    }

    pub async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    pub fn location(response: &Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .map(|value| value.to_str().unwrap().to_string())
            .unwrap_or_default()
    }

    /// `name=value` part of the session cookie.
    pub fn session_cookie(response: &Response) -> String {
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("response sets a session cookie")
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap_or_default().to_string()
    }

    pub async fn login(state: &AppState, username: &str, password: &str) -> String {
        let body = format!("username={}&password={}", username, password);
        let response = post_form(state, "/profile/login", &body).await;
        session_cookie(&response)
    }

    #[test]
    fn test_repeated_form_values() {
        let pairs = vec![
            ("checkout".to_string(), "100091".to_string()),
            ("note".to_string(), "x".to_string()),
            ("checkout".to_string(), "100015".to_string()),
        ];

        assert_eq!(form_value(&pairs, "checkout").as_deref(), Some("100091"));
        assert_eq!(form_values(&pairs, "checkout"), vec!["100091", "100015"]);
        assert!(form_value(&pairs, "missing").is_none());
    }

    #[test]
    fn test_role_checkboxes() {
        let pairs = vec![
            ("barcode".to_string(), "100032".to_string()),
            ("coach".to_string(), "1".to_string()),
            ("keyholder".to_string(), "on".to_string()),
        ];

        assert_eq!(role_from_form(&pairs), Role::COACH | Role::KEYHOLDER);
    }

    #[test]
    fn test_parse_time_accepts_seconds() {
        assert_eq!(parse_time("18:30").unwrap(), NaiveTime::from_hms_opt(18, 30, 0).unwrap());
        assert_eq!(parse_time("18:30:15").unwrap(), NaiveTime::from_hms_opt(18, 30, 15).unwrap());
        assert!(parse_date("03/01/2024").is_err());
    }
}
