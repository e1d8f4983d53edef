//! HTTP route handlers for the provisioning portal.
//!
//! Endpoints:
//! - `GET /` - WiFi settings form
//! - `POST /save` - store credentials (`application/x-www-form-urlencoded`,
//!   fields `ssid` and `password`)

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use checker_core::WifiCredentials;

use crate::{pages, AppState, MAX_FORM_BYTES};

/// Submitted settings form. Missing fields are treated as empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsForm {
    #[serde(default)]
    pub ssid: String,

    #[serde(default)]
    pub password: String,
}

/// Create the portal router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/save", post(save_handler))
        .layer(DefaultBodyLimit::max(MAX_FORM_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /
async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(pages::index(state.networks()))
}

/// POST /save
async fn save_handler(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> impl IntoResponse {
    let credentials = WifiCredentials::new(form.ssid, form.password);
    match state.save(credentials) {
        Ok(true) => (StatusCode::OK, Html(pages::saved())),
        Ok(false) => {
            warn!("Rejected WiFi credentials");
            (StatusCode::BAD_REQUEST, Html(pages::failed()))
        }
        Err(e) => {
            error!(error = %e, "Failed to save WiFi credentials");
            (StatusCode::INTERNAL_SERVER_ERROR, Html(pages::failed()))
        }
    }
}
