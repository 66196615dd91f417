//! Application routes dispatched behind authentication

use axum::{routing::get, Extension, Json, Router};

use crate::auth::Principal;
use crate::http_server::AppState;

/// Return the caller identity derived from the presented token
#[utoipa::path(
    get,
    path = "/api/me",
    tag = "identity",
    responses(
        (status = 200, description = "Authenticated caller", body = Principal),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Token lacks a required scope")
    )
)]
pub async fn current_principal(Extension(principal): Extension<Principal>) -> Json<Principal> {
    Json(principal)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/me", get(current_principal))
}
