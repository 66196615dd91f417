//! Authentication and authorization stages of the request pipeline

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::auth::types::{AuthError, Principal};
use crate::http_server::AppState;

/// Extract the credential from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

/// Validate the bearer token and attach the [`Principal`] to the request
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(request.headers()) {
        Ok(token) => token.to_string(),
        Err(e) => return reject(e, &request),
    };

    match state.validator.validate_token(&token).await {
        Ok(principal) => {
            debug!(
                subject = %principal.subject,
                path = %request.uri().path(),
                "Request authenticated"
            );
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => reject(e, &request),
    }
}

/// Apply the authorization policy to the authenticated principal
pub async fn authorize(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let outcome = match request.extensions().get::<Principal>() {
        Some(principal) => state.policy.evaluate(principal),
        None => Err(AuthError::MissingToken),
    };

    match outcome {
        Ok(()) => next.run(request).await,
        Err(e) => reject(e, &request),
    }
}

fn reject(error: AuthError, request: &Request) -> Response {
    warn!(
        error = %error,
        error_type = error.error_type(),
        method = %request.method(),
        path = %request.uri().path(),
        "Request rejected"
    );
    error.into_response()
}
