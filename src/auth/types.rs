use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

/// Authenticated caller, derived from a validated access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Principal {
    /// Subject (`sub`) claim
    pub subject: String,
    /// Directory object id (`oid`), when issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Issuing tenant (`tid`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Display name (`name`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Delegated scopes granted to the token (`scp`)
    pub scopes: Vec<String>,
    /// Application roles (`roles`)
    pub roles: Vec<String>,
    /// Token expiry
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    /// Whether the token carries `scope`; URI-form scopes match on their last segment
    pub fn has_scope(&self, scope: &str) -> bool {
        let short = scope.rsplit('/').next().unwrap_or(scope);
        self.scopes.iter().any(|s| s == scope || s == short)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No bearer token presented")]
    MissingToken,

    #[error("Authorization header is not a bearer credential")]
    MalformedHeader,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token not yet valid")]
    TokenNotYetValid,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token audience is not accepted")]
    InvalidAudience,

    #[error("Token issuer '{actual}' does not match '{expected}'")]
    InvalidIssuer { expected: String, actual: String },

    #[error("Unknown signing key '{0}'")]
    UnknownSigningKey(String),

    #[error("Identity provider metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Token lacks required scope '{0}'")]
    InsufficientScope(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InsufficientScope(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Short machine-readable label, used in logs
    pub fn error_type(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedHeader => "malformed_header",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidAudience => "invalid_audience",
            AuthError::InvalidIssuer { .. } => "invalid_issuer",
            AuthError::UnknownSigningKey(_) => "unknown_signing_key",
            AuthError::MetadataUnavailable(_) => "metadata_unavailable",
            AuthError::InsufficientScope(_) => "insufficient_scope",
        }
    }

    /// RFC 6750 challenge for this failure
    pub fn challenge(&self) -> String {
        match self {
            // No credentials at all: a bare challenge, no error code
            AuthError::MissingToken => "Bearer".to_string(),
            AuthError::MalformedHeader => "Bearer error=\"invalid_request\"".to_string(),
            AuthError::InsufficientScope(scope) => format!(
                "Bearer error=\"insufficient_scope\", scope=\"{}\"",
                scope
            ),
            AuthError::TokenExpired => {
                "Bearer error=\"invalid_token\", error_description=\"The token expired\"".to_string()
            }
            _ => "Bearer error=\"invalid_token\"".to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let challenge = self.challenge();
        let error = if status == StatusCode::FORBIDDEN {
            "forbidden"
        } else {
            "unauthorized"
        };
        let body = Json(json!({ "error": error }));

        let mut response = (status, body).into_response();
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        response
    }
}
