//! Transport security stages: HTTPS redirection and HSTS.
//!
//! TLS is terminated in front of the host; a request counts as secure when
//! its URI carries the `https` scheme or the proxy reports it through
//! `X-Forwarded-Proto`.

use axum::{
    extract::{Request, State},
    http::{
        header::{HOST, LOCATION, STRICT_TRANSPORT_SECURITY},
        HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::config::ServerConfig;

pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Hosts that never receive an HSTS header
const HSTS_EXCLUDED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

/// Transport policy derived from [`ServerConfig`]
#[derive(Debug, Clone)]
pub struct TransportPolicy {
    pub https_port: Option<u16>,
    pub hsts_max_age_seconds: u64,
    pub hsts_include_subdomains: bool,
}

impl TransportPolicy {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            https_port: config.https_port,
            hsts_max_age_seconds: config.hsts_max_age_seconds,
            hsts_include_subdomains: config.hsts_include_subdomains,
        }
    }

    pub fn hsts_header_value(&self) -> String {
        if self.hsts_include_subdomains {
            format!("max-age={}; includeSubDomains", self.hsts_max_age_seconds)
        } else {
            format!("max-age={}", self.hsts_max_age_seconds)
        }
    }

    /// Redirect target for a plaintext request, `None` when the host is unknown
    pub fn https_location(&self, request: &Request) -> Option<String> {
        let host = request_host(request)?;
        let authority = match self.https_port {
            Some(443) | None => host.to_string(),
            Some(port) => format!("{}:{}", host, port),
        };
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Some(format!("https://{}{}", authority, path_and_query))
    }
}

/// Whether the request arrived over TLS
pub fn is_secure(request: &Request) -> bool {
    if request.uri().scheme_str() == Some("https") {
        return true;
    }

    request
        .headers()
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        // Proxies chaining the header append; the first hop is the client's
        .and_then(|v| v.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

/// Host name without port, from the `Host` header or the absolute URI
fn request_host(request: &Request) -> Option<&str> {
    let raw = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())?;

    let host = if raw.starts_with('[') {
        // IPv6 literal: keep the brackets, drop a trailing port
        raw.split_inclusive(']').next().unwrap_or(raw)
    } else {
        raw.split(':').next().unwrap_or(raw)
    };

    (!host.is_empty()).then_some(host)
}

/// Send plaintext requests to their HTTPS equivalent with `307 Temporary Redirect`
pub async fn redirect_to_https(
    State(policy): State<TransportPolicy>,
    request: Request,
    next: Next,
) -> Response {
    if is_secure(&request) {
        return next.run(request).await;
    }

    match policy.https_location(&request) {
        Some(location) => {
            debug!(location = %location, "Redirecting plaintext request to HTTPS");
            let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
            if let Ok(value) = HeaderValue::from_str(&location) {
                response.headers_mut().insert(LOCATION, value);
            }
            response
        }
        None => {
            warn!(
                path = %request.uri().path(),
                error_type = "transport_policy",
                "Plaintext request without host rejected"
            );
            (StatusCode::BAD_REQUEST, "HTTPS required").into_response()
        }
    }
}

/// Add `Strict-Transport-Security` to responses served over TLS
pub async fn strict_transport_security(
    State(policy): State<TransportPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let eligible = is_secure(&request)
        && request_host(&request)
            .map_or(true, |host| !HSTS_EXCLUDED_HOSTS.contains(&host.to_ascii_lowercase().as_str()));

    let mut response = next.run(request).await;

    if eligible {
        if let Ok(value) = HeaderValue::from_str(&policy.hsts_header_value()) {
            response
                .headers_mut()
                .insert(STRICT_TRANSPORT_SECURITY, value);
        }
    }
    response
}
