//! Identity provider URL derivation.
//!
//! Every URL the host hands out or trusts is produced by
//! [`IdentityEndpoints::resolve`]. The token validator and the OpenAPI
//! security scheme both consume the resolved value, so the authority that
//! signs accepted tokens and the endpoints documentation clients request
//! tokens from always share one tenant segment.

use crate::config::IdentityConfig;

/// Resolved identity provider endpoints for one tenant segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEndpoints {
    /// Tenant path segment (`common` or a tenant id)
    pub tenant_segment: String,

    /// Token issuing authority: `{instance}/{segment}/v2.0`
    pub authority: String,

    /// OpenID Connect discovery document
    pub metadata_address: String,

    /// Interactive authorization endpoint
    pub authorization_url: String,

    /// Token endpoint
    pub token_url: String,

    /// Accepted `aud` values
    pub audiences: Vec<String>,

    /// Scopes the API exposes
    pub scopes: Vec<String>,
}

impl IdentityEndpoints {
    pub fn resolve(identity: &IdentityConfig, tenant_segment: &str, audiences: Vec<String>) -> Self {
        let base = format!(
            "{}/{}",
            identity.instance.trim_end_matches('/'),
            tenant_segment
        );
        let authority = format!("{}/v2.0", base);

        Self {
            tenant_segment: tenant_segment.to_string(),
            metadata_address: format!("{}/.well-known/openid-configuration", authority),
            authorization_url: format!("{}/oauth2/v2.0/authorize", base),
            token_url: format!("{}/oauth2/v2.0/token", base),
            authority,
            audiences,
            scopes: identity.scopes.clone(),
        }
    }
}
