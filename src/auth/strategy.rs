//! Bearer validation strategies.
//!
//! Both strategies answer the same question ("given this configuration,
//! which tenant and audiences do we trust?") and differ only in the answer.
//! The strategy is chosen once at startup from `Authentication:Strategy`.

use std::fmt;
use std::sync::Arc;

use crate::auth::endpoints::IdentityEndpoints;
use crate::auth::token_validator::{TokenValidator, ValidatorSettings};
use crate::config::{AuthStrategyKind, Config, IdentityConfig};

/// Multi-tenant segment used by the identity platform adapter
pub const COMMON_TENANT: &str = "common";

pub trait BearerStrategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> AuthStrategyKind;

    /// Tenant path segment shared by the authority and the interactive endpoints
    fn tenant_segment<'a>(&self, identity: &'a IdentityConfig) -> &'a str;

    /// Accepted token audiences
    fn audiences(&self, identity: &IdentityConfig) -> Vec<String>;

    fn endpoints(&self, identity: &IdentityConfig) -> IdentityEndpoints {
        IdentityEndpoints::resolve(
            identity,
            self.tenant_segment(identity),
            self.audiences(identity),
        )
    }

    fn build_validator(&self, config: &Config) -> Result<TokenValidator, reqwest::Error> {
        TokenValidator::new(
            self.endpoints(&config.identity),
            ValidatorSettings::from_config(&config.authentication),
        )
    }
}

/// Identity-platform adapter: always the common authority, accepts the
/// client id and its `api://` application id URI as audience.
#[derive(Debug, Default)]
pub struct PlatformStrategy;

impl BearerStrategy for PlatformStrategy {
    fn kind(&self) -> AuthStrategyKind {
        AuthStrategyKind::Platform
    }

    fn tenant_segment<'a>(&self, _identity: &'a IdentityConfig) -> &'a str {
        COMMON_TENANT
    }

    fn audiences(&self, identity: &IdentityConfig) -> Vec<String> {
        vec![
            identity.client_id.clone(),
            format!("api://{}", identity.client_id),
        ]
    }
}

/// Plain JWT bearer validation against the configured tenant
#[derive(Debug, Default)]
pub struct DirectStrategy;

impl BearerStrategy for DirectStrategy {
    fn kind(&self) -> AuthStrategyKind {
        AuthStrategyKind::Direct
    }

    fn tenant_segment<'a>(&self, identity: &'a IdentityConfig) -> &'a str {
        // Presence is enforced when the configuration is loaded
        identity.tenant_id.as_deref().unwrap_or_default()
    }

    fn audiences(&self, identity: &IdentityConfig) -> Vec<String> {
        vec![identity.client_id.clone()]
    }
}

pub fn strategy_for(kind: AuthStrategyKind) -> Arc<dyn BearerStrategy> {
    match kind {
        AuthStrategyKind::Platform => Arc::new(PlatformStrategy),
        AuthStrategyKind::Direct => Arc::new(DirectStrategy),
    }
}
