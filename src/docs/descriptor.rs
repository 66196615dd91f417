use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use utoipa::openapi::security::{
    Flow, Implicit, OAuth2, Scopes, SecurityRequirement, SecurityScheme,
};

use crate::auth::IdentityEndpoints;

/// Name the OAuth2 scheme is registered under in the OpenAPI document
pub const SCHEME_NAME: &str = "oauth2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowType {
    Implicit,
}

/// OAuth2 security scheme advertised to documentation clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySchemeDescriptor {
    pub scheme_name: String,
    pub flow_type: FlowType,
    pub authorization_url: String,
    pub token_url: String,
    /// Scope identifier → description
    pub scopes: BTreeMap<String, String>,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Documented {field} '{documented}' differs from enforced value '{enforced}'")]
pub struct DescriptorMismatch {
    pub field: &'static str,
    pub documented: String,
    pub enforced: String,
}

impl SecuritySchemeDescriptor {
    pub fn from_endpoints(endpoints: &IdentityEndpoints, scope_description: &str) -> Self {
        Self {
            scheme_name: SCHEME_NAME.to_string(),
            flow_type: FlowType::Implicit,
            authorization_url: endpoints.authorization_url.clone(),
            token_url: endpoints.token_url.clone(),
            scopes: endpoints
                .scopes
                .iter()
                .map(|scope| (scope.clone(), scope_description.to_string()))
                .collect(),
        }
    }

    pub fn scope_names(&self) -> Vec<String> {
        self.scopes.keys().cloned().collect()
    }

    pub fn security_scheme(&self) -> SecurityScheme {
        let scopes = Scopes::from_iter(
            self.scopes
                .iter()
                .map(|(name, description)| (name.clone(), description.clone())),
        );
        SecurityScheme::OAuth2(OAuth2::new([Flow::Implicit(Implicit::new(
            self.authorization_url.clone(),
            scopes,
        ))]))
    }

    /// Global requirement: every documented operation asks for all scopes
    pub fn requirement(&self) -> SecurityRequirement {
        SecurityRequirement::new(self.scheme_name.clone(), self.scope_names())
    }

    /// Fail unless this descriptor points at the authority the validator trusts
    pub fn verify_against(&self, endpoints: &IdentityEndpoints) -> Result<(), DescriptorMismatch> {
        let tenant_base = endpoints
            .authority
            .strip_suffix("/v2.0")
            .unwrap_or(&endpoints.authority);
        let tenant_prefix = format!("{}/", tenant_base);

        for (field, url) in [
            ("authorizationUrl", &self.authorization_url),
            ("tokenUrl", &self.token_url),
        ] {
            if !url.starts_with(&tenant_prefix) {
                return Err(mismatch(field, url, &endpoints.authority));
            }
        }

        if self.authorization_url != endpoints.authorization_url {
            return Err(mismatch(
                "authorizationUrl",
                &self.authorization_url,
                &endpoints.authorization_url,
            ));
        }
        if self.token_url != endpoints.token_url {
            return Err(mismatch("tokenUrl", &self.token_url, &endpoints.token_url));
        }

        let documented = self.scope_names();
        let mut enforced = endpoints.scopes.clone();
        enforced.sort();
        enforced.dedup();
        if documented != enforced {
            return Err(mismatch(
                "scopes",
                &documented.join(" "),
                &enforced.join(" "),
            ));
        }
        Ok(())
    }
}

fn mismatch(field: &'static str, documented: &str, enforced: &str) -> DescriptorMismatch {
    DescriptorMismatch {
        field,
        documented: documented.to_string(),
        enforced: enforced.to_string(),
    }
}
