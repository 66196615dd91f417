use crate::auth::types::{AuthError, Principal};
use crate::config::Config;

/// Authorization applied to every dispatched route.
///
/// An authenticated principal is always required; `required_scopes`
/// additionally demands delegated scopes on the token.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationPolicy {
    required_scopes: Vec<String>,
}

impl AuthorizationPolicy {
    pub fn new(required_scopes: Vec<String>) -> Self {
        Self { required_scopes }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.required_scopes.clone())
    }

    pub fn required_scopes(&self) -> &[String] {
        &self.required_scopes
    }

    pub fn evaluate(&self, principal: &Principal) -> Result<(), AuthError> {
        match self
            .required_scopes
            .iter()
            .find(|scope| !principal.has_scope(scope))
        {
            Some(missing) => Err(AuthError::InsufficientScope(missing.clone())),
            None => Ok(()),
        }
    }
}
