pub mod endpoints;
pub mod middleware;
pub mod policy;
pub mod strategy;
pub mod token_validator;
pub mod types;

pub use endpoints::IdentityEndpoints;
pub use middleware::{authenticate, authorize, bearer_token};
pub use policy::AuthorizationPolicy;
pub use strategy::{strategy_for, BearerStrategy, DirectStrategy, PlatformStrategy, COMMON_TENANT};
pub use token_validator::{TokenValidator, ValidatorSettings};
pub use types::{AuthError, Principal};
