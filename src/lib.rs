pub mod auth;
pub mod config;
pub mod docs;
pub mod http_server;
pub mod routes;
pub mod transport;

pub use auth::{AuthError, AuthorizationPolicy, BearerStrategy, Principal, TokenValidator};
pub use config::{Config, ConfigError, Environment};
pub use docs::{ApiDocumentation, SecuritySchemeDescriptor};
pub use http_server::{create_app, run_server, AppState, Pipeline, Stage, StartupError};
