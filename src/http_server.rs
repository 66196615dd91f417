use crate::auth::{authenticate, authorize, strategy_for, AuthorizationPolicy, TokenValidator};
use crate::config::{Config, ConfigError, Environment};
use crate::docs::{self, ApiDocumentation, DescriptorMismatch, SecuritySchemeDescriptor};
use crate::transport::{self, TransportPolicy};
use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("API documentation disagrees with token validation: {0}")]
    DescriptorMismatch(#[from] DescriptorMismatch),

    #[error("Failed to build OpenAPI document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("Invalid request pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state, immutable after startup
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub validator: Arc<TokenValidator>,
    pub policy: Arc<AuthorizationPolicy>,
    /// Present only outside production
    pub docs: Option<Arc<ApiDocumentation>>,
}

impl AppState {
    /// Build the validator for the configured strategy and, outside production,
    /// the documentation derived from the same endpoints
    pub fn from_config(config: Config) -> Result<Self, StartupError> {
        let strategy = strategy_for(config.authentication.strategy);
        let validator = strategy.build_validator(&config)?;

        info!(
            strategy = strategy.kind().name(),
            authority = %validator.endpoints().authority,
            audiences = ?validator.endpoints().audiences,
            domain = config.identity.domain.as_deref().unwrap_or("-"),
            "Bearer token validation configured"
        );

        let docs = if config.environment.is_production() {
            None
        } else {
            let descriptor = SecuritySchemeDescriptor::from_endpoints(
                validator.endpoints(),
                &config.identity.scope_description,
            );
            let docs = ApiDocumentation::build(&config.docs_title, &config.identity, descriptor)?;
            docs.verify_against(validator.endpoints())?;
            Some(Arc::new(docs))
        };

        Ok(Self {
            policy: Arc::new(AuthorizationPolicy::from_config(&config)),
            config: Arc::new(config),
            validator: Arc::new(validator),
            docs,
        })
    }
}

/// Middleware stages, in the order a request passes through them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Documentation,
    StrictTransportSecurity,
    HttpsRedirection,
    Routing,
    Authentication,
    Authorization,
    Dispatch,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Required stage {0:?} is missing")]
    MissingStage(Stage),

    #[error("Stage {0:?} appears more than once")]
    DuplicateStage(Stage),

    #[error("Stage {later:?} must run after {earlier:?}")]
    OutOfOrder { earlier: Stage, later: Stage },
}

/// Stages every pipeline runs, in this relative order
const REQUIRED_STAGES: [Stage; 5] = [
    Stage::HttpsRedirection,
    Stage::Routing,
    Stage::Authentication,
    Stage::Authorization,
    Stage::Dispatch,
];

/// Ordered middleware chain, fixed once the environment is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Documentation outside production, HSTS outside development
    pub fn for_environment(environment: &Environment) -> Result<Self, PipelineError> {
        let mut stages = Vec::with_capacity(REQUIRED_STAGES.len() + 2);
        if !environment.is_production() {
            stages.push(Stage::Documentation);
        }
        if !environment.is_development() {
            stages.push(Stage::StrictTransportSecurity);
        }
        stages.extend(REQUIRED_STAGES);
        Self::from_stages(stages)
    }

    /// Accept a custom stage list if it honors the ordering rules
    pub fn from_stages(stages: Vec<Stage>) -> Result<Self, PipelineError> {
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].contains(stage) {
                return Err(PipelineError::DuplicateStage(*stage));
            }
        }

        let position = |stage: Stage| stages.iter().position(|s| *s == stage);

        let mut previous: Option<(Stage, usize)> = None;
        for required in REQUIRED_STAGES {
            let at = position(required).ok_or(PipelineError::MissingStage(required))?;
            if let Some((earlier, earlier_at)) = previous {
                if at < earlier_at {
                    return Err(PipelineError::OutOfOrder {
                        earlier,
                        later: required,
                    });
                }
            }
            previous = Some((required, at));
        }

        // Leading stages run before transport enforcement
        let redirect_at = position(Stage::HttpsRedirection).unwrap_or_default();
        for leading in [Stage::Documentation, Stage::StrictTransportSecurity] {
            if position(leading).is_some_and(|at| at > redirect_at) {
                return Err(PipelineError::OutOfOrder {
                    earlier: leading,
                    later: Stage::HttpsRedirection,
                });
            }
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    /// Wire the stages around `api`, first stage outermost.
    ///
    /// Stages after `Routing` wrap matched routes only; unmatched paths fall
    /// through to a 404 once the stages ahead of routing have run.
    pub fn assemble(&self, state: AppState, api: Router<AppState>) -> Router {
        let transport_policy = TransportPolicy::from_config(&state.config.server);

        let mut router = api.fallback(not_found);
        // Innermost stage is layered first
        for stage in self.stages.iter().rev() {
            router = match stage {
                Stage::Authorization => {
                    router.route_layer(middleware::from_fn_with_state(state.clone(), authorize))
                }
                Stage::Authentication => router
                    .route_layer(middleware::from_fn_with_state(state.clone(), authenticate)),
                Stage::HttpsRedirection => router.layer(middleware::from_fn_with_state(
                    transport_policy.clone(),
                    transport::redirect_to_https,
                )),
                Stage::StrictTransportSecurity => router.layer(middleware::from_fn_with_state(
                    transport_policy.clone(),
                    transport::strict_transport_security,
                )),
                // Documentation answers its own paths ahead of every later stage
                Stage::Documentation => match &state.docs {
                    Some(api_docs) => docs::ui::router(Arc::clone(api_docs)).merge(router),
                    None => {
                        warn!("Documentation stage requested but no documentation was built");
                        router
                    }
                },
                Stage::Routing | Stage::Dispatch => router,
            };
        }

        router.layer(TraceLayer::new_for_http()).with_state(state)
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" }))).into_response()
}

/// Create the application router for the configured environment
pub fn create_app(state: AppState, api: Router<AppState>) -> Result<Router, PipelineError> {
    let pipeline = Pipeline::for_environment(&state.config.environment)?;
    Ok(pipeline.assemble(state, api))
}

/// Run the HTTP server until Ctrl-C or SIGTERM
pub async fn run_server(state: AppState, api: Router<AppState>) -> Result<(), StartupError> {
    let config = Arc::clone(&state.config);
    let pipeline = Pipeline::for_environment(&config.environment)?;
    info!(
        environment = %config.environment,
        stages = ?pipeline.stages(),
        "Request pipeline assembled"
    );

    let app = pipeline.assemble(state, api);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {}", addr);
    if !config.environment.is_production() {
        info!("API documentation: http://{}{}", addr, docs::ui::UI_PATH);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down HTTP server");
}
