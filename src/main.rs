use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webapi_host::{routes, run_server, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // LOG_FORMAT=json for production log shipping, pretty (or unset) for development
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "webapi_host=info,tower_http=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(log_format = %log_format, "Starting web API host");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        environment = %config.environment,
        strategy = config.authentication.strategy.name(),
        "Configuration loaded"
    );

    let state = AppState::from_config(config).context("Failed to initialize host")?;
    run_server(state, routes::router()).await?;

    Ok(())
}
