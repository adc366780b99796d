mod auth;
mod config;
mod error;
mod rate_limit;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use error::AppError;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("planner_api=info".parse()?)
                .add_directive("planner_core=info".parse()?),
        )
        .init();

    let config =
        Arc::new(AppConfig::from_env().map_err(|error| AppError::Config(error.to_string()))?);
    tracing::info!("Starting planner-api with config: {:?}", config);

    let state = AppState::from_config(config).await?;
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("planner-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
