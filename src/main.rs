use std::sync::Arc;

use ride_orchestrator::{AppConfig, AppState, create_router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ride_orchestrator=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let sweeper_config = config.sweeper.clone();

    let app_state = Arc::new(AppState::new(config).await?);
    let _sweeper = app_state.sweeper.clone().spawn(sweeper_config);

    let app = create_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Ride orchestrator listening on {}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
