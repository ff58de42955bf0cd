use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tracing::{error, info};

use lakehouse_app_backend::api::handlers::AppState;
use lakehouse_app_backend::api::routes::create_router;
use lakehouse_app_backend::config::Config;
use lakehouse_app_backend::services::Services;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    let config = Arc::new(config);

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting server on {}", config.server_address());

    let services = Arc::new(Services::new(config.clone()));

    // Keep the lakebase credential warm in service-auth mode
    if !config.lakebase.instance.is_empty() && !config.workspace.per_request_auth {
        if let Err(e) = services.start_background_refresh().await {
            error!("Failed to start background credential refresh: {}", e);
        }
    }

    let app: Router = create_router(AppState {
        config: config.clone(),
        services,
    });

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown initiated");
}
