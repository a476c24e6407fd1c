use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use topicbus::api::{self, AppState};
use topicbus::config::Settings;
use topicbus::{db, Bus, ConnectionManager};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting events service");

    let settings = Settings::new().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Initializing event store...");
    let store = db::connect(&settings.database).await?;

    // Connection failures are fatal at startup; there is no retry
    info!("Connecting to message bus...");
    let connection = Arc::new(ConnectionManager::connect(&settings.bus).await.map_err(|e| {
        error!("Failed to connect to message bus: {}", e);
        e
    })?);
    let bus = Bus::new(connection, settings.bus.exchange.clone());

    let app = api::router(AppState {
        store,
        bus: bus.clone(),
    });

    let addr = format!("{}:{}", &settings.server.host, &settings.server.port);
    info!("Starting server on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Closing message bus...");
    bus.close().await?;

    Ok(())
}
