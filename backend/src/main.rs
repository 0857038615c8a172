use std::sync::Arc;
use std::time::Duration;

use docchat_backend::{
    logging, routes, AppState, Config, CorrelationBroker, DocumentLibrary, FsBlobStore,
    RemoteConverter,
};
use docchat_common::stream;
use tokio::net::TcpListener;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    logging::init(&config.logging.level);

    tracing::info!("Starting DocChat API Gateway {}", VERSION);

    // Initialize components
    let transport = stream::connect(&config.transport).await?;
    let broker = CorrelationBroker::start(transport, config.streams.clone(), &config.broker).await?;

    let store = Arc::new(FsBlobStore::new(&config.storage.root));
    let converter = Arc::new(RemoteConverter::new(
        &config.converter.base_url,
        Duration::from_secs(config.converter.timeout_secs),
    )?);
    tracing::info!(
        "Document store at {}, converter at {}",
        config.storage.root,
        config.converter.base_url
    );

    let broker = Arc::new(broker);
    let state = Arc::new(AppState {
        config: config.clone(),
        broker: broker.clone(),
        documents: Arc::new(DocumentLibrary::new(store, converter)),
    });

    // Build router
    let app = routes::app(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    broker.shutdown().await;
    tracing::info!("DocChat API Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown requested"),
        Err(e) => {
            tracing::error!("Unable to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
