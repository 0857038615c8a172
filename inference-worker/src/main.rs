//! DocChat worker - drains the request stream and answers with LLM completions.

use std::env;
use std::sync::Arc;

use docchat_common::stream;
use inference_worker::{Config, OpenAiCompatibleEngine, ProviderRouter, WorkerPool};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("docchat-worker {}", VERSION);
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load().map_err(|e| format!("Failed to load configuration: {}", e))?;
    tracing::info!("Starting docchat-worker {}", VERSION);

    // Register providers
    let router = Arc::new(ProviderRouter::new(config.default_provider.clone()));
    for (name, provider) in &config.providers {
        let engine = OpenAiCompatibleEngine::from_config(name, provider)?;
        if provider.resolve_api_key().is_none() {
            tracing::warn!("Provider {} has no API key; its requests will fail", name);
        }
        router.register(name.clone(), Arc::new(engine)).await;
        tracing::info!("Registered provider {} at {}", name, provider.base_url);
    }
    tracing::info!(
        "Default provider: {} (available: {})",
        config.default_provider,
        router.names().await.join(", ")
    );

    // Connect the transport and make sure the request group exists
    let transport = stream::connect(&config.transport).await?;
    transport
        .ensure_group(&config.streams.request_stream, &config.streams.request_group)
        .await?;

    let pool = WorkerPool::new(
        transport,
        router,
        config.streams.clone(),
        config.worker.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!("Unable to listen for shutdown signal: {}", e);
                // Keep the sender alive so the workers keep running
                std::future::pending::<()>().await;
            }
        }
    });

    pool.run(shutdown_rx).await;
    tracing::info!("docchat-worker stopped");

    Ok(())
}
