use anyhow::{Context, Result};
use sigma::api::{self, QueryAppState, WsAppState};
use sigma::config::{load_config, SigmaConfig};
use sigma::hub::BroadcastHub;
use sigma::ingest::IngestionCoordinator;
use sigma::nats::{run_subscriber, NatsClient};
use sigma::store::{ReadingStore, SqliteStore};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sigma=info".into()),
        )
        .init();

    info!("SIGMA starting...");

    let config = match std::env::var("SIGMA_CONFIG") {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            load_config(&path)?
        }
        Err(_) => {
            info!("SIGMA_CONFIG not set, using defaults");
            SigmaConfig::default()
        }
    };

    // Store
    let store: Arc<dyn ReadingStore> = Arc::new(
        SqliteStore::open(&config.store.path)
            .with_context(|| format!("Failed to open store at '{}'", config.store.path))?,
    );
    info!(path = %config.store.path, "Opened reading store");

    // Pipeline
    let hub = BroadcastHub::new(config.hub.viewer_buffer);
    let coordinator = IngestionCoordinator::new(
        Arc::new(config.rule_table()),
        Arc::clone(&store),
        hub.clone(),
        config.ingest.lane_idle(),
    );

    // NATS
    let nats = NatsClient::connect(config.nats.clone()).await?;
    let messages = nats.subscribe().await?;
    let subscriber = tokio::spawn(run_subscriber(messages, coordinator.clone()));

    // HTTP / WebSocket
    let query_state = Arc::new(QueryAppState {
        store,
        coordinator,
        history_max_limit: config.api.history_max_limit,
    });
    let ws_state = Arc::new(WsAppState {
        hub,
        heartbeat: config.hub.heartbeat(),
    });
    let app = api::router(query_state, ws_state, &config.api.cors_origins);

    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind))?;
    info!(bind = %config.api.bind, "HTTP server listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("HTTP server failed")?;
        }
        result = subscriber => {
            let result = result.context("Subscriber task panicked")?;
            if let Err(e) = &result {
                error!(error = %e, "Reading subscriber stopped");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("SIGMA stopped");
    Ok(())
}
