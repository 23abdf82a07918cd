//! element-cost-relay server
//!
//! Wires configuration, PostgreSQL, Redis Streams and the axum router, then
//! runs the coordinator, stream consumer and liveness probe until Ctrl-C.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use element_cost_relay::adapters::{
    router, AppState, BroadcastHub, PostgresPersistence, RedisStreams,
};
use element_cost_relay::application::{Coordinator, StreamConsumer, StreamStatus};
use element_cost_relay::config::{AppConfig, LogFormat, ServerConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(server.log_level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match server.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    init_tracing(&config.server);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        "Starting element-cost-relay"
    );

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to database");
            e
        })?;
    let persistence = Arc::new(PostgresPersistence::new(pool));
    if config.database.ensure_schema {
        persistence.ensure_schema().await?;
        info!("Database schema ensured");
    }

    let stream = match tokio::time::timeout(
        config.redis.timeout(),
        RedisStreams::connect(&config.redis.url, config.stream.consumer_group()),
    )
    .await
    {
        Ok(connected) => Arc::new(connected?),
        Err(_) => return Err("timed out connecting to Redis".into()),
    };
    info!(url = %config.redis.url, "Connected to Redis");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (status_tx, status_rx) = watch::channel(StreamStatus::Connecting);
    let hub = Arc::new(BroadcastHub::new(config.pipeline.subscriber_buffer));

    let coordinator = Coordinator::new(
        config
            .pipeline
            .coordinator_config(&config.stream.output_channel),
        persistence,
        stream.clone(),
        hub.clone(),
    );
    let (handle, coordinator_task) = coordinator.spawn(status_rx.clone(), shutdown_rx.clone());

    let consumer = StreamConsumer::new(
        stream,
        handle.clone(),
        status_tx,
        config.stream.consumer_config(),
    );
    let consumer_shutdown = shutdown_rx.clone();
    let consumer_task = tokio::spawn(async move {
        if let Err(e) = consumer.run(consumer_shutdown).await {
            error!(error = %e, "Stream consumer stopped");
        }
    });

    let liveness_task = tokio::spawn(
        hub.clone()
            .run_liveness(config.pipeline.liveness_interval(), shutdown_rx.clone()),
    );

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!(error = %e, "Cannot listen for Ctrl-C, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    let app = router(AppState {
        hub,
        coordinator: handle,
        stream_status: status_rx,
    });
    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening (health at /health, subscribers at /ws)");

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*server_shutdown.borrow() {
                if server_shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    let _ = tokio::join!(consumer_task, liveness_task, coordinator_task);
    info!("Shutdown complete");
    Ok(())
}
