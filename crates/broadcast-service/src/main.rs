//! Meeting Broadcast Service
//!
//! Pushes newly persisted meeting messages to every participant connected to
//! that meeting over WebSocket.
//!
//! # Startup
//!
//! 1. Load configuration and install the Prometheus recorder
//! 2. Build the registry backend (Redis or in-memory)
//! 3. Wire hub, gateway, lifecycle handler and feed trigger
//! 4. Start the health/metrics server, then the push-channel server
//! 5. Spawn the change-feed consumer (whenever `REDIS_URL` is set)
//! 6. Wait for Ctrl+C/SIGTERM, mark not-ready, cancel, drain

use axum::Router;
use broadcast_service::config::{Config, RegistryBackend};
use broadcast_service::feed::{ChangeFeedTrigger, FeedConsumer, FeedSettings};
use broadcast_service::gateway::{BroadcastGateway, ConnectionHub};
use broadcast_service::lifecycle::ConnectionLifecycleHandler;
use broadcast_service::observability::{health_router, init_metrics_recorder, HealthState};
use broadcast_service::registry::redis::open_connection;
use broadcast_service::registry::{
    ConnectionRegistry, MemoryConnectionRegistry, RedisConnectionRegistry,
};
use broadcast_service::ws::{ws_router, WsState};
use common::secret::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time given to sessions and tasks to wind down after cancellation.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broadcast_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Meeting Broadcast Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        registry_backend = config.registry_backend.as_str(),
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        instance_id = %config.instance_id,
        feed_stream = %config.feed_stream,
        feed_group = %config.feed_group,
        push_timeout_ms = config.push_timeout.as_millis(),
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    let registry: Arc<dyn ConnectionRegistry> = match config.registry_backend {
        RegistryBackend::Redis => {
            let redis_url = config
                .redis_url
                .as_ref()
                .ok_or("REDIS_URL is required for the redis registry backend")?;
            info!("Connecting to Redis...");
            let registry = RedisConnectionRegistry::new(redis_url.expose_secret()).await?;
            info!("Redis connection established");
            Arc::new(registry)
        }
        RegistryBackend::Memory => {
            info!("Using in-memory connection registry");
            Arc::new(MemoryConnectionRegistry::new())
        }
    };

    let hub = Arc::new(ConnectionHub::new());
    let gateway = BroadcastGateway::new(hub.clone(), config.push_timeout);
    let lifecycle = ConnectionLifecycleHandler::new(Arc::clone(&registry));
    let trigger = ChangeFeedTrigger::new(Arc::clone(&registry), gateway);

    // Health + metrics server
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind before spawning so bind errors fail startup
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Push-channel server
    let ws_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let ws_app = ws_router(WsState {
        hub,
        lifecycle,
        outbound_buffer: config.outbound_buffer,
        shutdown: shutdown_token.child_token(),
    });

    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind push-channel server");
        format!("Failed to bind push-channel server to {ws_addr}: {e}")
    })?;

    let ws_shutdown = shutdown_token.child_token();
    let ws_health = Arc::clone(&health_state);
    tokio::spawn(async move {
        info!(addr = %ws_addr, "Push-channel server starting");
        ws_health.set_serving(true);
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown.cancelled().await;
            info!("Push-channel server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Push-channel server failed");
        }
        ws_health.set_serving(false);
    });

    // Change-feed consumer
    if let Some(redis_url) = config.redis_url.as_ref() {
        let connection = open_connection(redis_url.expose_secret()).await?;
        let consumer = FeedConsumer::new(
            connection,
            trigger,
            FeedSettings {
                stream: config.feed_stream.clone(),
                group: config.feed_group.clone(),
                consumer: config.instance_id.clone(),
                batch_size: config.feed_batch_size,
                block: config.feed_block,
                pending_retry: config.feed_pending_retry,
            },
        );
        consumer.ensure_group().await.map_err(|e| {
            error!(error = %e, "Failed to prepare change-feed consumer group");
            e
        })?;

        let consumer_token = shutdown_token.child_token();
        let consumer_health = Arc::clone(&health_state);
        tokio::spawn(async move {
            consumer.run(consumer_token, consumer_health).await;
        });
        info!("Change-feed consumer started");
    } else {
        warn!("REDIS_URL not set: change-feed consumer disabled, nothing will be broadcast");
        health_state.set_consuming(true);
    }

    info!("Meeting Broadcast Service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();
    shutdown_token.cancel();

    tokio::time::sleep(SHUTDOWN_DRAIN).await;

    info!("Meeting Broadcast Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
