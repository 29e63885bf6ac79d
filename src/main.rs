use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use ara_admission_service::config::Settings;
use ara_admission_service::ratelimit::AdaptiveRateLimiter;
use ara_admission_service::redis::RedisPool;
use ara_admission_service::server::{create_app, AppState};
use ara_admission_service::store::create_counter_store;
use ara_admission_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.log, &settings.otel)?;
    tracing::info!("Configuration loaded");

    // Redis is only needed for the distributed counter store
    let redis_pool = if settings.ratelimit.backend == "redis" {
        match RedisPool::from_config(&settings.redis) {
            Ok(pool) => {
                let pool = Arc::new(pool);
                if let Err(e) = pool.ping().await {
                    tracing::warn!(error = %e, "Redis not reachable at startup, admission will fail open until it recovers");
                }
                Some(pool)
            }
            Err(e) => {
                tracing::error!(error = %e, url = %settings.redis.url, "Invalid Redis configuration");
                None
            }
        }
    } else {
        None
    };

    let store = create_counter_store(&settings.ratelimit, redis_pool.clone());
    let limiter = Arc::new(AdaptiveRateLimiter::new(&settings, store));
    tracing::info!(
        enabled = limiter.is_enabled(),
        base_limit = settings.ratelimit.base_limit,
        window_seconds = settings.ratelimit.window_size_seconds,
        "Admission controller initialized"
    );

    // Start burst monitor and learner in background
    let tasks = limiter.start();
    let shutdown_grace = Duration::from_secs(settings.learning.shutdown_grace_seconds);

    // Create application state and router
    let addr = settings.server_addr();
    let state = AppState::new(settings, Arc::clone(&limiter), redis_pool);
    let app = create_app(state);

    // Start server
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal_handler())
    .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    tasks.shutdown(shutdown_grace).await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
