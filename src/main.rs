use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shorturl::analytics::build_geo_locator;
use shorturl::app::{build_router, Services};
use shorturl::config::Config;
use shorturl::storage;

/// Upper bound for draining clicks and closing the pool
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    info!("Initializing database...");
    let storage = storage::connect(&config.database).await?;
    info!("Database initialized successfully");

    match storage.pool_stats().await {
        Ok(stats) => info!(
            total = stats.total,
            available = stats.available,
            taken = stats.taken,
            "Code pool status"
        ),
        Err(e) => warn!(error = %e, "Could not read code pool status"),
    }

    let geo = build_geo_locator(&config.analytics)?;
    let services = Services::build(&config, Arc::clone(&storage), geo);

    if services.auth.is_enabled() {
        info!("🔐 API key authentication enabled ({} keys)", config.auth.api_keys.len());
    } else {
        info!("🔓 Authentication is disabled - all API requests are allowed");
    }
    if services.auth.reports_protected() {
        info!("Report endpoint requires the X-API-Key header");
    } else {
        info!("Report endpoint is open (set REPORT_REQUIRE_API_KEY=true to protect it)");
    }

    let app = build_router(&config, &services);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🚀 Server listening on http://{}", addr);
    info!("   - Generate: POST http://{}/shorturl/generate", addr);
    info!("   - Report:   POST http://{}/shorturl/report", addr);
    info!("   - Redirect: GET  http://{}/shorturl/{{code}}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("Server stopped, flushing pending clicks...");
    match tokio::time::timeout(
        Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
        services.shutdown(),
    )
    .await
    {
        Ok(()) => info!("All shutdown tasks completed successfully"),
        Err(_) => error!(
            "Shutdown tasks timed out after {} seconds, pending clicks may be lost",
            SHUTDOWN_TIMEOUT_SECS
        ),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
