use netwarden::{
    config::ServerConfig,
    context::AppContext,
    error::WardenResult,
    jobs::JobScheduler,
    server,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> WardenResult<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| "netwarden=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("netwarden v{} starting", env!("CARGO_PKG_VERSION"));

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Metrics endpoint
    let (stop_server, server_stopped) = watch::channel(false);
    let metrics_server = match &ctx.config.metrics.addr {
        Some(addr) => {
            let listener = server::bind(addr).await?;
            Some(tokio::spawn(server::serve(listener, server_stopped)))
        }
        None => None,
    };

    // Start background jobs
    let scheduler = Arc::new(JobScheduler::new(Arc::clone(&ctx)));
    if ctx.config.jobs.enabled {
        Arc::clone(&scheduler).start()?;
    } else {
        tracing::warn!("Background jobs disabled (JOBS_ENABLED=false)");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    scheduler.shutdown().await;

    let _ = stop_server.send(true);
    if let Some(handle) = metrics_server {
        match handle.await {
            Ok(result) => result?,
            Err(e) => tracing::error!("Metrics server task failed: {}", e),
        }
    }

    ctx.db.close().await;

    Ok(())
}
