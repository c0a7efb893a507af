mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use concierge_agent::ChatOrchestrator;
use concierge_core::config::{AppConfig, LoadOptions};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use concierge_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let health_task = health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;
    let janitor = spawn_memory_janitor(Arc::clone(&app.orchestrator), Duration::from_secs(60));

    info!(event_name = "system.server.started", correlation_id = "bootstrap", "concierge-server started");
    wait_for_shutdown().await?;
    info!(event_name = "system.server.stopping", correlation_id = "shutdown", "concierge-server stopping");

    janitor.abort();
    health_task.abort();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.db_pool.close()).await.is_err() {
        warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "database pool did not close within the grace period"
        );
    }
    info!(event_name = "system.server.stopped", correlation_id = "shutdown", "concierge-server stopped");
    Ok(())
}

/// Periodically drops session memory that has been idle past its TTL.
fn spawn_memory_janitor(orchestrator: Arc<ChatOrchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let evicted = orchestrator.memory().evict_idle().await;
            if evicted > 0 {
                info!(event_name = "system.memory.evicted", evicted, "evicted idle sessions");
            }
        }
    })
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
