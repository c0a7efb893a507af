use std::sync::Arc;

use concierge_agent::{
    standard_registry, ChatOrchestrator, LlmClassifier, LlmClient, OfflineLlmClient, RetryingLlmClient,
};
use concierge_core::audit::TracingAuditSink;
use concierge_core::checkpoint::CheckpointError;
use concierge_core::config::{AppConfig, ConfigError, LoadOptions};
use concierge_core::memory::{DigestSummarizer, MemorySettings, SessionMemoryManager};
use concierge_core::workflow::GraphBuildError;
use concierge_db::{checkpoint_store, connect_from_config, migrations, payment_state_machine, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<ChatOrchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("checkpoint store unavailable: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("chat graph is invalid: {0}")]
    Graph(#[from] GraphBuildError),
}

#[cfg_attr(not(test), allow(dead_code))]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Connects, migrates and wires the orchestrator. The pool is owned by the
/// returned application and closed by the caller on shutdown.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        checkpoint_backend = config.checkpoint.backend.as_str(),
        "starting application bootstrap"
    );

    let db_pool = connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let checkpoints = checkpoint_store(&config.checkpoint, &db_pool).await?;
    let machine = Arc::new(payment_state_machine(&db_pool, &config.payment, Arc::new(TracingAuditSink)));
    let client: Arc<dyn LlmClient> =
        Arc::new(RetryingLlmClient::from_config(Arc::new(OfflineLlmClient), &config.llm));
    let registry = standard_registry(Arc::clone(&client), machine);
    let memory = Arc::new(SessionMemoryManager::new(
        MemorySettings::from(&config.memory),
        Arc::new(DigestSummarizer::default()),
    ));
    let orchestrator = ChatOrchestrator::new(
        Arc::new(LlmClassifier::new(client)),
        &registry,
        memory,
        checkpoints,
        &config.workflow,
    )?;
    info!(
        event_name = "system.bootstrap.orchestrator_ready",
        correlation_id = "bootstrap",
        handlers = registry.len(),
        llm_model = %config.llm.model,
        "chat orchestrator ready"
    );

    Ok(Application { config, db_pool, orchestrator: Arc::new(orchestrator) })
}

#[cfg(test)]
mod tests {
    use concierge_agent::TurnRequest;
    use concierge_core::config::{CheckpointBackend, ConfigOverrides, LoadOptions};
    use concierge_core::domain::conversation::{Intent, TurnContext};
    use concierge_db::DemoCatalog;

    use crate::bootstrap::{bootstrap, BootstrapError};

    fn options(database_url: String, backend: CheckpointBackend) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url),
                checkpoint_backend: Some(backend),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_configuration() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                default_currency: Some("XYZ".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(matches!(result, Err(BootstrapError::Config(_))));
    }

    #[tokio::test]
    async fn bootstrapped_orchestrator_serves_seeded_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("concierge.db").display());
        let app = bootstrap(options(url, CheckpointBackend::Sqlite)).await.expect("bootstrap");
        DemoCatalog::seed(&app.db_pool).await.expect("seed");

        let reply = app
            .orchestrator
            .handle_turn(TurnRequest {
                session_id: Some("session_boot".to_string()),
                message: "Show me laptops".to_string(),
                context: TurnContext::new(),
            })
            .await
            .expect("turn");
        assert_eq!(reply.intent, Some(Intent::ProductSearch));
        assert!(reply.reply.contains("ThinkPad"));

        let (checkpoints,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM workflow_checkpoint WHERE thread_id = 'session_boot'")
                .fetch_one(&app.db_pool)
                .await
                .expect("count");
        assert_eq!(checkpoints, 1);

        app.db_pool.close().await;
    }
}
