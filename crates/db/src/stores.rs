//! Assembles the persistence-backed collaborators every binary needs.

use std::sync::Arc;

use concierge_core::audit::AuditSink;
use concierge_core::checkpoint::{
    CheckpointError, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
};
use concierge_core::config::{CheckpointBackend, CheckpointConfig, PaymentConfig};
use concierge_core::payments::{PaymentPolicy, PaymentStateMachine};
use tracing::info;

use crate::repositories::{
    SqlCheckpointStore, SqlOrderRepository, SqlPaymentRepository, SqlProductCatalog,
};
use crate::DbPool;

/// Checkpoint store for the configured backend. The SQLite backend shares `pool`.
pub async fn checkpoint_store(
    config: &CheckpointConfig,
    pool: &DbPool,
) -> Result<Arc<dyn CheckpointStore>, CheckpointError> {
    let store: Arc<dyn CheckpointStore> = match config.backend {
        CheckpointBackend::Memory => Arc::new(InMemoryCheckpointStore::new()),
        CheckpointBackend::File => Arc::new(FileCheckpointStore::open(&config.directory).await?),
        CheckpointBackend::Sqlite => Arc::new(SqlCheckpointStore::new(pool.clone())),
    };
    info!(
        event_name = "system.checkpoint.backend_selected",
        backend = config.backend.as_str(),
        "checkpoint store ready"
    );
    Ok(store)
}

/// Payment state machine over the SQL order, payment and product tables.
pub fn payment_state_machine(
    pool: &DbPool,
    config: &PaymentConfig,
    audit: Arc<dyn AuditSink>,
) -> PaymentStateMachine {
    PaymentStateMachine::new(
        Arc::new(SqlOrderRepository::new(pool.clone())),
        Arc::new(SqlPaymentRepository::new(pool.clone())),
        Arc::new(SqlProductCatalog::new(pool.clone())),
        PaymentPolicy::from(config),
        audit,
    )
}
