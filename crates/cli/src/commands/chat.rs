use std::sync::Arc;

use concierge_agent::{
    standard_registry, ChatOrchestrator, LlmClassifier, LlmClient, OfflineLlmClient, RetryingLlmClient,
    TurnReply, TurnRequest,
};
use concierge_core::audit::TracingAuditSink;
use concierge_core::config::{AppConfig, CheckpointBackend};
use concierge_core::errors::{ApplicationError, InterfaceError};
use concierge_core::memory::{DigestSummarizer, MemorySettings, SessionMemoryManager};
use concierge_db::{checkpoint_store, payment_state_machine, DbPool};
use serde::Serialize;

use crate::commands::{open_migrated, prepare, serialize_json, CommandResult, StepFailure};

#[derive(Debug, Serialize)]
struct ChatOutcome<'a> {
    command: &'static str,
    status: &'static str,
    #[serde(flatten)]
    turn: &'a TurnReply,
}

/// Runs a single conversation turn. A `memory` checkpoint backend is swapped
/// for `sqlite` so `--session` can pick up where a previous invocation left off.
pub fn run(session: Option<String>, message: String) -> CommandResult {
    let (config, runtime) = match prepare("chat") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let turn = async {
            let orchestrator = assemble(&config, &pool).await?;
            orchestrator
                .handle_turn(TurnRequest { session_id: session, message, ..TurnRequest::default() })
                .await
                .map_err(turn_failure)
        }
        .await;
        pool.close().await;
        turn
    });

    match result {
        Ok(turn) => CommandResult {
            exit_code: 0,
            output: serialize_json(&ChatOutcome { command: "chat", status: "ok", turn: &turn }),
        },
        Err(failure) => CommandResult::from_step("chat", failure),
    }
}

async fn assemble(config: &AppConfig, pool: &DbPool) -> Result<ChatOrchestrator, StepFailure> {
    let mut checkpoint_config = config.checkpoint.clone();
    if checkpoint_config.backend == CheckpointBackend::Memory {
        checkpoint_config.backend = CheckpointBackend::Sqlite;
    }
    let checkpoints = checkpoint_store(&checkpoint_config, pool)
        .await
        .map_err(|error| ("checkpoint_backend", error.to_string(), 6u8))?;
    let machine = Arc::new(payment_state_machine(pool, &config.payment, Arc::new(TracingAuditSink)));
    let client: Arc<dyn LlmClient> =
        Arc::new(RetryingLlmClient::from_config(Arc::new(OfflineLlmClient), &config.llm));
    let registry = standard_registry(Arc::clone(&client), machine);
    let memory = Arc::new(SessionMemoryManager::new(
        MemorySettings::from(&config.memory),
        Arc::new(DigestSummarizer::default()),
    ));

    ChatOrchestrator::new(
        Arc::new(LlmClassifier::new(client)),
        &registry,
        memory,
        checkpoints,
        &config.workflow,
    )
    .map_err(|error| ("workflow_graph", error.to_string(), 7u8))
}

fn turn_failure(error: ApplicationError) -> StepFailure {
    match error.into_interface("cli") {
        InterfaceError::BadRequest { message, .. } => ("bad_request", message, 8),
        InterfaceError::NotFound { message, .. } => ("not_found", message, 8),
        InterfaceError::Conflict { message, .. } => ("conflict", message, 8),
        InterfaceError::ServiceUnavailable { message, .. } => ("service_unavailable", message, 9),
        InterfaceError::Internal { message, .. } => ("internal", message, 9),
    }
}
