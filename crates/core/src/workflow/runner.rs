use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::workflow::node::{Fallback, GraphState, Node, NodeError, Resume, Router};

pub const DEFAULT_MAX_STEPS: usize = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Node(usize),
    End,
}

pub(crate) enum CompiledEdge<S> {
    Direct(Step),
    Conditional { router: Arc<dyn Router<S>>, routes: HashMap<String, Step>, default: Option<Step> },
}

pub(crate) struct CompiledNode<S: GraphState> {
    pub(crate) id: String,
    pub(crate) node: Arc<dyn Node<S>>,
    pub(crate) fallback: Option<Fallback<S>>,
    pub(crate) edge: CompiledEdge<S>,
}

#[derive(Debug, Error)]
pub enum GraphExecutionError {
    #[error("workflow exceeded the step limit of {limit} before running `{next_node}`")]
    StepLimitExceeded { limit: usize, next_node: String },
    #[error("router on `{node}` returned unmapped label `{label}`")]
    UnmappedRoute { node: String, label: String },
    #[error("could not encode workflow state: {0}")]
    Encode(String),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Clone, Debug)]
pub struct RunOutcome<S> {
    pub state: S,
    pub steps: usize,
    /// Node ids in execution order.
    pub path: Vec<String>,
    /// Nodes whose fallback was applied.
    pub degraded: Vec<String>,
    pub checkpoint: Option<Checkpoint>,
}

/// A compiled, immutable workflow. Safe to run concurrently from many tasks.
pub struct Workflow<S: GraphState> {
    pub(crate) nodes: Vec<CompiledNode<S>>,
    pub(crate) entry: usize,
    pub(crate) max_steps: usize,
    pub(crate) node_timeout: Option<Duration>,
    pub(crate) checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl<S: GraphState> Workflow<S> {
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.id.as_str())
    }

    pub fn entry(&self) -> &str {
        &self.nodes[self.entry].id
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Runs to completion without writing a checkpoint.
    pub async fn run(&self, initial: S) -> Result<RunOutcome<S>, GraphExecutionError> {
        let mut state = initial;
        let mut current = Step::Node(self.entry);
        let mut steps = 0;
        let mut path = Vec::new();
        let mut degraded = Vec::new();

        while let Step::Node(position) = current {
            let compiled = &self.nodes[position];
            if steps == self.max_steps {
                return Err(GraphExecutionError::StepLimitExceeded {
                    limit: self.max_steps,
                    next_node: compiled.id.clone(),
                });
            }
            steps += 1;
            path.push(compiled.id.clone());
            debug!(event_name = "workflow.node.started", node = %compiled.id, step = steps);

            match self.run_node(compiled, &state).await {
                Ok(update) => {
                    state.merge(update);
                    current = next_step(compiled, &state)?;
                }
                Err(error) => {
                    warn!(
                        event_name = "workflow.node.failed",
                        node = %compiled.id,
                        step = steps,
                        error = %error,
                        "node failed; applying fallback"
                    );
                    degraded.push(compiled.id.clone());
                    let (update, resume) = match &compiled.fallback {
                        Some(fallback) => (fallback.update(&error), fallback.resume()),
                        None => (S::degraded(&compiled.id, &error), Resume::End),
                    };
                    state.merge(update);
                    current = match resume {
                        Resume::End => Step::End,
                        Resume::FollowEdges => next_step(compiled, &state)?,
                    };
                }
            }
        }

        debug!(event_name = "workflow.run.completed", steps, degraded = degraded.len());
        Ok(RunOutcome { state, steps, path, degraded, checkpoint: None })
    }

    async fn run_node(&self, compiled: &CompiledNode<S>, state: &S) -> Result<S::Update, NodeError> {
        match self.node_timeout {
            Some(limit) => match tokio::time::timeout(limit, compiled.node.run(state)).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::TimedOut(limit)),
            },
            None => compiled.node.run(state).await,
        }
    }
}

impl<S> Workflow<S>
where
    S: GraphState + Serialize + DeserializeOwned,
{
    /// Runs to completion and, when a checkpoint store is attached, persists the
    /// final state exactly once. Failed or cancelled runs write nothing.
    pub async fn run_thread(
        &self,
        thread_id: &str,
        initial: S,
    ) -> Result<RunOutcome<S>, GraphExecutionError> {
        let mut outcome = self.run(initial).await?;
        if let Some(store) = &self.checkpoints {
            let snapshot = serde_json::to_value(&outcome.state)
                .map_err(|error| GraphExecutionError::Encode(error.to_string()))?;
            outcome.checkpoint = Some(store.put(thread_id, snapshot).await?);
        }
        Ok(outcome)
    }

    /// Latest persisted state for the thread, if any.
    pub async fn latest_state(&self, thread_id: &str) -> Result<Option<S>, GraphExecutionError> {
        let Some(store) = &self.checkpoints else {
            return Ok(None);
        };
        match store.get_latest(thread_id).await? {
            Some(checkpoint) => Ok(Some(checkpoint.decode()?)),
            None => Ok(None),
        }
    }
}

fn next_step<S: GraphState>(compiled: &CompiledNode<S>, state: &S) -> Result<Step, GraphExecutionError> {
    match &compiled.edge {
        CompiledEdge::Direct(step) => Ok(*step),
        CompiledEdge::Conditional { router, routes, default } => {
            let label = router.route(state);
            routes.get(&label).copied().or(*default).ok_or_else(|| {
                GraphExecutionError::UnmappedRoute { node: compiled.id.clone(), label }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    use crate::checkpoint::{
        Checkpoint, CheckpointError, CheckpointStore, InMemoryCheckpointStore,
    };
    use crate::workflow::{
        node_fn, router_fn, Fallback, GraphBuildError, GraphBuilder, GraphExecutionError,
        GraphState, NodeError, Resume, Routes, END,
    };

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Tally {
        value: i64,
        notes: Vec<String>,
        reply: Option<String>,
    }

    #[derive(Default)]
    struct TallyUpdate {
        add: i64,
        note: Option<String>,
        reply: Option<String>,
    }

    impl GraphState for Tally {
        type Update = TallyUpdate;

        fn merge(&mut self, update: TallyUpdate) {
            self.value += update.add;
            self.notes.extend(update.note);
            if self.reply.is_none() {
                self.reply = update.reply;
            }
        }

        fn degraded(node: &str, _error: &NodeError) -> TallyUpdate {
            TallyUpdate { reply: Some(format!("{node} degraded")), ..TallyUpdate::default() }
        }
    }

    fn add(amount: i64, note: &'static str) -> impl Fn(Tally) -> std::future::Ready<Result<TallyUpdate, NodeError>> {
        move |_| {
            std::future::ready(Ok(TallyUpdate {
                add: amount,
                note: Some(note.to_string()),
                reply: None,
            }))
        }
    }

    fn parity_router() -> impl crate::workflow::Router<Tally> {
        router_fn(["even", "odd"], |state: &Tally| {
            if state.value % 2 == 0 { "even".to_string() } else { "odd".to_string() }
        })
    }

    #[tokio::test]
    async fn linear_graph_runs_nodes_in_order() {
        let workflow = GraphBuilder::new()
            .register_node("first", node_fn(add(1, "first")))
            .register_node("second", node_fn(add(2, "second")))
            .set_entry("first")
            .add_edge("first", "second")
            .add_edge("second", END)
            .compile()
            .expect("valid graph");

        let outcome = workflow.run(Tally::default()).await.expect("run");
        assert_eq!(outcome.state.value, 3);
        assert_eq!(outcome.path, vec!["first", "second"]);
        assert_eq!(outcome.steps, 2);
        assert!(outcome.degraded.is_empty());
    }

    #[tokio::test]
    async fn conditional_edge_follows_router_label() {
        let workflow = GraphBuilder::new()
            .register_node("start", node_fn(add(3, "start")))
            .register_node("even", node_fn(add(0, "even")))
            .register_node("odd", node_fn(add(0, "odd")))
            .set_entry("start")
            .add_conditional_edge(
                "start",
                parity_router(),
                Routes::new().route("even", "even").route("odd", "odd"),
            )
            .add_edge("even", END)
            .add_edge("odd", END)
            .compile()
            .expect("valid graph");

        let outcome = workflow.run(Tally::default()).await.expect("run");
        assert_eq!(outcome.path, vec!["start", "odd"]);
    }

    #[tokio::test]
    async fn unmapped_label_uses_default_route() {
        let workflow = GraphBuilder::new()
            .register_node("start", node_fn(add(2, "start")))
            .register_node("fallback", node_fn(add(0, "fallback")))
            .set_entry("start")
            .add_conditional_edge(
                "start",
                parity_router(),
                Routes::new().route("odd", END).otherwise("fallback"),
            )
            .add_edge("fallback", END)
            .compile()
            .expect("valid graph");

        let outcome = workflow.run(Tally::default()).await.expect("run");
        assert_eq!(outcome.path, vec!["start", "fallback"]);
    }

    #[test]
    fn compile_rejects_structural_mistakes() {
        let missing_entry = GraphBuilder::<Tally>::new()
            .register_node("a", node_fn(add(1, "a")))
            .add_edge("a", END)
            .compile();
        assert!(matches!(missing_entry, Err(GraphBuildError::MissingEntry)));

        let unknown_target = GraphBuilder::<Tally>::new()
            .register_node("a", node_fn(add(1, "a")))
            .set_entry("a")
            .add_edge("a", "nowhere")
            .compile();
        assert!(matches!(
            unknown_target,
            Err(GraphBuildError::UnknownNode { ref id, .. }) if id == "nowhere"
        ));

        let duplicate = GraphBuilder::<Tally>::new()
            .register_node("a", node_fn(add(1, "a")))
            .register_node("a", node_fn(add(1, "a")))
            .set_entry("a")
            .add_edge("a", END)
            .compile();
        assert!(matches!(duplicate, Err(GraphBuildError::DuplicateNode(_))));

        let dangling = GraphBuilder::<Tally>::new()
            .register_node("a", node_fn(add(1, "a")))
            .register_node("b", node_fn(add(1, "b")))
            .set_entry("a")
            .add_edge("a", "b")
            .compile();
        assert!(matches!(dangling, Err(GraphBuildError::MissingEdge(ref id)) if id == "b"));

        let unmapped = GraphBuilder::<Tally>::new()
            .register_node("a", node_fn(add(1, "a")))
            .set_entry("a")
            .add_conditional_edge("a", parity_router(), Routes::new().route("even", END))
            .compile();
        assert!(matches!(
            unmapped,
            Err(GraphBuildError::UnmappedLabel { ref label, .. }) if label == "odd"
        ));
    }

    #[tokio::test]
    async fn failing_node_applies_default_degraded_update_and_ends() {
        let workflow = GraphBuilder::new()
            .register_node(
                "broken",
                node_fn(|_: Tally| async { Err::<TallyUpdate, _>(NodeError::failed("boom")) }),
            )
            .register_node("after", node_fn(add(10, "after")))
            .set_entry("broken")
            .add_edge("broken", "after")
            .add_edge("after", END)
            .compile()
            .expect("valid graph");

        let outcome = workflow.run(Tally::default()).await.expect("failure is absorbed");
        assert_eq!(outcome.state.reply.as_deref(), Some("broken degraded"));
        assert_eq!(outcome.path, vec!["broken"]);
        assert_eq!(outcome.degraded, vec!["broken"]);
    }

    #[tokio::test]
    async fn fallback_may_resume_along_edges() {
        let workflow = GraphBuilder::new()
            .register_node(
                "broken",
                node_fn(|_: Tally| async { Err::<TallyUpdate, _>(NodeError::failed("boom")) }),
            )
            .register_node("after", node_fn(add(10, "after")))
            .set_entry("broken")
            .add_edge("broken", "after")
            .add_edge("after", END)
            .with_fallback(
                "broken",
                Fallback::new(Resume::FollowEdges, |_| TallyUpdate {
                    note: Some("recovered".to_string()),
                    ..TallyUpdate::default()
                }),
            )
            .compile()
            .expect("valid graph");

        let outcome = workflow.run(Tally::default()).await.expect("run");
        assert_eq!(outcome.state.value, 10);
        assert_eq!(outcome.state.notes, vec!["recovered", "after"]);
    }

    #[tokio::test]
    async fn slow_node_times_out_into_fallback() {
        let workflow = GraphBuilder::new()
            .register_node(
                "slow",
                node_fn(|_: Tally| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok::<_, NodeError>(TallyUpdate { add: 1, ..TallyUpdate::default() })
                }),
            )
            .set_entry("slow")
            .add_edge("slow", END)
            .node_timeout(Duration::from_millis(10))
            .compile()
            .expect("valid graph");

        let outcome = workflow.run(Tally::default()).await.expect("timeout is absorbed");
        assert_eq!(outcome.state.value, 0);
        assert_eq!(outcome.state.reply.as_deref(), Some("slow degraded"));
    }

    #[tokio::test]
    async fn cycles_stop_at_the_step_limit() {
        let visits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&visits);
        let workflow = GraphBuilder::new()
            .register_node(
                "spin",
                node_fn(move |_: Tally| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Ok::<_, NodeError>(TallyUpdate::default()))
                }),
            )
            .set_entry("spin")
            .add_edge("spin", "spin")
            .max_steps(5)
            .compile()
            .expect("valid graph");

        let error = workflow.run(Tally::default()).await.expect_err("must hit the cap");
        assert!(matches!(error, GraphExecutionError::StepLimitExceeded { limit: 5, .. }));
        assert_eq!(visits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn successful_run_writes_exactly_one_checkpoint() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let workflow = GraphBuilder::new()
            .register_node("only", node_fn(add(7, "only")))
            .set_entry("only")
            .add_edge("only", END)
            .checkpoints(store.clone())
            .compile()
            .expect("valid graph");

        let outcome = workflow.run_thread("thread-1", Tally::default()).await.expect("run");
        assert_eq!(outcome.checkpoint.as_ref().map(|c| c.sequence), Some(1));
        assert_eq!(store.list("thread-1").await.expect("list").len(), 1);

        let restored = workflow.latest_state("thread-1").await.expect("read").expect("present");
        assert_eq!(restored.value, 7);
    }

    #[tokio::test]
    async fn failed_run_writes_no_checkpoint() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let workflow = GraphBuilder::new()
            .register_node("spin", node_fn(add(0, "spin")))
            .set_entry("spin")
            .add_edge("spin", "spin")
            .max_steps(3)
            .checkpoints(store.clone())
            .compile()
            .expect("valid graph");

        assert!(workflow.run_thread("thread-2", Tally::default()).await.is_err());
        assert!(store.get_latest("thread-2").await.expect("read").is_none());
    }

    struct BrokenStore;

    #[async_trait]
    impl CheckpointStore for BrokenStore {
        async fn put(&self, _thread_id: &str, _state: Value) -> Result<Checkpoint, CheckpointError> {
            Err(CheckpointError::Storage("disk full".to_string()))
        }

        async fn get_latest(&self, _thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
            Ok(None)
        }

        async fn list(&self, _thread_id: &str) -> Result<Vec<Checkpoint>, CheckpointError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn checkpoint_write_failure_is_surfaced() {
        let workflow = GraphBuilder::new()
            .register_node("only", node_fn(add(1, "only")))
            .set_entry("only")
            .add_edge("only", END)
            .checkpoints(Arc::new(BrokenStore))
            .compile()
            .expect("valid graph");

        let error = workflow.run_thread("thread-3", Tally::default()).await.expect_err("fatal");
        assert!(matches!(error, GraphExecutionError::Checkpoint(CheckpointError::Storage(_))));
    }
}
