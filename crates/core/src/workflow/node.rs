use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// State threaded through a workflow run.
pub trait GraphState: Clone + Send + Sync + 'static {
    type Update: Send + 'static;

    fn merge(&mut self, update: Self::Update);

    /// Update applied when a node fails and has no explicit fallback.
    fn degraded(node: &str, error: &NodeError) -> Self::Update;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("node failed: {0}")]
    Failed(String),
    #[error("node timed out after {0:?}")]
    TimedOut(Duration),
}

impl NodeError {
    pub fn failed(error: impl Display) -> Self {
        Self::Failed(error.to_string())
    }
}

#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    async fn run(&self, state: &S) -> Result<S::Update, NodeError>;
}

pub struct FnNode<F> {
    f: F,
}

/// Wraps an async closure taking an owned snapshot of the state.
pub fn node_fn<F>(f: F) -> FnNode<F> {
    FnNode { f }
}

#[async_trait]
impl<S, F, Fut> Node<S> for FnNode<F>
where
    S: GraphState,
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S::Update, NodeError>> + Send,
{
    async fn run(&self, state: &S) -> Result<S::Update, NodeError> {
        (self.f)(state.clone()).await
    }
}

/// Picks the outgoing edge label from the current state.
pub trait Router<S>: Send + Sync {
    /// Every label `route` can return; checked against the edge mapping at compile time.
    fn labels(&self) -> Vec<String>;

    fn route(&self, state: &S) -> String;
}

pub struct FnRouter<F> {
    labels: Vec<String>,
    f: F,
}

pub fn router_fn<F, I, L>(labels: I, f: F) -> FnRouter<F>
where
    I: IntoIterator<Item = L>,
    L: Into<String>,
{
    FnRouter { labels: labels.into_iter().map(Into::into).collect(), f }
}

impl<S, F> Router<S> for FnRouter<F>
where
    F: Fn(&S) -> String + Send + Sync,
{
    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    fn route(&self, state: &S) -> String {
        (self.f)(state)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resume {
    /// Stop the run after applying the fallback update.
    End,
    /// Continue along the node's outgoing edges.
    FollowEdges,
}

/// Per-node recovery applied when the node fails or times out.
pub struct Fallback<S: GraphState> {
    update: Arc<dyn Fn(&NodeError) -> S::Update + Send + Sync>,
    resume: Resume,
}

impl<S: GraphState> Fallback<S> {
    pub fn new<F>(resume: Resume, update: F) -> Self
    where
        F: Fn(&NodeError) -> S::Update + Send + Sync + 'static,
    {
        Self { update: Arc::new(update), resume }
    }

    pub fn update(&self, error: &NodeError) -> S::Update {
        (self.update)(error)
    }

    pub fn resume(&self) -> Resume {
        self.resume
    }
}

impl<S: GraphState> Clone for Fallback<S> {
    fn clone(&self) -> Self {
        Self { update: Arc::clone(&self.update), resume: self.resume }
    }
}
