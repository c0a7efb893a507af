use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::checkpoint::CheckpointStore;
use crate::workflow::node::{Fallback, GraphState, Node, Router};
use crate::workflow::runner::{CompiledEdge, CompiledNode, Step, Workflow, DEFAULT_MAX_STEPS};

/// Terminal marker usable anywhere a node id is expected.
pub const END: &str = "__end__";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Node(String),
    End,
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        if value == END {
            Self::End
        } else {
            Self::Node(value.to_string())
        }
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

/// Label-to-target mapping for a conditional edge.
#[derive(Clone, Debug, Default)]
pub struct Routes {
    entries: Vec<(String, Target)>,
    default: Option<Target>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, label: impl Into<String>, target: impl Into<Target>) -> Self {
        self.entries.push((label.into(), target.into()));
        self
    }

    /// Target for labels that have no explicit entry.
    pub fn otherwise(mut self, target: impl Into<Target>) -> Self {
        self.default = Some(target.into());
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphBuildError {
    #[error("node `{0}` is registered more than once")]
    DuplicateNode(String),
    #[error("workflow has no entry node")]
    MissingEntry,
    #[error("{context} references unknown node `{id}`")]
    UnknownNode { context: &'static str, id: String },
    #[error("node `{0}` has more than one outgoing edge definition")]
    DuplicateEdge(String),
    #[error("node `{0}` has no outgoing edge")]
    MissingEdge(String),
    #[error("router on `{from}` can return `{label}` but the label is not mapped")]
    UnmappedLabel { from: String, label: String },
    #[error("step limit must be greater than zero")]
    InvalidStepLimit,
}

enum EdgeSpec<S> {
    Direct(Target),
    Conditional { router: Arc<dyn Router<S>>, routes: Routes },
}

pub struct GraphBuilder<S: GraphState> {
    nodes: Vec<(String, Arc<dyn Node<S>>)>,
    edges: Vec<(String, EdgeSpec<S>)>,
    fallbacks: Vec<(String, Fallback<S>)>,
    entry: Option<String>,
    max_steps: usize,
    node_timeout: Option<Duration>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl<S: GraphState> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> GraphBuilder<S> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            fallbacks: Vec::new(),
            entry: None,
            max_steps: DEFAULT_MAX_STEPS,
            node_timeout: None,
            checkpoints: None,
        }
    }

    pub fn register_node<N>(self, id: impl Into<String>, node: N) -> Self
    where
        N: Node<S> + 'static,
    {
        self.register_shared_node(id, Arc::new(node))
    }

    pub fn register_shared_node(mut self, id: impl Into<String>, node: Arc<dyn Node<S>>) -> Self {
        self.nodes.push((id.into(), node));
        self
    }

    pub fn set_entry(mut self, id: impl Into<String>) -> Self {
        self.entry = Some(id.into());
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<Target>) -> Self {
        self.edges.push((from.into(), EdgeSpec::Direct(to.into())));
        self
    }

    pub fn add_conditional_edge<R>(mut self, from: impl Into<String>, router: R, routes: Routes) -> Self
    where
        R: Router<S> + 'static,
    {
        self.edges.push((from.into(), EdgeSpec::Conditional { router: Arc::new(router), routes }));
        self
    }

    pub fn with_fallback(mut self, id: impl Into<String>, fallback: Fallback<S>) -> Self {
        self.fallbacks.push((id.into(), fallback));
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    pub fn checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Validates the graph and produces an executable workflow.
    pub fn compile(self) -> Result<Workflow<S>, GraphBuildError> {
        if self.max_steps == 0 {
            return Err(GraphBuildError::InvalidStepLimit);
        }

        let mut index = HashMap::with_capacity(self.nodes.len());
        for (position, (id, _)) in self.nodes.iter().enumerate() {
            if index.insert(id.clone(), position).is_some() {
                return Err(GraphBuildError::DuplicateNode(id.clone()));
            }
        }

        let resolve = |context: &'static str, target: &Target| -> Result<Step, GraphBuildError> {
            match target {
                Target::End => Ok(Step::End),
                Target::Node(id) => index
                    .get(id)
                    .map(|position| Step::Node(*position))
                    .ok_or_else(|| GraphBuildError::UnknownNode { context, id: id.clone() }),
            }
        };

        let entry = match &self.entry {
            None => return Err(GraphBuildError::MissingEntry),
            Some(id) => match resolve("entry", &Target::Node(id.clone()))? {
                Step::Node(position) => position,
                Step::End => return Err(GraphBuildError::MissingEntry),
            },
        };

        let mut compiled_edges: HashMap<usize, CompiledEdge<S>> = HashMap::new();
        for (from, declared_edge) in self.edges {
            let position = *index
                .get(&from)
                .ok_or_else(|| GraphBuildError::UnknownNode { context: "edge source", id: from.clone() })?;
            if compiled_edges.contains_key(&position) {
                return Err(GraphBuildError::DuplicateEdge(from));
            }

            let edge = match declared_edge {
                EdgeSpec::Direct(target) => CompiledEdge::Direct(resolve("edge target", &target)?),
                EdgeSpec::Conditional { router, routes } => {
                    let mut mapped = HashMap::with_capacity(routes.entries.len());
                    for (label, target) in &routes.entries {
                        mapped.insert(label.clone(), resolve("edge target", target)?);
                    }
                    let default = match &routes.default {
                        Some(target) => Some(resolve("edge default", target)?),
                        None => None,
                    };
                    if default.is_none() {
                        let declared: HashSet<String> = router.labels().into_iter().collect();
                        if let Some(label) = declared.into_iter().find(|label| !mapped.contains_key(label)) {
                            return Err(GraphBuildError::UnmappedLabel { from, label });
                        }
                    }
                    CompiledEdge::Conditional { router, routes: mapped, default }
                }
            };
            compiled_edges.insert(position, edge);
        }

        let mut fallbacks: HashMap<usize, Fallback<S>> = HashMap::new();
        for (id, fallback) in self.fallbacks {
            let position = *index
                .get(&id)
                .ok_or_else(|| GraphBuildError::UnknownNode { context: "fallback", id: id.clone() })?;
            fallbacks.insert(position, fallback);
        }

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for (position, (id, node)) in self.nodes.into_iter().enumerate() {
            let edge =
                compiled_edges.remove(&position).ok_or_else(|| GraphBuildError::MissingEdge(id.clone()))?;
            nodes.push(CompiledNode { fallback: fallbacks.remove(&position), id, node, edge });
        }

        Ok(Workflow {
            nodes,
            entry,
            max_steps: self.max_steps,
            node_timeout: self.node_timeout,
            checkpoints: self.checkpoints,
        })
    }
}
