//! A small directed-graph workflow engine.
//!
//! Nodes are async steps over a shared state; each returns a partial update that
//! the engine merges into the state. Edges are fixed or chosen by a router that
//! inspects the state. The graph is validated once at compile time and then
//! executed any number of times, concurrently.

mod graph;
mod node;
mod runner;

pub use graph::{GraphBuildError, GraphBuilder, Routes, Target, END};
pub use node::{node_fn, router_fn, Fallback, FnNode, FnRouter, GraphState, Node, NodeError, Resume, Router};
pub use runner::{GraphExecutionError, RunOutcome, Workflow, DEFAULT_MAX_STEPS};
