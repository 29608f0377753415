//! The executable form of a [`StateGraph`](crate::StateGraph).
//!
//! A [`CompiledGraph`] runs Pregel-style supersteps:
//!
//! ```text
//!  pending tasks ──▶ run concurrently ──▶ merge patches ──▶ route ──▶ pending tasks
//!        ▲              (join_all,          (reducers,       (direct edges
//!        │               per-node retry)     conflict check)  deduplicated,
//!        │                                                    routers, Sends)
//!        └──────────── checkpoint after every superstep ◀──────────┘
//! ```
//!
//! A run halts when nothing is pending, or when a pending task targets a node
//! listed in `interrupt_before`. Halted runs resume by streaming again with no
//! input.

mod execution;
mod state;

pub use execution::{GraphStream, StreamEvent, StreamMode};
pub use state::StateSnapshot;

use crate::graph::Graph;
use crate::interrupt::InterruptConfig;
use crate::retry::RetryPolicy;
use crate::trace::LogTree;
use finrag_checkpoint::CheckpointSaver;
use std::sync::Arc;

/// Default superstep budget per run
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

/// Runner for a compiled graph. Cheap to clone.
#[derive(Clone)]
pub struct CompiledGraph {
    graph: Arc<Graph>,
    checkpointer: Option<Arc<dyn CheckpointSaver>>,
    interrupts: InterruptConfig,
    log_tree: LogTree,
    recursion_limit: usize,
    default_retry: RetryPolicy,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.node_names())
            .field("interrupts", &self.interrupts)
            .field("recursion_limit", &self.recursion_limit)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    pub(crate) fn new(
        graph: Graph,
        checkpointer: Option<Arc<dyn CheckpointSaver>>,
        interrupts: InterruptConfig,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            checkpointer,
            interrupts,
            log_tree: LogTree::new(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            default_retry: RetryPolicy::none(),
        }
    }

    /// Share an existing log tree, e.g. the parent session's
    pub fn with_log_tree(mut self, log_tree: LogTree) -> Self {
        self.log_tree = log_tree;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Policy for nodes without their own
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    pub fn log_tree(&self) -> &LogTree {
        &self.log_tree
    }

    /// Registered node names, sorted
    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.graph.nodes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn interrupts(&self) -> &InterruptConfig {
        &self.interrupts
    }

    fn retry_policy_for(&self, node: &str) -> RetryPolicy {
        self.graph
            .nodes
            .get(node)
            .and_then(|spec| spec.retry_policy.clone())
            .unwrap_or_else(|| self.default_retry.clone())
    }
}
