//! Graph structure: nodes, edges and the context handed to a running node.

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::send::ConditionalEdgeResult;
use crate::state::StateSchema;
use crate::trace::LogTree;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Node identifier
pub type NodeId = String;

/// Virtual entry node
pub const START: &str = "__start__";

/// Virtual exit node
pub const END: &str = "__end__";

/// Boxed future returned by node executors
pub type NodeFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// A node: current state in, partial state out
pub type NodeExecutor = Arc<dyn Fn(Value, NodeContext) -> NodeFuture + Send + Sync>;

/// A router: pure function of state
pub type Router = Arc<dyn Fn(&Value) -> Result<ConditionalEdgeResult> + Send + Sync>;

/// Per-task information available to a running node
#[derive(Debug, Clone)]
pub struct NodeContext {
    /// Node name
    pub node: NodeId,

    /// Execution id `<node>//<uuid>` of this task
    pub trace_id: String,

    /// Zero-based attempt number, grows with each retry
    pub attempt: usize,

    /// Superstep this task belongs to
    pub step: usize,

    log_tree: LogTree,
}

impl NodeContext {
    pub fn new(node: impl Into<NodeId>, trace_id: impl Into<String>, log_tree: LogTree) -> Self {
        Self {
            node: node.into(),
            trace_id: trace_id.into(),
            attempt: 0,
            step: 0,
            log_tree,
        }
    }

    pub(crate) fn with_position(mut self, step: usize, attempt: usize) -> Self {
        self.step = step;
        self.attempt = attempt;
        self
    }

    /// Open a child execution id under this task, e.g. to root a sub-graph run
    pub fn open_child(&self, name: &str, text: impl Into<String>) -> String {
        self.log_tree.open(&self.trace_id, name, text)
    }

    /// Shared log tree of the run
    pub fn log_tree(&self) -> &LogTree {
        &self.log_tree
    }
}

/// An outgoing edge
#[derive(Clone)]
pub enum Edge {
    /// Always taken
    Direct(NodeId),

    /// Router decides; plain keys are looked up in `mapping`
    Conditional {
        router: Router,
        mapping: HashMap<String, NodeId>,
    },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(target) => f.debug_tuple("Direct").field(target).finish(),
            Edge::Conditional { mapping, .. } => f
                .debug_struct("Conditional")
                .field("mapping", mapping)
                .finish_non_exhaustive(),
        }
    }
}

/// A registered node
#[derive(Clone)]
pub struct NodeSpec {
    pub name: NodeId,
    pub executor: NodeExecutor,
    pub retry_policy: Option<RetryPolicy>,
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

/// The declared graph
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: HashMap<NodeId, NodeSpec>,
    pub edges: HashMap<NodeId, Vec<Edge>>,
    pub schema: StateSchema,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edges_from(&self, node: &str) -> &[Edge] {
        self.edges.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `target` is a node or END
    pub fn is_valid_target(&self, target: &str) -> bool {
        target == END || self.nodes.contains_key(target)
    }
}
