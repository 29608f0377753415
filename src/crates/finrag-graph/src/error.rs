//! Error types for graph construction and execution

use thiserror::Error;

use crate::state::StateError;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while building or running a graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// The declared graph is inconsistent
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// A node failed and its retry budget is exhausted
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution { node: String, error: String },

    /// Two tasks of the same superstep wrote an overwrite field
    #[error("Concurrent write to overwrite field '{field}' by {writers:?}")]
    ConcurrentWrite { field: String, writers: Vec<String> },

    /// A state patch could not be merged
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// A router returned a key that maps to no node
    #[error("Router on '{source_node}' returned unknown branch '{branch}'")]
    UnknownBranch { source_node: String, branch: String },

    /// The run exceeded its superstep budget
    #[error("Recursion limit of {0} supersteps reached")]
    RecursionLimit(usize),

    /// Resume requested on a thread without a checkpoint
    #[error("Nothing to resume for thread '{0}'")]
    NothingToResume(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] finrag_checkpoint::CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Trace export failed
    #[error("Trace export failed: {0}")]
    Trace(String),
}

impl GraphError {
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }
}
