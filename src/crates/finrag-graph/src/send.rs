//! Fan-out descriptors returned by routers.
//!
//! A router returns a [`ConditionalEdgeResult`]. Plain keys are resolved through
//! the edge's mapping. A list of [`Send`]s spawns one independent task per
//! descriptor; each task sees the parent state overlaid with the descriptor's
//! partial state.

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run `node` once with `arg` overlaid on the current state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Send {
    node: NodeId,
    arg: Value,
}

impl Send {
    pub fn new(node: impl Into<NodeId>, arg: Value) -> Self {
        Self {
            node: node.into(),
            arg,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn arg(&self) -> &Value {
        &self.arg
    }

    pub fn into_parts(self) -> (NodeId, Value) {
        (self.node, self.arg)
    }
}

/// What a router decided
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalEdgeResult {
    /// One mapping key
    Node(String),

    /// Several mapping keys, all scheduled for the next superstep
    Nodes(Vec<String>),

    /// Fan-out
    Sends(Vec<Send>),
}

impl From<&str> for ConditionalEdgeResult {
    fn from(key: &str) -> Self {
        ConditionalEdgeResult::Node(key.to_string())
    }
}

impl From<String> for ConditionalEdgeResult {
    fn from(key: String) -> Self {
        ConditionalEdgeResult::Node(key)
    }
}

impl From<Vec<&str>> for ConditionalEdgeResult {
    fn from(keys: Vec<&str>) -> Self {
        ConditionalEdgeResult::Nodes(keys.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<Send>> for ConditionalEdgeResult {
    fn from(sends: Vec<Send>) -> Self {
        ConditionalEdgeResult::Sends(sends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_parts() {
        let send = Send::new("run_group", json!({"group": ["q1", "q2"]}));
        assert_eq!(send.node(), "run_group");

        let (node, arg) = send.into_parts();
        assert_eq!(node, "run_group");
        assert_eq!(arg["group"][1], "q2");
    }

    #[test]
    fn test_conversions() {
        assert_eq!(
            ConditionalEdgeResult::from("generate"),
            ConditionalEdgeResult::Node("generate".to_string())
        );
        assert_eq!(
            ConditionalEdgeResult::from(vec!["a", "b"]),
            ConditionalEdgeResult::Nodes(vec!["a".to_string(), "b".to_string()])
        );

        let sends: Vec<Send> = ["q1", "q2"]
            .iter()
            .map(|q| Send::new("rag", json!({"question": q})))
            .collect();
        match ConditionalEdgeResult::from(sends) {
            ConditionalEdgeResult::Sends(sends) => {
                assert_eq!(sends.len(), 2);
                assert_eq!(sends[1].arg()["question"], "q2");
            }
            other => panic!("expected sends, got {other:?}"),
        }
    }
}
