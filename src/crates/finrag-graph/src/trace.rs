//! Execution-tree tracing.
//!
//! Every task the executor runs gets an execution id of the form
//! `<node_name>//<uuid>`. The executor appends one [`LogTreeEdge`] per task,
//! linking it to the task that scheduled it, so a reader can rebuild the tree
//! of what ran and why:
//!
//! ```text
//! session//1b9e…
//!  └── safety_check//7c2a…
//!       └── decide_path//e01f…
//!            └── answer_simple//44d0…
//!                 └── rag//9ab3…          (sub-graph root opened by the node)
//!                      ├── retrieve//…
//!                      └── generate//…
//! ```
//!
//! The tree is append-only. [`TraceSink`]s export it when a session finishes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

/// Separator between node name and uuid in an execution id
pub const EXECUTION_ID_SEPARATOR: &str = "//";

/// New execution id for `name`
pub fn execution_id(name: &str) -> String {
    format!("{name}{EXECUTION_ID_SEPARATOR}{}", Uuid::new_v4())
}

/// Split an execution id into node name and uuid
pub fn parse_execution_id(id: &str) -> Option<(&str, Uuid)> {
    let (name, uuid) = id.rsplit_once(EXECUTION_ID_SEPARATOR)?;
    Uuid::parse_str(uuid).ok().map(|uuid| (name, uuid))
}

/// One parent → child link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTreeEdge {
    pub parent_node_id: String,
    pub child_node_id: String,
    pub text: String,
    pub ts: DateTime<Utc>,
}

impl LogTreeEdge {
    /// Node name of the child id
    pub fn child_name(&self) -> &str {
        parse_execution_id(&self.child_node_id)
            .map(|(name, _)| name)
            .unwrap_or(&self.child_node_id)
    }

    pub fn parent_name(&self) -> &str {
        parse_execution_id(&self.parent_node_id)
            .map(|(name, _)| name)
            .unwrap_or(&self.parent_node_id)
    }
}

/// Shared, append-only edge list
#[derive(Debug, Clone, Default)]
pub struct LogTree {
    edges: Arc<Mutex<Vec<LogTreeEdge>>>,
}

impl LogTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an edge
    pub fn append(&self, parent: &str, child: &str, text: impl Into<String>) {
        self.edges.lock().push(LogTreeEdge {
            parent_node_id: parent.to_string(),
            child_node_id: child.to_string(),
            text: text.into(),
            ts: Utc::now(),
        });
    }

    /// Open a child execution id under `parent` and return it
    pub fn open(&self, parent: &str, name: &str, text: impl Into<String>) -> String {
        let child = execution_id(name);
        self.append(parent, &child, text);
        child
    }

    /// Snapshot of all edges in append order
    pub fn edges(&self) -> Vec<LogTreeEdge> {
        self.edges.lock().clone()
    }

    /// Edges whose parent is `parent`
    pub fn children_of(&self, parent: &str) -> Vec<LogTreeEdge> {
        self.edges
            .lock()
            .iter()
            .filter(|edge| edge.parent_node_id == parent)
            .cloned()
            .collect()
    }

    /// (parent name, child name) pairs, handy for asserting tree shape
    pub fn name_pairs(&self) -> Vec<(String, String)> {
        self.edges
            .lock()
            .iter()
            .map(|edge| (edge.parent_name().to_string(), edge.child_name().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.edges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }
}

/// Destination for finished execution trees
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn export(&self, edges: &[LogTreeEdge]) -> Result<()>;
}

/// Collects exported edges in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryTraceSink {
    exported: Arc<Mutex<Vec<LogTreeEdge>>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exported(&self) -> Vec<LogTreeEdge> {
        self.exported.lock().clone()
    }
}

#[async_trait]
impl TraceSink for MemoryTraceSink {
    async fn export(&self, edges: &[LogTreeEdge]) -> Result<()> {
        self.exported.lock().extend_from_slice(edges);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_id_round_trip() {
        let id = execution_id("grade_documents");
        let (name, _) = parse_execution_id(&id).unwrap();
        assert_eq!(name, "grade_documents");
        assert!(parse_execution_id("no-separator").is_none());
    }

    #[test]
    fn test_open_links_child() {
        let tree = LogTree::new();
        let root = execution_id("session");
        let child = tree.open(&root, "rag", "What was Apple's revenue?");

        let children = tree.children_of(&root);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].child_node_id, child);
        assert_eq!(tree.name_pairs(), vec![("session".to_string(), "rag".to_string())]);
    }

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let tree = LogTree::new();
        tree.append("a//x", "b//y", "step");
        let sink = MemoryTraceSink::new();
        sink.export(&tree.edges()).await.unwrap();
        assert_eq!(sink.exported().len(), 1);
    }
}
