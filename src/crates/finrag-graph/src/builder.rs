//! [`StateGraph`] builder.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ StateGraph                                   │
//! │  add_reducer   field → merge operator        │
//! │  add_node      name  → async fn(state)       │
//! │  add_edge      src   → dst                   │
//! │  add_conditional_edges src → router, mapping │
//! └──────────────────────┬───────────────────────┘
//!                        │ compile(checkpointer, interrupts)
//!                        ▼
//!                 CompiledGraph (stream / invoke / get_state / update_state)
//! ```
//!
//! # Example
//!
//! ```rust
//! use finrag_graph::{StateGraph, InterruptConfig, AppendListReducer, END};
//! use serde_json::json;
//!
//! let mut graph = StateGraph::new();
//! graph.add_reducer("notes", AppendListReducer);
//! graph.add_node("draft", |_state| Box::pin(async move { Ok(json!({"notes": ["drafted"]})) }));
//! graph.add_node("review", |_state| Box::pin(async move { Ok(json!({"notes": ["reviewed"]})) }));
//! graph.set_entry("draft");
//! graph.add_edge("draft", "review");
//! graph.add_edge("review", END);
//!
//! let compiled = graph.compile(None, InterruptConfig::new()).unwrap();
//! assert_eq!(compiled.node_names().len(), 2);
//! ```

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, NodeContext, NodeFuture, NodeId, NodeSpec, Router, END, START};
use crate::interrupt::InterruptConfig;
use crate::retry::RetryPolicy;
use crate::send::ConditionalEdgeResult;
use crate::state::Reducer;
use finrag_checkpoint::CheckpointSaver;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for a state graph
#[derive(Debug, Default)]
pub struct StateGraph {
    graph: Graph,
}

impl StateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the merge operator of a state field
    pub fn add_reducer(&mut self, field: impl Into<String>, reducer: impl Reducer + 'static) -> &mut Self {
        self.graph.schema.add_field(field, reducer);
        self
    }

    /// Register a node that only needs the state
    pub fn add_node<F>(&mut self, id: impl Into<NodeId>, executor: F) -> &mut Self
    where
        F: Fn(Value) -> NodeFuture + Send + Sync + 'static,
    {
        self.add_node_with_context(id, move |state, _ctx| executor(state))
    }

    /// Register a node that also receives its [`NodeContext`]
    pub fn add_node_with_context<F>(&mut self, id: impl Into<NodeId>, executor: F) -> &mut Self
    where
        F: Fn(Value, NodeContext) -> NodeFuture + Send + Sync + 'static,
    {
        let id = id.into();
        let retry_policy = self.graph.nodes.get(&id).and_then(|spec| spec.retry_policy.clone());
        self.graph.nodes.insert(
            id.clone(),
            NodeSpec {
                name: id,
                executor: Arc::new(executor),
                retry_policy,
            },
        );
        self
    }

    /// Set how often a failing node is re-run before the failure escalates
    pub fn set_retry_policy(&mut self, id: &str, policy: RetryPolicy) -> &mut Self {
        if let Some(spec) = self.graph.nodes.get_mut(id) {
            spec.retry_policy = Some(policy);
        }
        self
    }

    /// Unconditional transition
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        self.graph
            .edges
            .entry(from.into())
            .or_default()
            .push(Edge::Direct(to.into()));
        self
    }

    /// Edge from START
    pub fn set_entry(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.add_edge(START, node)
    }

    /// Routed transition.
    ///
    /// The router returns a key of `mapping`, several keys, or a list of
    /// `Send`s. Keys missing from `mapping` are taken as node names.
    pub fn add_conditional_edges<F, I, K, V>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        mapping: I,
    ) -> &mut Self
    where
        F: Fn(&Value) -> ConditionalEdgeResult + Send + Sync + 'static,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<NodeId>,
    {
        let router: Router = Arc::new(move |state: &Value| Ok::<_, GraphError>(router(state)));
        self.add_router(from, router, mapping)
    }

    /// Routed transition whose router may fail
    pub fn add_router<I, K, V>(&mut self, from: impl Into<NodeId>, router: Router, mapping: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<NodeId>,
    {
        let mapping: HashMap<String, NodeId> = mapping
            .into_iter()
            .map(|(key, node)| (key.into(), node.into()))
            .collect();
        self.graph
            .edges
            .entry(from.into())
            .or_default()
            .push(Edge::Conditional { router, mapping });
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Check structural consistency
    pub fn validate(&self) -> Result<()> {
        if self.graph.edges_from(START).is_empty() {
            return Err(GraphError::Validation("graph has no entry edge".to_string()));
        }

        for (source, edges) in &self.graph.edges {
            if source != START && !self.graph.nodes.contains_key(source) {
                return Err(GraphError::Validation(format!(
                    "edge from unknown node '{source}'"
                )));
            }
            for edge in edges {
                match edge {
                    Edge::Direct(target) => {
                        if !self.graph.is_valid_target(target) {
                            return Err(GraphError::Validation(format!(
                                "edge '{source}' -> '{target}' targets an unknown node"
                            )));
                        }
                    }
                    Edge::Conditional { mapping, .. } => {
                        if let Some((key, target)) = mapping
                            .iter()
                            .find(|(_, target)| !self.graph.is_valid_target(target))
                        {
                            return Err(GraphError::Validation(format!(
                                "branch '{key}' of '{source}' targets unknown node '{target}'"
                            )));
                        }
                    }
                }
            }
        }

        if self.graph.nodes.contains_key(START) || self.graph.nodes.contains_key(END) {
            return Err(GraphError::Validation("START and END are reserved names".to_string()));
        }
        Ok(())
    }

    /// Validate and build the runner
    pub fn compile(
        self,
        checkpointer: Option<Arc<dyn CheckpointSaver>>,
        interrupts: InterruptConfig,
    ) -> Result<CompiledGraph> {
        self.validate()?;

        if let Some(node) = interrupts.nodes().find(|n| !self.graph.nodes.contains_key(*n)) {
            return Err(GraphError::Validation(format!(
                "interrupt_before names unknown node '{node}'"
            )));
        }
        if !interrupts.is_empty() && checkpointer.is_none() {
            return Err(GraphError::Validation(
                "interrupts require a checkpointer".to_string(),
            ));
        }

        Ok(CompiledGraph::new(self.graph, checkpointer, interrupts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> impl Fn(Value) -> NodeFuture + Send + Sync + 'static {
        |_state| Box::pin(async move { Ok(json!({})) })
    }

    #[test]
    fn test_missing_entry_is_rejected() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop());
        let err = graph.compile(None, InterruptConfig::new()).unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_unknown_branch_target_is_rejected() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop());
        graph.set_entry("a");
        graph.add_conditional_edges("a", |_| "x".into(), [("x", "missing")]);
        assert!(graph.compile(None, InterruptConfig::new()).is_err());
    }

    #[test]
    fn test_interrupts_need_checkpointer() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop());
        graph.set_entry("a");
        graph.add_edge("a", END);
        let err = graph
            .compile(None, InterruptConfig::new().with_interrupt_before(["a"]))
            .unwrap_err();
        assert!(err.to_string().contains("checkpointer"));
    }

    #[test]
    fn test_retry_policy_survives_node_replacement() {
        let mut graph = StateGraph::new();
        graph.add_node("a", noop());
        graph.set_retry_policy("a", RetryPolicy::with_retries(5));
        graph.add_node("a", noop());
        assert_eq!(
            graph.graph().nodes["a"].retry_policy.as_ref().map(|p| p.max_attempts),
            Some(6)
        );
    }
}
