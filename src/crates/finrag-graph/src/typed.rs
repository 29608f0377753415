//! Typed node and router helpers.
//!
//! Graph state travels as JSON so reducers can merge fields generically. Most
//! nodes are easier to write against a typed view: [`StateGraph::add_typed_node`]
//! deserializes the state into `S`, runs the node, and serializes the returned
//! patch `P`. Top-level `null`s in the patch are dropped, so a patch struct can
//! leave fields it does not write as `None`.

use crate::builder::StateGraph;
use crate::error::GraphError;
use crate::graph::{NodeContext, NodeFuture, NodeId, Router};
use crate::send::ConditionalEdgeResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Serialize a patch and drop top-level nulls
pub fn patch_to_value<P: Serialize>(patch: &P) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(patch)?;
    if let Value::Object(map) = &mut value {
        map.retain(|_, v| !v.is_null());
    }
    Ok(value)
}

impl StateGraph {
    /// Register a node over typed state and patch
    pub fn add_typed_node<S, P, E, F, Fut>(&mut self, id: impl Into<NodeId>, node: F) -> &mut Self
    where
        S: DeserializeOwned + Send + 'static,
        P: Serialize + Send + 'static,
        E: std::fmt::Display + Send + 'static,
        F: Fn(S, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, E>> + Send + 'static,
    {
        let id = id.into();
        let name = id.clone();
        self.add_node_with_context(id, move |value, ctx| {
            let name = name.clone();
            let fut: NodeFuture = match serde_json::from_value::<S>(value) {
                Ok(state) => {
                    let pending = node(state, ctx);
                    Box::pin(async move {
                        let patch = pending
                            .await
                            .map_err(|e| GraphError::node_execution(name, e.to_string()))?;
                        patch_to_value(&patch).map_err(GraphError::from)
                    })
                }
                Err(e) => Box::pin(async move {
                    Err(GraphError::node_execution(
                        name,
                        format!("state does not match node input: {e}"),
                    ))
                }),
            };
            fut
        })
    }

    /// Routed transition over typed state
    pub fn add_typed_conditional_edges<S, F, I, K, V>(
        &mut self,
        from: impl Into<NodeId>,
        router: F,
        mapping: I,
    ) -> &mut Self
    where
        S: DeserializeOwned + 'static,
        F: Fn(&S) -> ConditionalEdgeResult + Send + Sync + 'static,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<NodeId>,
    {
        let router: Router = Arc::new(move |value: &Value| {
            let state: S = serde_json::from_value(value.clone())?;
            Ok::<_, GraphError>(router(&state))
        });
        self.add_router(from, router, mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Default)]
    struct Patch {
        answer: Option<String>,
        hops: Option<u32>,
    }

    #[derive(Deserialize)]
    struct Demo {
        #[allow(dead_code)]
        question: String,
    }

    #[test]
    fn test_patch_drops_nulls() {
        let patch = Patch {
            answer: Some("42".to_string()),
            hops: None,
        };
        assert_eq!(patch_to_value(&patch).unwrap(), json!({"answer": "42"}));
    }

    #[test]
    fn test_typed_router_surfaces_bad_state() {
        let mut graph = StateGraph::new();
        graph.add_typed_conditional_edges("a", |_s: &Demo| "b".into(), [("b", "b")]);
        let edges = graph.graph().edges_from("a");
        match &edges[0] {
            crate::graph::Edge::Conditional { router, .. } => {
                assert!(router(&json!({"question": 3})).is_err());
                assert_eq!(
                    router(&json!({"question": "q"})).unwrap(),
                    ConditionalEdgeResult::Node("b".to_string())
                );
            }
            other => panic!("unexpected edge {other:?}"),
        }
    }
}
