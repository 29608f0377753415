//! # finrag-graph - State-graph executor for FinRAG workflows
//!
//! A small Pregel-style engine: nodes are async functions over a JSON state,
//! edges are either unconditional or decided by pure routers, and every state
//! field declares how concurrent writes merge.
//!
//! ## Core concepts
//!
//! - [`StateGraph`] declares nodes, edges, routers and reducers.
//! - [`Reducer`]s: [`OverwriteReducer`], [`AppendListReducer`],
//!   [`UnionSetReducer`] and [`KeepFirstNonEmptyReducer`]. Two concurrent
//!   writers to an overwrite field fail the superstep.
//! - [`Send`] fans out: one task per descriptor, each seeing the parent state
//!   overlaid with the descriptor's partial state.
//! - [`CompiledGraph`] runs supersteps. Tasks of a superstep run concurrently,
//!   their patches merge in task order, and plain successors are deduplicated so
//!   a fan-in node runs once after every branch finished.
//! - [`InterruptConfig`] halts a run before listed nodes. With a checkpointer,
//!   `get_state`, `update_state` and `stream(None, ..)` implement
//!   human-in-the-loop resume.
//! - [`RetryPolicy`] per node. Failures are counted per node in the checkpoint.
//!   A `Send` branch that keeps failing is dropped and its siblings go on.
//! - [`LogTree`] records `<node>//<uuid>` parent/child edges for every task.
//!
//! ## Example
//!
//! ```rust
//! use finrag_graph::{AppendListReducer, InterruptConfig, Send, StateGraph, ConditionalEdgeResult, END};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> finrag_graph::Result<()> {
//! let mut graph = StateGraph::new();
//! graph.add_reducer("answers", AppendListReducer);
//! graph.add_node("split", |_s| Box::pin(async move { Ok(json!({"questions": ["a", "b"]})) }));
//! graph.add_node("answer", |s| Box::pin(async move {
//!     Ok(json!({"answers": [format!("answer to {}", s["question"].as_str().unwrap_or_default())]}))
//! }));
//! graph.add_node("combine", |s| Box::pin(async move {
//!     Ok(json!({"count": s["answers"].as_array().map(|a| a.len()).unwrap_or(0)}))
//! }));
//! graph.set_entry("split");
//! graph.add_conditional_edges(
//!     "split",
//!     |s| {
//!         let sends = s["questions"].as_array().into_iter().flatten()
//!             .map(|q| Send::new("answer", json!({"question": q})))
//!             .collect::<Vec<_>>();
//!         ConditionalEdgeResult::Sends(sends)
//!     },
//!     Vec::<(String, String)>::new(),
//! );
//! graph.add_edge("answer", "combine");
//! graph.add_edge("combine", END);
//!
//! let compiled = graph.compile(None, InterruptConfig::new())?;
//! let state = compiled.invoke(json!({}), "demo").await?;
//! assert_eq!(state["count"], 2);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod compiled;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod retry;
pub mod send;
pub mod state;
pub mod trace;
pub mod typed;

pub use builder::StateGraph;
pub use compiled::{CompiledGraph, GraphStream, StateSnapshot, StreamEvent, StreamMode};
pub use error::{GraphError, Result};
pub use graph::{NodeContext, NodeFuture, NodeId, END, START};
pub use interrupt::InterruptConfig;
pub use retry::RetryPolicy;
pub use send::{ConditionalEdgeResult, Send};
pub use state::{
    AppendListReducer, KeepFirstNonEmptyReducer, OverwriteReducer, Reducer, StateSchema,
    UnionSetReducer,
};
pub use trace::{execution_id, parse_execution_id, LogTree, LogTreeEdge, MemoryTraceSink, TraceSink};
pub use typed::patch_to_value;

pub use finrag_checkpoint::{CheckpointSaver, InMemoryCheckpointSaver};
