//! The reasoning graphs.
//!
//! ```text
//!  safety_check ─▶ merge_context ─▶ decide_path ─┬─▶ general_llm ────────────────────────┐
//!        │               │                       ├─▶ web_answer ─────────────────────────┤
//!        ▼               ▼                       └─▶ clarify ◀─▶ await_clarification*    │
//!       END      END (cache/context hit)               │                                 │
//!                                                      ▼                                 │
//!                              refine ─▶ decide_financial_path ─▶ check_reports          │
//!                                                                   │    ▲               │
//!                                                                   ▼    │               │
//!                                                          confirm_download*             │
//!                                                                   │                    │
//!                                                     select_analysis* (research mode)   │
//!                                                                   │                    │
//!                        ┌──────────────┬───────────────┬───────────┴───────┐            │
//!                        ▼              ▼               ▼                   ▼            │
//!                  answer_simple  answer_complex  answer_persona      kpi_analysis       │
//!                   (RAG graph)   (repeater graph) (persona graph)   (concurrent)        │
//!                        └──────────────┴───────┬───────┴───────────────────┘            │
//!                                               ▼                                        │
//!                                           finalize ─▶ follow_ups ◀─────────────────────┘
//!                                                            │
//!                                                           END
//! ```
//!
//! Nodes marked `*` are interrupts: the session driver asks the user and
//! resumes with the answer in `user_response`.
//!
//! Sub-graphs ([`rag`], [`repeater`], [`persona`]) are compiled once and run
//! inside the node that needs them, with the calling task's trace id as
//! their root.

pub mod analysis;
pub mod answer;
pub mod clarifier;
pub mod decomposer;
pub mod filings;
pub mod graph;
pub mod path_decider;
pub mod persona;
pub mod prompts;
pub mod question_tree;
pub mod rag;
pub mod repeater;
pub mod schemas;
pub mod state;
pub mod triage;

pub use graph::{build_main_graph, MainGraph, INTERRUPT_NODES};
pub use prompts::REFUSAL;
pub use question_tree::{QuestionNode, QuestionTree, DECOMPOSER_DEPTH};
pub use rag::{RagOutcome, RagRunner};
pub use repeater::{RepeaterOutcome, RepeaterRunner};
pub use persona::{PersonaOutcome, PersonaRunner};
pub use state::{ChatTurn, ClarifyingQuestion, Path, QuestionType, RetryCounters, SharedState};

use finrag_graph::{NodeContext, RetryPolicy, StateGraph};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;

use crate::config::Limits;
use crate::error::Result;

/// Register `step` as node `name`; every run gets a clone of `deps`
pub(crate) fn add_step<D, S, P, F, Fut>(graph: &mut StateGraph, name: &str, deps: &D, step: F)
where
    D: Clone + Send + Sync + 'static,
    S: DeserializeOwned + Send + 'static,
    P: Serialize + Send + 'static,
    F: Fn(D, S, NodeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<P>> + Send + 'static,
{
    let deps = deps.clone();
    graph.add_typed_node(name, move |state: S, ctx: NodeContext| step(deps.clone(), state, ctx));
}

/// Identity router mapping, so `compile` checks every target exists
pub(crate) fn branches<const N: usize>(targets: [&'static str; N]) -> [(&'static str, &'static str); N] {
    targets.map(|target| (target, target))
}

/// Executor-level re-runs of a failing node
pub(crate) fn node_retry_policy(limits: &Limits) -> RetryPolicy {
    RetryPolicy::with_retries(limits.node_retries)
}

/// Trim, drop empties and duplicates, cap at `max`
pub(crate) fn clean_list(items: Vec<String>, max: usize) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !cleaned.contains(&item) {
            cleaned.push(item);
        }
    }
    cleaned.truncate(max);
    cleaned
}
