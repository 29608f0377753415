//! End-to-end executor behaviour: fan-out, fan-in, conflicts, interrupts,
//! retries and the execution tree.

use finrag_graph::{
    AppendListReducer, CheckpointSaver, ConditionalEdgeResult, GraphError, InMemoryCheckpointSaver,
    InterruptConfig, NodeContext, RetryPolicy, Send, StateGraph, StreamEvent, StreamMode,
    UnionSetReducer, END,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn instant_retries(retries: usize) -> RetryPolicy {
    RetryPolicy::with_retries(retries)
        .with_initial_interval(0.0)
        .with_jitter(false)
}

fn fan_out(state: &Value) -> ConditionalEdgeResult {
    let sends = state["questions"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|q| Send::new("answer", json!({ "question": q })))
        .collect::<Vec<_>>();
    ConditionalEdgeResult::Sends(sends)
}

#[tokio::test]
async fn test_fan_in_runs_once_after_all_branches() {
    let combined = Arc::new(AtomicUsize::new(0));
    let counter = combined.clone();

    let mut graph = StateGraph::new();
    graph.add_reducer("answers", AppendListReducer);
    graph.add_node("split", |_s| {
        Box::pin(async move { Ok(json!({ "questions": ["q1", "q2", "q3"] })) })
    });
    graph.add_node("answer", |s| {
        Box::pin(async move {
            let question = s["question"].as_str().unwrap_or_default().to_string();
            Ok(json!({ "answers": [format!("a:{question}")] }))
        })
    });
    graph.add_node("combine", move |s| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let count = s["answers"].as_array().map(|a| a.len()).unwrap_or(0);
            Ok(json!({ "count": count }))
        })
    });
    graph.set_entry("split");
    graph.add_conditional_edges("split", fan_out, Vec::<(String, String)>::new());
    graph.add_edge("answer", "combine");
    graph.add_edge("combine", END);

    let compiled = graph.compile(None, InterruptConfig::new()).unwrap();
    let state = compiled.invoke(json!({}), "fan-in").await.unwrap();

    assert_eq!(combined.load(Ordering::SeqCst), 1);
    assert_eq!(state["count"], 3);
    assert_eq!(state["answers"], json!(["a:q1", "a:q2", "a:q3"]));
    // the overlay stays local to its branch
    assert!(state.get("question").is_none());
}

#[tokio::test]
async fn test_concurrent_overwrite_is_rejected() {
    let mut graph = StateGraph::new();
    graph.add_node("start", |_s| Box::pin(async move { Ok(json!({})) }));
    graph.add_node("left", |_s| Box::pin(async move { Ok(json!({ "answer": "left" })) }));
    graph.add_node("right", |_s| Box::pin(async move { Ok(json!({ "answer": "right" })) }));
    graph.set_entry("start");
    graph.add_conditional_edges(
        "start",
        |_s| ConditionalEdgeResult::Nodes(vec!["left".into(), "right".into()]),
        Vec::<(String, String)>::new(),
    );
    graph.add_edge("left", END);
    graph.add_edge("right", END);

    let compiled = graph.compile(None, InterruptConfig::new()).unwrap();
    let err = compiled.invoke(json!({}), "conflict").await.unwrap_err();
    match err {
        GraphError::ConcurrentWrite { field, writers } => {
            assert_eq!(field, "answer");
            assert_eq!(writers, vec!["left".to_string(), "right".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_concurrent_union_writes_merge() {
    let mut graph = StateGraph::new();
    graph.add_reducer("tags", UnionSetReducer);
    graph.add_node("start", |_s| Box::pin(async move { Ok(json!({ "tags": ["x"] })) }));
    graph.add_node("left", |_s| Box::pin(async move { Ok(json!({ "tags": ["x", "l"] })) }));
    graph.add_node("right", |_s| Box::pin(async move { Ok(json!({ "tags": ["r"] })) }));
    graph.set_entry("start");
    graph.add_conditional_edges(
        "start",
        |_s| vec!["left", "right"].into(),
        Vec::<(String, String)>::new(),
    );
    graph.add_edge("left", END);
    graph.add_edge("right", END);

    let compiled = graph.compile(None, InterruptConfig::new()).unwrap();
    let state = compiled.invoke(json!({}), "union").await.unwrap();
    assert_eq!(state["tags"], json!(["x", "l", "r"]));
}

fn clarify_graph(saver: Arc<dyn CheckpointSaver>) -> finrag_graph::CompiledGraph {
    let mut graph = StateGraph::new();
    graph.add_node("ask", |_s| {
        Box::pin(async move { Ok(json!({ "prompt": "Which year?" })) })
    });
    graph.add_node("wait", |s| {
        Box::pin(async move {
            let reply = s["reply"].as_str().unwrap_or("none").to_string();
            Ok(json!({ "answer": format!("using {reply}") }))
        })
    });
    graph.set_entry("ask");
    graph.add_edge("ask", "wait");
    graph.add_edge("wait", END);
    graph
        .compile(Some(saver), InterruptConfig::new().with_interrupt_before(["wait"]))
        .unwrap()
}

#[tokio::test]
async fn test_interrupt_update_and_resume() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = clarify_graph(saver.clone());

    let events: Vec<StreamEvent> = compiled
        .stream(Some(json!({ "query": "revenue?" })), "t1", StreamMode::Values)
        .map(|e| e.unwrap())
        .collect()
        .await;
    let last = events.last().cloned().unwrap();
    assert!(matches!(last, StreamEvent::Interrupt { ref next, .. } if next == &vec!["wait".to_string()]));

    let snapshot = compiled.get_state("t1").await.unwrap().unwrap();
    assert!(snapshot.interrupted);
    assert_eq!(snapshot.next, vec!["wait".to_string()]);
    assert_eq!(snapshot.values["prompt"], "Which year?");

    let updated = compiled
        .update_state("t1", json!({ "reply": "2023" }))
        .await
        .unwrap();
    assert!(updated.interrupted);
    assert_eq!(updated.next, vec!["wait".to_string()]);

    let state = compiled.invoke_with_parent(None, "t1", None).await.unwrap();
    assert_eq!(state["answer"], "using 2023");

    let finished = compiled.get_state("t1").await.unwrap().unwrap();
    assert!(finished.next.is_empty());
    assert!(!finished.interrupted);

    let history = compiled.state_history("t1", None).await.unwrap();
    assert!(history.len() >= 4);
    assert!(history[0].step >= history[history.len() - 1].step);
}

#[tokio::test]
async fn test_resume_without_checkpoint_fails() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let compiled = clarify_graph(saver);
    let err = compiled.invoke_with_parent(None, "missing", None).await.unwrap_err();
    assert!(matches!(err, GraphError::NothingToResume(_)));
    let err = compiled.update_state("missing", json!({})).await.unwrap_err();
    assert!(matches!(err, GraphError::NothingToResume(_)));
}

#[tokio::test]
async fn test_retry_counts_accumulate() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let saver = Arc::new(InMemoryCheckpointSaver::new());

    let mut graph = StateGraph::new();
    graph.add_node("flaky", move |_s| {
        let seen = seen.clone();
        Box::pin(async move {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(GraphError::node_execution("flaky", "timeout"))
            } else {
                Ok(json!({ "done": true }))
            }
        })
    });
    graph.set_retry_policy("flaky", instant_retries(3));
    graph.set_entry("flaky");
    graph.add_edge("flaky", END);

    let compiled = graph.compile(Some(saver), InterruptConfig::new()).unwrap();
    let state = compiled.invoke(json!({}), "retry").await.unwrap();
    assert_eq!(state["done"], true);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let snapshot = compiled.get_state("retry").await.unwrap().unwrap();
    assert_eq!(snapshot.retry_counts.get("flaky"), Some(&2));
}

#[tokio::test]
async fn test_exhausted_node_escalates_and_keeps_pending() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let mut graph = StateGraph::new();
    graph.add_node("broken", |_s| {
        Box::pin(async move { Err(GraphError::node_execution("broken", "boom")) })
    });
    graph.set_retry_policy("broken", instant_retries(1));
    graph.set_entry("broken");
    graph.add_edge("broken", END);

    let compiled = graph.compile(Some(saver), InterruptConfig::new()).unwrap();
    let err = compiled.invoke(json!({}), "fail").await.unwrap_err();
    assert!(err.to_string().contains("boom"));

    let snapshot = compiled.get_state("fail").await.unwrap().unwrap();
    assert_eq!(snapshot.next, vec!["broken".to_string()]);
    assert_eq!(snapshot.retry_counts.get("broken"), Some(&2));
}

#[tokio::test]
async fn test_failing_branch_is_dropped() {
    let mut graph = StateGraph::new();
    graph.add_reducer("answers", AppendListReducer);
    graph.add_node("split", |_s| {
        Box::pin(async move { Ok(json!({ "questions": ["good", "bad", "fine"] })) })
    });
    graph.add_node("answer", |s| {
        Box::pin(async move {
            match s["question"].as_str() {
                Some("bad") => Err(GraphError::node_execution("answer", "cannot answer")),
                Some(q) => Ok(json!({ "answers": [q] })),
                None => Ok(json!({})),
            }
        })
    });
    graph.add_node("combine", |s| {
        Box::pin(async move { Ok(json!({ "combined": s["answers"].clone() })) })
    });
    graph.set_entry("split");
    graph.add_conditional_edges("split", fan_out, Vec::<(String, String)>::new());
    graph.add_edge("answer", "combine");
    graph.add_edge("combine", END);

    let compiled = graph.compile(None, InterruptConfig::new()).unwrap();
    let state = compiled.invoke(json!({}), "drop").await.unwrap();
    assert_eq!(state["combined"], json!(["good", "fine"]));
}

#[tokio::test]
async fn test_fan_in_runs_when_every_branch_fails() {
    let mut graph = StateGraph::new();
    graph.add_reducer("answers", AppendListReducer);
    graph.add_node("split", |_s| {
        Box::pin(async move { Ok(json!({ "questions": ["q1", "q2"] })) })
    });
    graph.add_node("answer", |_s| {
        Box::pin(async move { Err(GraphError::node_execution("answer", "service unavailable")) })
    });
    graph.add_node("combine", |s| {
        Box::pin(async move {
            let count = s["answers"].as_array().map(|a| a.len()).unwrap_or(0);
            Ok(json!({ "combined": count }))
        })
    });
    graph.add_node("report", |_s| Box::pin(async move { Ok(json!({ "reported": true })) }));
    graph.set_entry("split");
    graph.add_conditional_edges("split", fan_out, Vec::<(String, String)>::new());
    graph.add_edge("answer", "combine");
    graph.add_edge("combine", "report");
    graph.add_edge("report", END);

    let compiled = graph.compile(None, InterruptConfig::new()).unwrap();
    let state = compiled.invoke(json!({}), "all-dropped").await.unwrap();

    assert_eq!(state["combined"], 0);
    assert_eq!(state["reported"], true);
    let combines = compiled
        .log_tree()
        .name_pairs()
        .into_iter()
        .filter(|(_, child)| child == "combine")
        .count();
    assert_eq!(combines, 1);
}

#[tokio::test]
async fn test_execution_tree_links_tasks() {
    let mut graph = StateGraph::new();
    graph.add_node("first", |_s| Box::pin(async move { Ok(json!({})) }));
    graph.add_node_with_context("second", |_s, ctx: NodeContext| {
        Box::pin(async move {
            let child = ctx.open_child("subgraph", "nested run");
            Ok(json!({ "child": child }))
        })
    });
    graph.set_entry("first");
    graph.add_edge("first", "second");
    graph.add_edge("second", END);

    let compiled = graph.compile(None, InterruptConfig::new()).unwrap();
    let root = finrag_graph::execution_id("session");
    let state = compiled
        .invoke_with_parent(Some(json!({})), "trace", Some(root.clone()))
        .await
        .unwrap();

    let pairs = compiled.log_tree().name_pairs();
    assert_eq!(
        pairs,
        vec![
            ("session".to_string(), "first".to_string()),
            ("first".to_string(), "second".to_string()),
            ("second".to_string(), "subgraph".to_string()),
        ]
    );
    assert_eq!(compiled.log_tree().children_of(&root).len(), 1);
    let child = state["child"].as_str().unwrap();
    assert!(finrag_graph::parse_execution_id(child).is_some());
}

#[tokio::test]
async fn test_recursion_limit_stops_cycles() {
    let mut graph = StateGraph::new();
    graph.add_node("spin", |_s| Box::pin(async move { Ok(json!({})) }));
    graph.set_entry("spin");
    graph.add_edge("spin", "spin");

    let compiled = graph
        .compile(None, InterruptConfig::new())
        .unwrap()
        .with_recursion_limit(5);
    let err = compiled.invoke(json!({}), "loop").await.unwrap_err();
    assert!(matches!(err, GraphError::RecursionLimit(5)));
}
