//! Bounds and guarantees of the session driver: the clarification cap, retry
//! budgets, resumption, caching, cancellation and trace export.

mod common;

use common::*;
use finrag::config::CacheConfig;
use finrag::workflow::prompts::tasks;
use finrag::workflow::state::QuestionType;
use finrag::workflow::REFUSAL;
use finrag::{AnswerCache, ExitCode, InMemoryRetriever, RunMode, SessionRequest, SessionStep};
use finrag_graph::MemoryTraceSink;
use llm::{LlmError, ScriptedLlm};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const APPLE_REVENUE_QUERY: &str = "What was Apple's revenue in 2022?";

fn year_question() -> serde_json::Value {
    json!({
        "question_type": "single_choice",
        "question": "Which fiscal year?",
        "options": ["2021", "2022"]
    })
}

#[tokio::test]
async fn test_clarification_stops_at_the_cap() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[tasks::CLARIFY])
        .with_response(tasks::CLARIFY, year_question())
        .with_response(tasks::REFINE_QUERY, json!({ "query": "What was Apple's revenue in fiscal 2022?" }));
    let driver = driver(default_services(&llm), dir.path());

    let mut session = driver.start(SessionRequest::new("What was Apple's revenue?")).await.unwrap();
    let (result, prompts) = run_to_end(&mut session, &["2022", "10-K"]).await;

    assert_eq!(prompts.len(), 2);
    assert!(prompts.iter().all(|p| p.node == "await_clarification"));
    assert_eq!(prompts[0].prompt, "Which fiscal year? (choose one: 2021, 2022)");

    let questions = &result.state.clarifying_questions;
    assert_eq!(questions.len(), 3);
    assert_eq!(questions[2].question_type, QuestionType::None);
    assert_eq!(questions[0].answer.as_deref(), Some("2022"));
    assert_eq!(questions[1].answer.as_deref(), Some("10-K"));

    assert_eq!(llm.call_count(tasks::CLARIFY), 2);
    let refine = llm.calls_for(tasks::REFINE_QUERY);
    assert_eq!(refine.len(), 1);
    assert!(refine[0].prompt.contains("A: 2022"));
    assert!(refine[0].prompt.contains("A: 10-K"));
    assert_eq!(result.state.refined_query, "What was Apple's revenue in fiscal 2022?");
    assert!(result.answer.contains("394,328"));
}

#[tokio::test]
async fn test_empty_reply_ends_clarification() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[tasks::CLARIFY]).with_response(tasks::CLARIFY, year_question());
    let driver = driver(default_services(&llm), dir.path());

    let mut session = driver.start(SessionRequest::new(APPLE_REVENUE_QUERY)).await.unwrap();
    let (result, prompts) = run_to_end(&mut session, &[""]).await;

    assert_eq!(prompts.len(), 1);
    let questions = &result.state.clarifying_questions;
    assert_eq!(questions.len(), 2);
    assert_eq!(questions[0].answer.as_deref(), Some("ignore"));
    assert!(questions[1].is_none());
    assert_eq!(llm.call_count(tasks::CLARIFY), 1);
    assert_eq!(llm.call_count(tasks::REFINE_QUERY), 0);
    assert_eq!(result.state.refined_query, APPLE_REVENUE_QUERY);
}

#[tokio::test]
async fn test_fast_mode_skips_clarification_and_checks() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[tasks::CLARIFY]).with_response(tasks::CLARIFY, year_question());
    let driver = driver(default_services(&llm), dir.path());

    let request = SessionRequest::new(APPLE_REVENUE_QUERY).with_mode(RunMode::fast());
    let mut session = driver.start(request).await.unwrap();
    let (result, prompts) = run_to_end(&mut session, &[]).await;

    assert!(prompts.is_empty());
    assert!(result.answer.contains("394,328"));
    assert_eq!(llm.call_count(tasks::CLARIFY), 0);
    assert_eq!(llm.call_count(tasks::CHECK_HALLUCINATION), 0);
    assert_eq!(llm.call_count(tasks::GRADE_ANSWER), 0);
}

#[tokio::test]
async fn test_resumed_runs_are_deterministic() {
    async fn run_once() -> (String, Vec<String>, Vec<String>) {
        let dir = TempDir::new().unwrap();
        let llm = with_defaults(ScriptedLlm::new(), &[tasks::CLARIFY])
            .with_response(tasks::CLARIFY, year_question())
            .with_response(tasks::CLARIFY, json!({ "question_type": "none" }))
            .with_response(tasks::REFINE_QUERY, json!({ "query": "What was Apple's revenue in fiscal 2022?" }));
        let driver = driver(default_services(&llm), dir.path());
        let mut session = driver.start(SessionRequest::new("What was Apple's revenue?")).await.unwrap();
        let (result, _) = run_to_end(&mut session, &["2022"]).await;
        let mut calls = llm.call_sequence();
        calls.sort();
        (result.answer, result.citations, calls)
    }

    let first = run_once().await;
    let second = run_once().await;
    assert_eq!(first, second);
    assert!(first.0.contains("394,328"));
}

#[tokio::test]
async fn test_relevance_threshold_of_one_document_needs_no_rewrite() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[]);
    let single = InMemoryRetriever::new(corpus().into_iter().filter(|d| d.id == APPLE_REVENUE).collect());
    let driver = driver(services(&llm, Arc::new(single), local_reports()), dir.path());

    let mut session = driver.start(SessionRequest::new(APPLE_REVENUE_QUERY)).await.unwrap();
    let (result, _) = run_to_end(&mut session, &[]).await;

    assert_eq!(result.citations, vec![APPLE_REVENUE.to_string()]);
    assert_eq!(llm.call_count(tasks::HYDE), 0);
    assert_eq!(llm.call_count(tasks::GENERATE_ANSWER), 1);
    assert_eq!(result.state.retry_counters.doc_grading_retries, 0);
}

#[tokio::test]
async fn test_persistent_hallucination_ends_in_refusal() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[tasks::CHECK_HALLUCINATION]).with_response(
        tasks::CHECK_HALLUCINATION,
        json!({ "hallucinated": true, "reason": "figure not in the documents" }),
    );
    let driver = driver(default_services(&llm), dir.path());

    let mut session = driver.start(SessionRequest::new(APPLE_REVENUE_QUERY)).await.unwrap();
    let (result, _) = run_to_end(&mut session, &[]).await;

    assert_eq!(result.answer, REFUSAL);
    assert!(result.citations.is_empty());
    assert!(result.follow_ups.is_empty());
    assert_eq!(result.exit_code, ExitCode::Success);
    assert_eq!(llm.call_count(tasks::CHECK_HALLUCINATION), 3);
    assert_eq!(llm.call_count(tasks::GENERATE_ANSWER), 3);
    assert_eq!(llm.call_count(tasks::FOLLOW_UPS), 0);
    assert_eq!(result.state.retry_counters.hallucination_retries, 3);
}

#[tokio::test]
async fn test_insufficient_answer_is_regenerated_once() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[tasks::GRADE_ANSWER, tasks::HYDE])
        .with_response(
            tasks::GRADE_ANSWER,
            json!({ "sufficient": false, "reason": "no figure given" }),
        )
        .with_response(
            tasks::HYDE,
            json!({ "passage": "Apple total net sales revenue in fiscal 2022" }),
        );
    let driver = driver(default_services(&llm), dir.path());

    let mut session = driver.start(SessionRequest::new(APPLE_REVENUE_QUERY)).await.unwrap();
    let (result, _) = run_to_end(&mut session, &[]).await;

    assert_eq!(llm.call_count(tasks::GRADE_ANSWER), 2);
    assert_eq!(llm.call_count(tasks::HYDE), 1);
    assert!(llm.calls_for(tasks::HYDE)[0].prompt.contains("no figure given"));
    assert_eq!(result.state.retry_counters.answer_generation_retries, 2);
    assert!(result.answer.contains("394,328"));
}

#[tokio::test]
async fn test_failing_runs_exhaust_session_retries() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[tasks::DECIDE_PATH])
        .with_failure(tasks::DECIDE_PATH, || LlmError::ServiceUnavailable("model overloaded".into()));
    let driver = driver(default_services(&llm), dir.path());

    let mut session = driver.start(SessionRequest::new(APPLE_REVENUE_QUERY)).await.unwrap();
    let (result, _) = run_to_end(&mut session, &[]).await;

    assert_eq!(result.exit_code, ExitCode::RetriesExhausted);
    assert_eq!(result.exit_code.code(), 2);
    assert_eq!(result.answer, REFUSAL);
    assert_eq!(llm.call_count(tasks::DECIDE_PATH), 3);
    assert_eq!(llm.call_count(tasks::SAFETY_CHECK), 1);
    assert!(driver.chat_log().read(session.id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_failure_resumes_from_checkpoint() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[tasks::DECIDE_PATH])
        .with_failure(tasks::DECIDE_PATH, || LlmError::Timeout("30s".into()))
        .with_response(tasks::DECIDE_PATH, json!({ "path": "financial" }));
    let driver = driver(default_services(&llm), dir.path());

    let mut session = driver.start(SessionRequest::new(APPLE_REVENUE_QUERY)).await.unwrap();
    let (result, _) = run_to_end(&mut session, &[]).await;

    assert_eq!(result.exit_code, ExitCode::Success);
    assert!(result.answer.contains("394,328"));
    assert_eq!(llm.call_count(tasks::DECIDE_PATH), 2);
    assert_eq!(llm.call_count(tasks::SAFETY_CHECK), 1);
}

#[tokio::test]
async fn test_second_session_is_answered_from_cache() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[]);
    let cache = AnswerCache::new(&CacheConfig {
        enabled: true,
        max_entries: 16,
    });
    let driver = driver(default_services(&llm).with_cache(cache), dir.path());

    let mut first = driver.start(SessionRequest::new(APPLE_REVENUE_QUERY)).await.unwrap();
    let (first, _) = run_to_end(&mut first, &[]).await;

    let mut second = driver
        .start(SessionRequest::new("what was apple's revenue in 2022"))
        .await
        .unwrap();
    let (second, _) = run_to_end(&mut second, &[]).await;

    assert_eq!(second.answer_type, "cache");
    assert_eq!(second.answer, first.answer);
    assert_eq!(second.citations, first.citations);
    assert_eq!(llm.call_count(tasks::SAFETY_CHECK), 2);
    assert_eq!(llm.call_count(tasks::DECIDE_PATH), 1);
    assert_eq!(llm.call_count(tasks::GENERATE_ANSWER), 1);
}

#[tokio::test]
async fn test_follow_up_query_is_merged_with_conversation() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[]).with_response(
        tasks::MERGE_CONTEXT,
        json!({ "standalone_query": "What was Apple's R&D expense in 2022?", "answered_by_context": false }),
    );
    let driver = driver(default_services(&llm), dir.path());

    let mut first = driver
        .start(SessionRequest::new(APPLE_REVENUE_QUERY).in_session("analyst-1"))
        .await
        .unwrap();
    run_to_end(&mut first, &[]).await;
    assert_eq!(llm.call_count(tasks::MERGE_CONTEXT), 0);

    let mut second = driver
        .start(SessionRequest::new("And how much did it spend on R&D?").in_session("analyst-1"))
        .await
        .unwrap();
    let (result, _) = run_to_end(&mut second, &[]).await;

    let merges = llm.calls_for(tasks::MERGE_CONTEXT);
    assert_eq!(merges.len(), 1);
    assert!(merges[0].prompt.contains(&format!("User: {APPLE_REVENUE_QUERY}")));
    assert_eq!(result.state.standalone_query, "What was Apple's R&D expense in 2022?");
    assert_eq!(result.citations, vec![APPLE_RD.to_string()]);

    let records = driver.chat_log().read("analyst-1").await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].query, "And how much did it spend on R&D?");
}

#[tokio::test]
async fn test_conversation_can_answer_directly() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[]).with_response(
        tasks::MERGE_CONTEXT,
        json!({
            "standalone_query": "What was Apple's revenue in 2022?",
            "answered_by_context": true,
            "answer": "As mentioned, $394,328 million."
        }),
    );
    let driver = driver(default_services(&llm), dir.path());

    let mut first = driver
        .start(SessionRequest::new(APPLE_REVENUE_QUERY).in_session("analyst-2"))
        .await
        .unwrap();
    run_to_end(&mut first, &[]).await;

    let mut second = driver
        .start(SessionRequest::new("Can you repeat that?").in_session("analyst-2"))
        .await
        .unwrap();
    let (result, _) = run_to_end(&mut second, &[]).await;

    assert_eq!(result.answer_type, "context");
    assert_eq!(result.answer, "As mentioned, $394,328 million.");
    assert_eq!(llm.call_count(tasks::DECIDE_PATH), 1);
}

#[tokio::test]
async fn test_cancel_at_interrupt() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[tasks::CLARIFY]).with_response(tasks::CLARIFY, year_question());
    let driver = driver(default_services(&llm), dir.path());

    let mut session = driver.start(SessionRequest::new(APPLE_REVENUE_QUERY)).await.unwrap();
    assert!(matches!(session.step().await.unwrap(), SessionStep::Interrupt(_)));
    assert!(session.step().await.is_err());

    let result = session.cancel().await;
    assert_eq!(result.exit_code, ExitCode::Cancelled);
    assert_eq!(result.exit_code.code(), 3);
    assert!(result.answer.is_empty());
    assert!(matches!(session.step().await.unwrap(), SessionStep::Final(r) if r.exit_code == ExitCode::Cancelled));
    assert!(session.respond("2022").await.is_err());
    assert!(driver.chat_log().read(session.id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[]);
    let driver = driver(default_services(&llm), dir.path());

    assert!(driver.start(SessionRequest::new("   ")).await.is_err());
    assert!(llm.calls().is_empty());
}

#[tokio::test]
async fn test_research_mode_runs_selected_kpi_analysis() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[tasks::EXTRACT_REPORT])
        .with_response(
            tasks::EXTRACT_REPORT,
            json!({ "company": "Apple", "year": 2022, "doc_type": "10-K" }),
        )
        .with_handler(tasks::EXTRACT_KPI_VALUE, |request| {
            let value = if request.prompt.starts_with("Figure: current_assets ") {
                json!(150.0)
            } else if request.prompt.starts_with("Figure: current_liabilities ") {
                json!(100.0)
            } else {
                json!(null)
            };
            Ok(json!({ "value": value }))
        });
    let driver = driver(default_services(&llm), dir.path());

    let request = SessionRequest::new(APPLE_REVENUE_QUERY).with_mode(RunMode::research());
    let mut session = driver.start(request).await.unwrap();
    let (result, prompts) = run_to_end(&mut session, &["liquidity"]).await;

    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].node, "select_analysis");
    assert!(prompts[0].prompt.contains("Liquidity"));

    assert_eq!(result.state.analysis_topic, "Liquidity");
    assert!(!result.state.kpi_results.is_empty());
    assert!(result.answer.contains("394,328"));
    assert!(result.answer.contains("KPI analysis (Liquidity):"), "answer: {}", result.answer);
    assert!(result.answer.contains("Current ratio: 1.50"));
    assert!(result.citations.contains(&APPLE_REVENUE.to_string()));
    assert!(result.citations.contains(&APPLE_BALANCE_SHEET.to_string()));
}

#[tokio::test]
async fn test_research_mode_analysis_can_be_skipped() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[tasks::EXTRACT_REPORT]).with_response(
        tasks::EXTRACT_REPORT,
        json!({ "company": "Apple", "year": 2022 }),
    );
    let driver = driver(default_services(&llm), dir.path());

    let request = SessionRequest::new(APPLE_REVENUE_QUERY).with_mode(RunMode::research());
    let mut session = driver.start(request).await.unwrap();
    let (result, prompts) = run_to_end(&mut session, &["skip"]).await;

    assert_eq!(prompts.len(), 1);
    assert!(result.state.analysis_topic.is_empty());
    assert!(result.state.kpi_results.is_empty());
    assert!(!result.answer.contains("KPI analysis"));
    assert_eq!(llm.call_count(tasks::EXTRACT_KPI_VALUE), 0);
}

#[tokio::test]
async fn test_finished_session_exports_execution_tree() {
    let dir = TempDir::new().unwrap();
    let llm = with_defaults(ScriptedLlm::new(), &[]);
    let sink = Arc::new(MemoryTraceSink::new());
    let driver = driver(default_services(&llm), dir.path()).with_trace_sink(sink.clone());

    let mut session = driver.start(SessionRequest::new(APPLE_REVENUE_QUERY)).await.unwrap();
    run_to_end(&mut session, &[]).await;

    let exported = sink.exported();
    assert_eq!(exported.len(), session.graph().log_tree().len());
    let pairs: Vec<(&str, &str)> = exported.iter().map(|e| (e.parent_name(), e.child_name())).collect();
    assert!(pairs.contains(&("answer_simple", "rag")));
    assert!(pairs.iter().any(|(parent, _)| *parent == "rag"));
    assert!(exported.iter().any(|e| e.child_name() == "follow_ups"));
}
