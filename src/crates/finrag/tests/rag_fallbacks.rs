//! Retrieval fallbacks that end in web search: documents graded irrelevant
//! after every rewrite, and a metadata filter that matches nothing even
//! after broadening.

mod common;

use common::*;
use finrag::websearch::web_document;
use finrag::workflow::prompts::tasks;
use finrag::workflow::RagRunner;
use finrag::{Document, SessionRequest};
use finrag_graph::{execution_id, LogTree};
use llm::ScriptedLlm;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const APPLE_REVENUE_QUERY: &str = "What was Apple's revenue in 2022?";
const TESLA_QUARTER_QUERY: &str = "What was Tesla's revenue in the 2021 10-Q?";

fn web_result() -> Document {
    web_document(
        "https://example.com/filings",
        "Filing summary",
        "Revenue figures reported in the filing",
        0.7,
    )
}

fn rejecting_grader(llm: ScriptedLlm) -> ScriptedLlm {
    with_defaults(llm, &[tasks::GRADE_DOCUMENT]).with_response(
        tasks::GRADE_DOCUMENT,
        json!({ "relevant": false, "reason": "off topic", "relevance_score": 0.0 }),
    )
}

/// Tesla, 2021 and 10-Q each rule out the whole corpus, so no broadening helps
fn unmatched_filter(llm: ScriptedLlm) -> ScriptedLlm {
    with_defaults(llm, &[tasks::EXTRACT_METADATA]).with_response(
        tasks::EXTRACT_METADATA,
        json!({ "company_name": ["Tesla"], "year": ["2021"], "type": ["10-Q"] }),
    )
}

#[tokio::test]
async fn test_irrelevant_documents_fall_back_to_web_after_rewrites() {
    let dir = TempDir::new().unwrap();
    let llm = rejecting_grader(ScriptedLlm::new());
    let web = Arc::new(StubWebSearch::new(vec![web_result()]));
    let services = default_services(&llm).with_web(web.clone());
    let limits = services.limits.clone();
    let driver = driver(services, dir.path());

    let mut session = driver.start(SessionRequest::new(APPLE_REVENUE_QUERY)).await.unwrap();
    let (result, _) = run_to_end(&mut session, &[]).await;

    let counters = &result.state.retry_counters;
    assert_eq!(counters.doc_grading_retries, limits.max_doc_grading_retries);
    assert_eq!(counters.metadata_filtering_retries, 0);
    assert_eq!(llm.call_count(tasks::HYDE), limits.max_doc_grading_retries as usize);
    assert_eq!(web.calls(), 1);
    assert_eq!(result.citations, vec![web_result().id]);
    assert_eq!(llm.call_count(tasks::GENERATE_ANSWER), 1);
}

#[tokio::test]
async fn test_empty_filtered_retrieval_falls_back_to_web_after_broadening() {
    let dir = TempDir::new().unwrap();
    let llm = unmatched_filter(ScriptedLlm::new());
    let web = Arc::new(StubWebSearch::new(vec![web_result()]));
    let services = default_services(&llm).with_web(web.clone());
    let limits = services.limits.clone();
    let driver = driver(services, dir.path());

    let mut session = driver.start(SessionRequest::new(TESLA_QUARTER_QUERY)).await.unwrap();
    let (result, _) = run_to_end(&mut session, &[]).await;

    let counters = &result.state.retry_counters;
    assert_eq!(counters.metadata_filtering_retries, limits.max_metadata_filtering_retries);
    assert_eq!(counters.doc_grading_retries, 0);
    assert_eq!(llm.call_count(tasks::HYDE), 0);
    // nothing was retrieved, so nothing was graded
    assert_eq!(llm.call_count(tasks::GRADE_DOCUMENT), 0);
    assert_eq!(web.calls(), 1);
    assert_eq!(result.citations, vec![web_result().id]);
}

#[tokio::test]
async fn test_rag_run_reports_web_use() {
    let irrelevant = rejecting_grader(ScriptedLlm::new());
    let services = default_services(&irrelevant).with_web(Arc::new(StubWebSearch::new(vec![web_result()])));
    let outcome = RagRunner::new(&services)
        .unwrap()
        .run_traced(APPLE_REVENUE_QUERY, LogTree::new(), execution_id("test"))
        .await
        .unwrap();
    assert!(outcome.web_used);
    assert!(!outcome.refused);
    assert_eq!(outcome.counters.doc_grading_retries, 2);

    let filtered = unmatched_filter(ScriptedLlm::new());
    let services = default_services(&filtered).with_web(Arc::new(StubWebSearch::new(vec![web_result()])));
    let log_tree = LogTree::new();
    let outcome = RagRunner::new(&services)
        .unwrap()
        .run_traced(TESLA_QUARTER_QUERY, log_tree.clone(), execution_id("test"))
        .await
        .unwrap();
    assert!(outcome.web_used);
    assert_eq!(outcome.counters.metadata_filtering_retries, 2);
    let broadenings = log_tree
        .name_pairs()
        .into_iter()
        .filter(|(_, child)| child == "broaden_filter")
        .count();
    assert_eq!(broadenings, 2);
}
