//! Shared fixtures: a small filing corpus, a scripted model answering every
//! task with sensible defaults, and stub collaborators.
#![allow(dead_code)]

use async_trait::async_trait;
use finrag::document::DocumentMetadata;
use finrag::reports::InMemoryReportCatalog;
use finrag::workflow::prompts::tasks;
use finrag::{
    Document, InMemoryRetriever, InterruptPrompt, MetadataFilter, ReportDownloader, ReportKey, Retriever,
    Services, Session, SessionDriver, SessionResult, SessionStep, WebSearch,
};
use finrag::ChatLog;
use llm::{ScriptedLlm, StructuredRequest};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const APPLE_REVENUE: &str = "aapl-2022-10k-p41";
pub const APPLE_RD: &str = "aapl-2022-rd";
pub const APPLE_BALANCE_SHEET: &str = "aapl-2022-bs";
pub const GOOGLE_RD: &str = "googl-2022-rd";
pub const TESLA_RISKS: &str = "tsla-2023-risks";

const COMPANIES: [&str; 3] = ["Apple", "Google", "Tesla"];

fn metadata(company: &str, year: &str) -> DocumentMetadata {
    DocumentMetadata {
        company_name: Some(company.into()),
        year: Some(year.into()),
        doc_type: Some("10-K".into()),
        ..Default::default()
    }
}

pub fn corpus() -> Vec<Document> {
    vec![
        Document::new(APPLE_REVENUE, "Apple total net sales revenue $394,328 million in fiscal 2022")
            .with_metadata(metadata("Apple", "2022")),
        Document::new(APPLE_RD, "Apple research and development R&D expense $26,251 million in fiscal 2022")
            .with_metadata(metadata("Apple", "2022")),
        Document::new(GOOGLE_RD, "Google research and development R&D expense $39,500 million in fiscal 2022")
            .with_metadata(metadata("Google", "2022")),
        Document::new(
            APPLE_BALANCE_SHEET,
            "Apple balance sheet total current assets $135,405 million and total current liabilities $153,982 million in fiscal 2022",
        )
        .with_metadata(metadata("Apple", "2022")),
    ]
}

pub fn tesla_risks() -> Document {
    Document::new(
        TESLA_RISKS,
        "Tesla 2023 10-K risk factors include supply chain constraints and competition",
    )
    .with_metadata(metadata("Tesla", "2023"))
}

pub fn local_reports() -> InMemoryReportCatalog {
    InMemoryReportCatalog::new([
        ReportKey::new("Apple", 2022, "10-K"),
        ReportKey::new("Google", 2022, "10-K"),
    ])
}

/// Relevant when a company named in the question also appears in the document
pub fn grade_by_company(request: &StructuredRequest) -> llm::Result<Value> {
    let (question, document) = request
        .prompt
        .split_once("\n\nDocument:\n")
        .unwrap_or((request.prompt.as_str(), ""));
    let relevant = COMPANIES.iter().any(|c| question.contains(c) && document.contains(c));
    Ok(json!({
        "relevant": relevant,
        "reason": if relevant { "same company" } else { "other company" },
        "relevance_score": if relevant { 0.9 } else { 0.1 },
    }))
}

/// Quote the first context document and cite it
pub fn answer_from_first_document(request: &StructuredRequest) -> llm::Result<Value> {
    let context = request
        .prompt
        .split_once("Documents:\n")
        .map(|(_, context)| context)
        .unwrap_or_default();
    let first = context.lines().next().unwrap_or_default();
    let (id, rest) = first
        .strip_prefix('[')
        .and_then(|line| line.split_once("] "))
        .unwrap_or(("", first));
    Ok(json!({ "answer": format!("{rest} [{id}]"), "citations": [id] }))
}

/// Add a default step for every task not listed in `except`
pub fn with_defaults(llm: ScriptedLlm, except: &[&str]) -> ScriptedLlm {
    let defaults: Vec<(&str, Value)> = vec![
        (tasks::SAFETY_CHECK, json!({ "safe": true, "reason": "" })),
        (tasks::DECIDE_PATH, json!({ "path": "financial", "reason": "filing question" })),
        (tasks::CLARIFY, json!({ "question_type": "none" })),
        (tasks::DECIDE_FINANCIAL_PATH, json!({ "path": "simple_financial" })),
        (tasks::EXTRACT_REPORT, json!({})),
        (tasks::EXTRACT_METADATA, json!({})),
        (tasks::HYDE, json!({ "passage": "A passage from an annual filing." })),
        (tasks::CHECK_HALLUCINATION, json!({ "hallucinated": false })),
        (tasks::GRADE_ANSWER, json!({ "sufficient": true })),
        (tasks::FOLLOW_UPS, json!({ "questions": ["How did it change from the year before?"] })),
        (tasks::GENERAL_ANSWER, json!({ "answer": "51" })),
        (tasks::CRITIQUE, json!({ "feedback": "No changes." })),
        (tasks::COMBINE_ANSWERS, json!({ "answer": "Combined answer." })),
        (tasks::CHECK_SUFFICIENCY, json!({ "verdict": "Fully Answered" })),
    ];

    let mut llm = llm;
    for (task, value) in defaults {
        if !except.contains(&task) {
            llm = llm.with_response(task, value);
        }
    }
    if !except.contains(&tasks::GRADE_DOCUMENT) {
        llm = llm.with_handler(tasks::GRADE_DOCUMENT, grade_by_company);
    }
    if !except.contains(&tasks::GENERATE_ANSWER) {
        llm = llm.with_handler(tasks::GENERATE_ANSWER, answer_from_first_document);
    }
    llm
}

pub fn services(llm: &ScriptedLlm, retriever: Arc<dyn Retriever>, reports: InMemoryReportCatalog) -> Services {
    Services::new(Arc::new(llm.clone()), retriever)
        .unwrap()
        .with_reports(Arc::new(reports))
        .with_retrieval(5, Duration::from_millis(200))
}

pub fn default_services(llm: &ScriptedLlm) -> Services {
    services(llm, Arc::new(InMemoryRetriever::new(corpus())), local_reports())
}

pub fn driver(services: Services, dir: &Path) -> SessionDriver {
    SessionDriver::new(services, ChatLog::new(dir.join("chats")))
}

/// Step the session to the end, answering interrupts in order
pub async fn run_to_end(session: &mut Session, answers: &[&str]) -> (SessionResult, Vec<InterruptPrompt>) {
    let mut answers = answers.iter();
    let mut prompts = Vec::new();
    loop {
        match session.step().await.unwrap() {
            SessionStep::Final(result) => return (result, prompts),
            SessionStep::Interrupt(prompt) => {
                prompts.push(prompt);
                let answer = answers.next().copied().unwrap_or("");
                session.respond(answer).await.unwrap();
            }
        }
    }
}

/// Retriever whose first `slow_calls` calls hang past any sane timeout
pub struct FlakyRetriever {
    inner: InMemoryRetriever,
    slow_calls: usize,
    calls: AtomicUsize,
}

impl FlakyRetriever {
    pub fn new(inner: InMemoryRetriever, slow_calls: usize) -> Self {
        Self {
            inner,
            slow_calls,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for FlakyRetriever {
    async fn query(&self, text: &str, k: usize, filter: Option<&MetadataFilter>) -> finrag::Result<Vec<Document>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.slow_calls {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.query(text, k, filter).await
    }

    async fn statistics(&self) -> finrag::Result<Value> {
        self.inner.statistics().await
    }
}

/// Downloader that "fetches" the Tesla filing into the shared retriever
pub struct StubDownloader {
    retriever: InMemoryRetriever,
    downloaded: Mutex<Vec<ReportKey>>,
}

impl StubDownloader {
    pub fn new(retriever: InMemoryRetriever) -> Self {
        Self {
            retriever,
            downloaded: Mutex::new(Vec::new()),
        }
    }

    pub fn downloaded(&self) -> Vec<ReportKey> {
        self.downloaded.lock().clone()
    }
}

#[async_trait]
impl ReportDownloader for StubDownloader {
    async fn download(&self, key: &ReportKey, dir: &Path) -> finrag::Result<PathBuf> {
        self.downloaded.lock().push(key.clone());
        self.retriever.insert(tesla_risks());
        Ok(dir.join(format!("{}.txt", key.file_stem())))
    }
}

/// Web search returning fixed results and counting calls
pub struct StubWebSearch {
    results: Vec<Document>,
    calls: AtomicUsize,
}

impl StubWebSearch {
    pub fn new(results: Vec<Document>) -> Self {
        Self {
            results,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for StubWebSearch {
    async fn search(&self, _query: &str, max_results: usize) -> finrag::Result<Vec<Document>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.iter().take(max_results).cloned().collect())
    }

    fn name(&self) -> &str {
        "stub"
    }
}
