//! Per-question retrieval-augmented generation.
//!
//! ```text
//!  [expand_question] ─▶ [extract_metadata] ─▶ retrieve ◀──────────────┬──────────────┐
//!                                                │                    │              │
//!        ┌──────────────┬────────────────┬───────┴─────────┐          │              │
//!        ▼ failed       ▼ empty+filter   ▼ empty           ▼ found    │              │
//!    retrieve /     broaden_filter    rewrite_with_hyde  [grade_documents]           │
//!    search_web         │                 │                │                         │
//!                       └──▶ retrieve     └──▶ retrieve    ├─ enough ─▶ generate     │
//!                                                          ├─ retry ──▶ rewrite_with_hyde
//!                                                          └─ else ───▶ search_web ─▶ generate
//!
//!  generate ─▶ [check_hallucination] ─┬─ grounded ──────▶ [grade_answer] ─┬─ sufficient ─▶ END
//!                                     ├─ retry ─────────▶ generate        ├─ retry ──────▶ rewrite_with_hyde
//!                                     ├─ exhausted ─────▶ search_web      └─ exhausted ──▶ END
//!                                     └─ after web ─────▶ END (refusal)
//! ```
//!
//! Bracketed stages follow the workflow toggles. Every loop is bounded by a
//! counter in [`RetryCounters`]; the counters only grow.

use finrag_graph::{CompiledGraph, InterruptConfig, LogTree, NodeContext, StateGraph, END};
use futures::stream::{self, StreamExt};
use llm::StructuredLlmExt;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use super::prompts::{self, tasks, REFUSAL};
use super::schemas::{AnswerGrade, DocumentGrade, ExpandedQuestion, Generation, HallucinationGrade, HypotheticalDocument};
use super::state::RetryCounters;
use super::{add_step, branches, node_retry_policy};
use crate::document::{render_context, Document};
use crate::error::{FinragError, Result};
use crate::retrieval::{convert_metadata_to_jmespath, ExtractedMetadata, MetadataFilter};
use crate::services::Services;

pub const EXPAND_QUESTION: &str = "expand_question";
pub const EXTRACT_METADATA: &str = "extract_metadata";
pub const RETRIEVE: &str = "retrieve";
pub const BROADEN_FILTER: &str = "broaden_filter";
pub const REWRITE_WITH_HYDE: &str = "rewrite_with_hyde";
pub const GRADE_DOCUMENTS: &str = "grade_documents";
pub const SEARCH_WEB: &str = "search_web";
pub const GENERATE: &str = "generate";
pub const CHECK_HALLUCINATION: &str = "check_hallucination";
pub const GRADE_ANSWER: &str = "grade_answer";

static CITATION_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\[\]\n]+)\]").unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStatus {
    #[default]
    Pending,
    Found,
    Empty,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagState {
    pub question: String,
    /// Text sent to the retriever; the question when empty
    pub search_query: String,
    /// Filter expression, empty for none
    pub metadata_filter: String,
    pub documents: Vec<Document>,
    pub retrieval_status: RetrievalStatus,
    /// Why graded-out documents were rejected
    pub grading_notes: Vec<String>,
    pub web_used: bool,
    pub answer: String,
    pub citations: Vec<String>,
    pub hallucinated: bool,
    pub answer_sufficient: Option<bool>,
    pub answer_feedback: String,
    pub refused: bool,
    pub counters: RetryCounters,
}

#[derive(Debug, Default, Serialize)]
struct RagPatch {
    search_query: Option<String>,
    metadata_filter: Option<String>,
    documents: Option<Vec<Document>>,
    retrieval_status: Option<RetrievalStatus>,
    grading_notes: Option<Vec<String>>,
    web_used: Option<bool>,
    answer: Option<String>,
    citations: Option<Vec<String>>,
    hallucinated: Option<bool>,
    answer_sufficient: Option<bool>,
    answer_feedback: Option<String>,
    refused: Option<bool>,
    counters: Option<RetryCounters>,
}

impl RagPatch {
    fn refusal() -> Self {
        Self {
            answer: Some(REFUSAL.to_string()),
            citations: Some(Vec::new()),
            refused: Some(true),
            ..Default::default()
        }
    }
}

/// Result of one RAG run
#[derive(Debug, Clone, PartialEq)]
pub struct RagOutcome {
    pub question: String,
    pub answer: String,
    pub citations: Vec<String>,
    /// Documents the answer was generated from
    pub documents: Vec<Document>,
    pub counters: RetryCounters,
    pub web_used: bool,
    /// The run ended with the fixed refusal
    pub refused: bool,
}

impl From<RagState> for RagOutcome {
    fn from(state: RagState) -> Self {
        Self {
            question: state.question,
            answer: state.answer,
            citations: state.citations,
            documents: state.documents,
            counters: state.counters,
            web_used: state.web_used,
            refused: state.refused,
        }
    }
}

fn parse_filter(expression: &str) -> Option<MetadataFilter> {
    if expression.trim().is_empty() {
        return None;
    }
    match MetadataFilter::parse(expression) {
        Ok(filter) => Some(filter),
        Err(err) => {
            warn!(filter = expression, error = %err, "ignoring unparsable metadata filter");
            None
        }
    }
}

async fn expand_question(svc: Services, state: RagState, _ctx: NodeContext) -> Result<RagPatch> {
    let expanded: ExpandedQuestion = svc
        .llm
        .structured(tasks::EXPAND_QUESTION, prompts::EXPAND_QUESTION, &state.question)
        .await?;
    debug!(question = %state.question, expanded = %expanded.question, "question expanded");
    Ok(RagPatch {
        search_query: Some(expanded.question),
        ..Default::default()
    })
}

async fn extract_metadata(svc: Services, state: RagState, _ctx: NodeContext) -> Result<RagPatch> {
    let extracted: ExtractedMetadata = svc
        .llm
        .structured(tasks::EXTRACT_METADATA, prompts::EXTRACT_METADATA, &state.question)
        .await?;
    let filter = convert_metadata_to_jmespath(&extracted).unwrap_or_default();
    info!(filter = %filter, "metadata filter");
    Ok(RagPatch {
        metadata_filter: Some(filter),
        ..Default::default()
    })
}

async fn retrieve(svc: Services, state: RagState, _ctx: NodeContext) -> Result<RagPatch> {
    let query = if state.search_query.trim().is_empty() {
        &state.question
    } else {
        &state.search_query
    };
    let filter = parse_filter(&state.metadata_filter);

    let call = svc.retriever.query(query, svc.top_k, filter.as_ref());
    let result = match tokio::time::timeout(svc.retriever_timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(FinragError::RetrieverTimeout(svc.retriever_timeout.as_secs())),
    };

    match result {
        Ok(documents) => {
            let status = if documents.is_empty() {
                RetrievalStatus::Empty
            } else {
                RetrievalStatus::Found
            };
            debug!(results = documents.len(), filter = %state.metadata_filter, "retrieved");
            Ok(RagPatch {
                documents: Some(documents),
                retrieval_status: Some(status),
                ..Default::default()
            })
        }
        Err(err) => {
            let mut counters = state.counters;
            counters.retriever_retries += 1;
            warn!(
                error = %err,
                retries = counters.retriever_retries,
                timeout = err.is_timeout(),
                "retrieval failed"
            );
            Ok(RagPatch {
                documents: Some(Vec::new()),
                retrieval_status: Some(RetrievalStatus::Failed),
                counters: Some(counters),
                ..Default::default()
            })
        }
    }
}

async fn broaden_filter(_svc: Services, state: RagState, _ctx: NodeContext) -> Result<RagPatch> {
    let broadened = parse_filter(&state.metadata_filter)
        .and_then(|filter| filter.broaden())
        .map(|filter| filter.to_string())
        .unwrap_or_default();
    let mut counters = state.counters;
    counters.metadata_filtering_retries += 1;
    info!(from = %state.metadata_filter, to = %broadened, retries = counters.metadata_filtering_retries, "broadening metadata filter");
    Ok(RagPatch {
        metadata_filter: Some(broadened),
        counters: Some(counters),
        ..Default::default()
    })
}

async fn rewrite_with_hyde(svc: Services, state: RagState, _ctx: NodeContext) -> Result<RagPatch> {
    let mut counters = state.counters;
    counters.doc_grading_retries += 1;

    let search_query = if svc.settings.hyde {
        let mut prompt = state.question.clone();
        if !state.answer_feedback.is_empty() {
            prompt.push_str(&format!("\n\nAn earlier answer fell short: {}", state.answer_feedback));
        }
        let passage: HypotheticalDocument = svc.llm.structured(tasks::HYDE, prompts::HYDE, &prompt).await?;
        passage.passage
    } else {
        state.question.clone()
    };
    info!(retries = counters.doc_grading_retries, hyde = svc.settings.hyde, "rewriting retrieval query");
    Ok(RagPatch {
        search_query: Some(search_query),
        counters: Some(counters),
        ..Default::default()
    })
}

async fn grade_documents(svc: Services, state: RagState, _ctx: NodeContext) -> Result<RagPatch> {
    let width = svc.limits.grading_concurrency.max(1);
    let documents = state.documents.clone();
    let mut grades: Vec<(usize, llm::Result<DocumentGrade>)> = stream::iter(documents.into_iter().enumerate())
        .map(|(index, document)| {
            let llm = svc.llm.clone();
            let prompt = format!("Question: {}\n\nDocument:\n{}", state.question, document.as_context());
            async move {
                let grade = llm
                    .structured::<DocumentGrade>(tasks::GRADE_DOCUMENT, prompts::GRADE_DOCUMENT, &prompt)
                    .await;
                (index, grade)
            }
        })
        .buffer_unordered(width)
        .collect()
        .await;
    grades.sort_by_key(|(index, _)| *index);

    let mut relevant: Vec<(Document, f32)> = Vec::new();
    let mut notes = state.grading_notes.clone();
    for (index, grade) in grades {
        let grade = grade?;
        let document = &state.documents[index];
        if grade.relevant {
            relevant.push((document.clone(), grade.relevance_score));
        } else {
            notes.push(format!("{}: {}", document.id, grade.reason));
        }
    }
    if svc.settings.reranking {
        relevant.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    }
    info!(graded = state.documents.len(), relevant = relevant.len(), "documents graded");

    Ok(RagPatch {
        documents: Some(relevant.into_iter().map(|(document, _)| document).collect()),
        grading_notes: Some(notes),
        ..Default::default()
    })
}

async fn search_web(svc: Services, state: RagState, _ctx: NodeContext) -> Result<RagPatch> {
    let mut documents = state.documents.clone();
    if svc.settings.web_fallback {
        match svc.web.search(&state.question, svc.limits.max_web_search_results).await {
            Ok(found) => {
                info!(results = found.len(), "web fallback");
                for document in found {
                    if !documents.iter().any(|d| d.id == document.id) {
                        documents.push(document);
                    }
                }
            }
            Err(err) => warn!(error = %err, "web fallback failed"),
        }
    } else {
        debug!("web fallback disabled");
    }
    Ok(RagPatch {
        documents: Some(documents),
        web_used: Some(true),
        ..Default::default()
    })
}

/// Keep only citations of known documents and strip inline markers of
/// unknown ones. Falls back to the best-ranked document.
pub(crate) fn ground_citations(generation: Generation, documents: &[Document]) -> (String, Vec<String>) {
    let known: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();
    let mut citations: Vec<String> = Vec::new();
    let mut invented: HashSet<String> = HashSet::new();

    for citation in &generation.citations {
        let citation = citation.trim().trim_start_matches('[').trim_end_matches(']');
        if known.contains(citation) {
            if !citations.iter().any(|c| c == citation) {
                citations.push(citation.to_string());
            }
        } else {
            invented.insert(citation.to_string());
        }
    }
    for caps in CITATION_MARKER.captures_iter(&generation.answer) {
        let marker = caps[1].trim();
        if known.contains(marker) && !citations.iter().any(|c| c == marker) {
            citations.push(marker.to_string());
        }
    }

    let answer = if invented.is_empty() {
        generation.answer
    } else {
        warn!(invented = ?invented, "dropping citations of unknown documents");
        CITATION_MARKER
            .replace_all(&generation.answer, |caps: &Captures| {
                if invented.contains(caps[1].trim()) {
                    String::new()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    };

    if citations.is_empty() {
        if let Some(best) = documents.first() {
            citations.push(best.id.clone());
        }
    }
    (answer, citations)
}

async fn generate(svc: Services, state: RagState, _ctx: NodeContext) -> Result<RagPatch> {
    if state.documents.is_empty() {
        info!(question = %state.question, "no supporting documents");
        return Ok(RagPatch::refusal());
    }

    let mut prompt = format!(
        "Question: {}\n\nDocuments:\n{}",
        state.question,
        render_context(&state.documents)
    );
    if state.hallucinated {
        prompt.push_str("\n\nThe previous answer was not supported by the documents.");
    }
    if !state.answer_feedback.is_empty() {
        prompt.push_str(&format!("\n\nThe previous answer was insufficient: {}", state.answer_feedback));
    }

    let generation: Generation = svc
        .llm
        .structured(tasks::GENERATE_ANSWER, prompts::GENERATE_ANSWER, &prompt)
        .await?;
    let (answer, citations) = ground_citations(generation, &state.documents);
    debug!(citations = ?citations, "answer generated");
    Ok(RagPatch {
        answer: Some(answer),
        citations: Some(citations),
        hallucinated: Some(false),
        refused: Some(false),
        ..Default::default()
    })
}

async fn check_hallucination(svc: Services, state: RagState, _ctx: NodeContext) -> Result<RagPatch> {
    let prompt = format!(
        "Documents:\n{}\n\nAnswer:\n{}",
        render_context(&state.documents),
        state.answer
    );
    let grade: HallucinationGrade = svc
        .llm
        .structured(tasks::CHECK_HALLUCINATION, prompts::CHECK_HALLUCINATION, &prompt)
        .await?;

    if !grade.hallucinated {
        return Ok(RagPatch {
            hallucinated: Some(false),
            ..Default::default()
        });
    }

    let mut counters = state.counters;
    counters.hallucination_retries += 1;
    warn!(retries = counters.hallucination_retries, reason = %grade.reason, "answer not grounded");

    let exhausted = counters.hallucination_retries > svc.limits.max_hallucination_retries;
    let mut patch = if exhausted && state.web_used {
        RagPatch::refusal()
    } else {
        RagPatch::default()
    };
    patch.hallucinated = Some(true);
    patch.counters = Some(counters);
    Ok(patch)
}

async fn grade_answer(svc: Services, state: RagState, _ctx: NodeContext) -> Result<RagPatch> {
    let prompt = format!("Question: {}\n\nAnswer:\n{}", state.question, state.answer);
    let grade: AnswerGrade = svc
        .llm
        .structured(tasks::GRADE_ANSWER, prompts::GRADE_ANSWER, &prompt)
        .await?;

    let mut patch = RagPatch {
        answer_sufficient: Some(grade.sufficient),
        ..Default::default()
    };
    if !grade.sufficient {
        let mut counters = state.counters;
        counters.answer_generation_retries += 1;
        info!(retries = counters.answer_generation_retries, reason = %grade.reason, "answer insufficient");
        patch.answer_feedback = Some(grade.reason);
        patch.counters = Some(counters);
    }
    Ok(patch)
}

/// Build and compile the RAG graph with the toggles of `svc`
pub fn build_rag_graph(svc: &Services) -> Result<CompiledGraph> {
    let settings = svc.settings.clone();
    let limits = svc.limits.clone();
    let mut graph = StateGraph::new();

    add_step(&mut graph, EXPAND_QUESTION, svc, expand_question);
    add_step(&mut graph, EXTRACT_METADATA, svc, extract_metadata);
    add_step(&mut graph, RETRIEVE, svc, retrieve);
    add_step(&mut graph, BROADEN_FILTER, svc, broaden_filter);
    add_step(&mut graph, REWRITE_WITH_HYDE, svc, rewrite_with_hyde);
    add_step(&mut graph, GRADE_DOCUMENTS, svc, grade_documents);
    add_step(&mut graph, SEARCH_WEB, svc, search_web);
    add_step(&mut graph, GENERATE, svc, generate);
    add_step(&mut graph, CHECK_HALLUCINATION, svc, check_hallucination);
    add_step(&mut graph, GRADE_ANSWER, svc, grade_answer);

    let mut front: Vec<&str> = Vec::new();
    if settings.question_expansion {
        front.push(EXPAND_QUESTION);
    }
    if settings.metadata_filtering {
        front.push(EXTRACT_METADATA);
    }
    front.push(RETRIEVE);
    graph.set_entry(front[0]);
    for pair in front.windows(2) {
        graph.add_edge(pair[0], pair[1]);
    }

    let (s, l) = (settings.clone(), limits.clone());
    graph.add_typed_conditional_edges(
        RETRIEVE,
        move |state: &RagState| {
            let counters = &state.counters;
            let next = match state.retrieval_status {
                RetrievalStatus::Failed if counters.retriever_retries <= l.max_retriever_retries => RETRIEVE,
                RetrievalStatus::Failed => SEARCH_WEB,
                RetrievalStatus::Empty if !state.metadata_filter.is_empty() => {
                    if counters.metadata_filtering_retries < l.max_metadata_filtering_retries {
                        BROADEN_FILTER
                    } else {
                        SEARCH_WEB
                    }
                }
                RetrievalStatus::Empty | RetrievalStatus::Pending => {
                    if counters.doc_grading_retries < l.max_doc_grading_retries {
                        REWRITE_WITH_HYDE
                    } else {
                        SEARCH_WEB
                    }
                }
                RetrievalStatus::Found if s.document_grading => GRADE_DOCUMENTS,
                RetrievalStatus::Found => GENERATE,
            };
            next.into()
        },
        branches([RETRIEVE, SEARCH_WEB, BROADEN_FILTER, REWRITE_WITH_HYDE, GRADE_DOCUMENTS, GENERATE]),
    );
    graph.add_edge(BROADEN_FILTER, RETRIEVE);
    graph.add_edge(REWRITE_WITH_HYDE, RETRIEVE);

    let l = limits.clone();
    graph.add_typed_conditional_edges(
        GRADE_DOCUMENTS,
        move |state: &RagState| {
            let next = if state.documents.len() >= l.docs_relevance_threshold.max(1) {
                GENERATE
            } else if state.counters.doc_grading_retries < l.max_doc_grading_retries {
                REWRITE_WITH_HYDE
            } else {
                SEARCH_WEB
            };
            next.into()
        },
        branches([GENERATE, REWRITE_WITH_HYDE, SEARCH_WEB]),
    );
    graph.add_edge(SEARCH_WEB, GENERATE);

    let s = settings.clone();
    graph.add_typed_conditional_edges(
        GENERATE,
        move |state: &RagState| {
            let next = if state.refused {
                END
            } else if s.hallucination_check {
                CHECK_HALLUCINATION
            } else if s.answer_grading {
                GRADE_ANSWER
            } else {
                END
            };
            next.into()
        },
        branches([END, CHECK_HALLUCINATION, GRADE_ANSWER]),
    );

    let (s, l) = (settings.clone(), limits.clone());
    graph.add_typed_conditional_edges(
        CHECK_HALLUCINATION,
        move |state: &RagState| {
            let next = if state.refused {
                END
            } else if !state.hallucinated {
                if s.answer_grading {
                    GRADE_ANSWER
                } else {
                    END
                }
            } else if state.counters.hallucination_retries <= l.max_hallucination_retries {
                GENERATE
            } else {
                SEARCH_WEB
            };
            next.into()
        },
        branches([END, GRADE_ANSWER, GENERATE, SEARCH_WEB]),
    );

    let l = limits.clone();
    graph.add_typed_conditional_edges(
        GRADE_ANSWER,
        move |state: &RagState| {
            let next = match state.answer_sufficient {
                Some(false) if state.counters.answer_generation_retries <= l.max_answer_generation_retries => {
                    REWRITE_WITH_HYDE
                }
                _ => END,
            };
            next.into()
        },
        branches([REWRITE_WITH_HYDE, END]),
    );

    Ok(graph
        .compile(None, InterruptConfig::new())?
        .with_default_retry(node_retry_policy(&limits)))
}

/// Compiled RAG graph, run once per question
#[derive(Clone, Debug)]
pub struct RagRunner {
    graph: CompiledGraph,
}

impl RagRunner {
    pub fn new(svc: &Services) -> Result<Self> {
        Ok(Self {
            graph: build_rag_graph(svc)?,
        })
    }

    /// Answer `question`, tracing the run under the calling task
    pub async fn run(&self, question: &str, ctx: &NodeContext) -> Result<RagOutcome> {
        let root = ctx.open_child("rag", question);
        self.run_traced(question, ctx.log_tree().clone(), root).await
    }

    /// Answer `question` with `root` as the trace parent of its nodes
    pub async fn run_traced(&self, question: &str, log_tree: LogTree, root: String) -> Result<RagOutcome> {
        let values = self
            .graph
            .clone()
            .with_log_tree(log_tree)
            .invoke_with_parent(Some(json!({ "question": question })), &root, Some(root.clone()))
            .await?;
        let state: RagState = serde_json::from_value(values)?;
        let outcome = RagOutcome::from(state);
        info!(
            question,
            citations = outcome.citations.len(),
            web = outcome.web_used,
            refused = outcome.refused,
            "rag run finished"
        );
        Ok(outcome)
    }
}
