//! Session state of the main graph and the merge rule of every field.
//!
//! | field | merge |
//! |---|---|
//! | `session_id`, `original_query`, `image_description` | keep-first-non-empty |
//! | `citations` | union-set |
//! | `documents`, `kpi_results` | append-list |
//! | everything else | overwrite |
//!
//! Overwrite fields are written by one node per superstep. The only fan-out
//! of the main graph runs a path node next to `kpi_analysis`, and the KPI
//! node writes mergeable fields only.

use finrag_graph::{AppendListReducer, KeepFirstNonEmptyReducer, StateGraph, UnionSetReducer};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::document::Document;
use crate::kpi::KpiResult;
use crate::reports::ReportKey;

/// Route chosen by the path decider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Path {
    General,
    Web,
    /// Stage-one verdict, refined by stage two
    Financial,
    /// Stage-one verdict, never answered by simple RAG
    Reason,
    SimpleFinancial,
    ComplexFinancial,
    Analysis,
    Persona,
}

impl Path {
    pub fn as_str(&self) -> &'static str {
        match self {
            Path::General => "general",
            Path::Web => "web",
            Path::Financial => "financial",
            Path::Reason => "reason",
            Path::SimpleFinancial => "simple_financial",
            Path::ComplexFinancial => "complex_financial",
            Path::Analysis => "analysis",
            Path::Persona => "persona",
        }
    }

    /// Goes through clarification and the stage-two decider
    pub fn is_financial_track(&self) -> bool {
        !matches!(self, Path::General | Path::Web)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    DirectAnswer,
    SingleChoice,
    MultipleChoice,
    /// Ends the clarification loop
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarifyingQuestion {
    pub question_type: QuestionType,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl ClarifyingQuestion {
    pub fn none() -> Self {
        Self {
            question_type: QuestionType::None,
            text: String::new(),
            options: Vec::new(),
            answer: None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.question_type == QuestionType::None
    }

    /// Text shown to the user at the clarification interrupt
    pub fn prompt(&self) -> String {
        let mut prompt = self.text.clone();
        if !self.options.is_empty() {
            let hint = match self.question_type {
                QuestionType::MultipleChoice => "choose one or more",
                _ => "choose one",
            };
            prompt.push_str(&format!(" ({hint}: {})", self.options.join(", ")));
        }
        prompt
    }
}

/// One earlier question and answer of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub query: String,
    pub answer: String,
}

/// Retry budgets consumed so far. Counters only grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryCounters {
    pub doc_grading_retries: u32,
    pub metadata_filtering_retries: u32,
    pub hallucination_retries: u32,
    pub answer_generation_retries: u32,
    pub retriever_retries: u32,
}

impl RetryCounters {
    /// Sum of two runs' counters
    pub fn plus(&self, other: &RetryCounters) -> RetryCounters {
        RetryCounters {
            doc_grading_retries: self.doc_grading_retries + other.doc_grading_retries,
            metadata_filtering_retries: self.metadata_filtering_retries + other.metadata_filtering_retries,
            hallucination_retries: self.hallucination_retries + other.hallucination_retries,
            answer_generation_retries: self.answer_generation_retries + other.answer_generation_retries,
            retriever_retries: self.retriever_retries + other.retriever_retries,
        }
    }

    pub fn sum<'a>(counters: impl IntoIterator<Item = &'a RetryCounters>) -> RetryCounters {
        counters
            .into_iter()
            .fold(RetryCounters::default(), |acc, c| acc.plus(c))
    }

    /// Every counter is at least the one in `earlier`
    pub fn dominates(&self, earlier: &RetryCounters) -> bool {
        self.doc_grading_retries >= earlier.doc_grading_retries
            && self.metadata_filtering_retries >= earlier.metadata_filtering_retries
            && self.hallucination_retries >= earlier.hallucination_retries
            && self.answer_generation_retries >= earlier.answer_generation_retries
            && self.retriever_retries >= earlier.retriever_retries
    }
}

/// State of the main graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedState {
    pub session_id: String,
    pub original_query: String,
    pub image_description: String,
    /// Earlier turns of the session, oldest first
    pub conversation: Vec<ChatTurn>,
    /// Query made self-contained against the conversation
    pub standalone_query: String,
    pub query_safe: Option<bool>,
    pub path_decided: Option<Path>,
    pub clarifying_questions: Vec<ClarifyingQuestion>,
    /// Answer to the pending interrupt, empty once consumed
    pub user_response: String,
    pub refined_query: String,
    /// Filing the question is about, when one was named
    pub report: Option<ReportKey>,
    /// Filing that was not available locally
    pub missing_report: Option<ReportKey>,
    pub download_confirmed: Option<bool>,
    /// KPI topic picked at the analysis interrupt, empty when skipped
    pub analysis_topic: String,
    pub documents: Vec<Document>,
    pub citations: Vec<String>,
    pub kpi_results: Vec<KpiResult>,
    pub final_answer: String,
    /// Which path produced the answer: a path name, `cache`, `context` or `refusal`
    pub answer_type: String,
    pub follow_ups: Vec<String>,
    pub retry_counters: RetryCounters,
}

impl SharedState {
    /// The question the answer paths work on
    pub fn working_query(&self) -> &str {
        [&self.refined_query, &self.standalone_query, &self.original_query]
            .into_iter()
            .find(|q| !q.trim().is_empty())
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Clarifying questions the user answered
    pub fn answered_questions(&self) -> impl Iterator<Item = &ClarifyingQuestion> {
        self.clarifying_questions
            .iter()
            .filter(|q| !q.is_none() && q.answer.is_some())
    }
}

/// Partial update of [`SharedState`]; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatePatch {
    pub standalone_query: Option<String>,
    pub query_safe: Option<bool>,
    pub path_decided: Option<Path>,
    pub clarifying_questions: Option<Vec<ClarifyingQuestion>>,
    pub user_response: Option<String>,
    pub refined_query: Option<String>,
    pub report: Option<ReportKey>,
    pub missing_report: Option<ReportKey>,
    pub download_confirmed: Option<bool>,
    pub analysis_topic: Option<String>,
    pub documents: Option<Vec<Document>>,
    pub citations: Option<Vec<String>>,
    pub kpi_results: Option<Vec<KpiResult>>,
    pub final_answer: Option<String>,
    pub answer_type: Option<String>,
    pub follow_ups: Option<Vec<String>>,
    pub retry_counters: Option<RetryCounters>,
}

impl StatePatch {
    /// A finished answer with its sources
    pub fn answer(answer_type: &str, answer: String, citations: Vec<String>, documents: Vec<Document>) -> Self {
        Self {
            final_answer: Some(answer),
            answer_type: Some(answer_type.to_string()),
            citations: Some(citations),
            documents: Some(documents),
            ..Default::default()
        }
    }
}

/// Declare the merge rules of [`SharedState`]
pub fn register_reducers(graph: &mut StateGraph) {
    graph
        .add_reducer("session_id", KeepFirstNonEmptyReducer)
        .add_reducer("original_query", KeepFirstNonEmptyReducer)
        .add_reducer("image_description", KeepFirstNonEmptyReducer)
        .add_reducer("citations", UnionSetReducer)
        .add_reducer("documents", AppendListReducer)
        .add_reducer("kpi_results", AppendListReducer);
}
