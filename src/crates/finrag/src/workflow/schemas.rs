//! Structured outputs requested from the LLM.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::state::{Path, QuestionType};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SafetyVerdict {
    pub safe: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ContextMerge {
    pub standalone_query: String,
    /// The conversation already answers the query
    #[serde(default)]
    pub answered_by_context: bool,
    #[serde(default)]
    pub answer: Option<String>,
}

/// Stage one of the path decider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    General,
    Web,
    Financial,
    Reason,
}

impl From<QueryKind> for Path {
    fn from(kind: QueryKind) -> Self {
        match kind {
            QueryKind::General => Path::General,
            QueryKind::Web => Path::Web,
            QueryKind::Financial => Path::Financial,
            QueryKind::Reason => Path::Reason,
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PathVerdict {
    pub path: QueryKind,
    #[serde(default)]
    pub reason: String,
}

/// Stage two of the path decider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FinancialKind {
    SimpleFinancial,
    ComplexFinancial,
    Analysis,
    Persona,
}

impl From<FinancialKind> for Path {
    fn from(kind: FinancialKind) -> Self {
        match kind {
            FinancialKind::SimpleFinancial => Path::SimpleFinancial,
            FinancialKind::ComplexFinancial => Path::ComplexFinancial,
            FinancialKind::Analysis => Path::Analysis,
            FinancialKind::Persona => Path::Persona,
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FinancialPathVerdict {
    pub path: FinancialKind,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClarifierVerdict {
    pub question_type: QuestionType,
    #[serde(default)]
    pub question: String,
    /// Choices for single- and multiple-choice questions
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RefinedQuery {
    pub query: String,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ReportRequest {
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    /// e.g. `10-K`
    #[serde(default)]
    pub doc_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GeneralAnswer {
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExpandedQuestion {
    pub question: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HypotheticalDocument {
    pub passage: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DocumentGrade {
    pub relevant: bool,
    #[serde(default)]
    pub reason: String,
    /// Used to order documents when reranking
    #[serde(default)]
    pub relevance_score: f32,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Generation {
    pub answer: String,
    /// Identifiers of the documents the answer cites
    #[serde(default)]
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct HallucinationGrade {
    pub hallucinated: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AnswerGrade {
    pub sufficient: bool,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Decomposition {
    /// Each group is a serial chain of sub-questions
    pub groups: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Critique {
    /// `No changes.` approves the decomposition
    pub feedback: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SerialRewrite {
    pub question: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CombinedAnswer {
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SufficiencyGrade {
    /// `Fully Answered`, `Partially Answered` or `Not Answered`
    pub verdict: String,
}

/// Repeater verdict vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sufficiency {
    FullyAnswered,
    PartiallyAnswered,
    NotAnswered,
}

impl FromStr for Sufficiency {
    type Err = String;

    /// Case-insensitive; `Yes` is accepted for `Fully Answered`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .trim_end_matches('.')
            .to_lowercase()
            .replace(['_', '-'], " ");
        match normalized.as_str() {
            "fully answered" | "yes" => Ok(Sufficiency::FullyAnswered),
            "partially answered" => Ok(Sufficiency::PartiallyAnswered),
            "not answered" | "no" => Ok(Sufficiency::NotAnswered),
            _ => Err(format!("unknown sufficiency verdict '{s}'")),
        }
    }
}

impl fmt::Display for Sufficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sufficiency::FullyAnswered => "Fully Answered",
            Sufficiency::PartiallyAnswered => "Partially Answered",
            Sufficiency::NotAnswered => "Not Answered",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PersonaSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Personas {
    pub personas: Vec<PersonaSpec>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QuestionList {
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PersonaSummary {
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExtractedValue {
    /// `null` when the text does not state the figure
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FollowUps {
    pub questions: Vec<String>,
}
