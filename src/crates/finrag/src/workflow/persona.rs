//! Persona research: several analyst viewpoints on one question.
//!
//! ```text
//!  generate_personas ─▶ persona_questions × P ─▶ supervise ─▶ answer_question × Q ─▶ combine_personas ─▶ END
//! ```
//!
//! Each persona proposes questions, a supervisor adds what they missed, and
//! every question is answered through the RAG graph in parallel. The summary
//! lists findings per persona, in persona order with the supervisor last.

use finrag_graph::{
    AppendListReducer, CompiledGraph, ConditionalEdgeResult, InterruptConfig, LogTree, NodeContext, Send,
    StateGraph, END,
};
use llm::StructuredLlmExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::prompts::{self, tasks, REFUSAL};
use super::rag::RagRunner;
use super::schemas::{PersonaSpec, PersonaSummary, Personas, QuestionList};
use super::state::RetryCounters;
use super::{add_step, branches, clean_list, node_retry_policy};
use crate::document::Document;
use crate::error::Result;
use crate::services::Services;

pub const GENERATE_PERSONAS: &str = "generate_personas";
pub const PERSONA_QUESTIONS: &str = "persona_questions";
pub const SUPERVISE: &str = "supervise";
pub const ANSWER_QUESTION: &str = "answer_question";
pub const COMBINE_PERSONAS: &str = "combine_personas";

/// Persona name given to the supervisor's questions
pub const SUPERVISOR: &str = "supervisor";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedQuestion {
    pub persona: String,
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaAnswer {
    pub persona: String,
    pub question: String,
    /// Position of the question in the supervised list
    pub index: usize,
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub counters: RetryCounters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaState {
    pub question: String,
    pub personas: Vec<PersonaSpec>,
    /// Append
    pub questions: Vec<AttributedQuestion>,
    /// Append
    pub answers: Vec<PersonaAnswer>,
    /// Append
    pub documents: Vec<Document>,
    pub answer: String,
    pub citations: Vec<String>,
    pub counters: RetryCounters,
    /// Branch input of `persona_questions`
    pub persona: Option<PersonaSpec>,
    /// Branch input of `answer_question`
    pub attributed: Option<AttributedQuestion>,
    pub question_index: usize,
}

#[derive(Debug, Default, Serialize)]
struct PersonaPatch {
    personas: Option<Vec<PersonaSpec>>,
    questions: Option<Vec<AttributedQuestion>>,
    answers: Option<Vec<PersonaAnswer>>,
    documents: Option<Vec<Document>>,
    answer: Option<String>,
    citations: Option<Vec<String>>,
    counters: Option<RetryCounters>,
}

fn default_persona() -> PersonaSpec {
    PersonaSpec {
        name: "Financial analyst".to_string(),
        description: "Reads the filings for performance, risk and outlook".to_string(),
    }
}

async fn generate_personas(svc: Services, state: PersonaState, _ctx: NodeContext) -> Result<PersonaPatch> {
    let proposed: Personas = svc
        .llm
        .structured(tasks::GENERATE_PERSONAS, prompts::GENERATE_PERSONAS, &state.question)
        .await?;

    let mut personas: Vec<PersonaSpec> = Vec::new();
    for mut persona in proposed.personas {
        persona.name = persona.name.trim().to_string();
        if !persona.name.is_empty()
            && persona.name != SUPERVISOR
            && !personas.iter().any(|p| p.name == persona.name)
        {
            personas.push(persona);
        }
    }
    personas.truncate(svc.limits.max_personas.max(1));
    if personas.is_empty() {
        personas.push(default_persona());
    }
    info!(personas = ?personas.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), "personas chosen");

    Ok(PersonaPatch {
        personas: Some(personas),
        ..Default::default()
    })
}

async fn persona_questions(svc: Services, state: PersonaState, _ctx: NodeContext) -> Result<PersonaPatch> {
    let persona = state.persona.unwrap_or_else(default_persona);
    let prompt = format!(
        "Persona: {} - {}\n\nMain question: {}",
        persona.name, persona.description, state.question
    );
    let list: QuestionList = svc
        .llm
        .structured(tasks::PERSONA_QUESTIONS, prompts::PERSONA_QUESTIONS, &prompt)
        .await?;
    let questions = clean_list(list.questions, svc.limits.max_questions_per_persona);
    debug!(persona = %persona.name, questions = questions.len(), "persona questions");

    Ok(PersonaPatch {
        questions: Some(
            questions
                .into_iter()
                .map(|question| AttributedQuestion {
                    persona: persona.name.clone(),
                    question,
                })
                .collect(),
        ),
        ..Default::default()
    })
}

async fn supervise(svc: Services, state: PersonaState, _ctx: NodeContext) -> Result<PersonaPatch> {
    let max = svc.limits.max_supervisor_questions;
    if max == 0 {
        return Ok(PersonaPatch::default());
    }
    let asked: Vec<String> = state
        .questions
        .iter()
        .map(|q| format!("- ({}) {}", q.persona, q.question))
        .collect();
    let prompt = format!(
        "Main question: {}\n\nQuestions so far:\n{}",
        state.question,
        asked.join("\n")
    );
    let list: QuestionList = svc
        .llm
        .structured(tasks::SUPERVISE_QUESTIONS, prompts::SUPERVISE_QUESTIONS, &prompt)
        .await?;

    let added: Vec<AttributedQuestion> = clean_list(list.questions, usize::MAX)
        .into_iter()
        .filter(|q| !state.questions.iter().any(|existing| &existing.question == q))
        .take(max)
        .map(|question| AttributedQuestion {
            persona: SUPERVISOR.to_string(),
            question,
        })
        .collect();
    debug!(added = added.len(), "supervisor questions");
    Ok(PersonaPatch {
        questions: Some(added),
        ..Default::default()
    })
}

async fn answer_question(
    deps: (Services, RagRunner),
    state: PersonaState,
    ctx: NodeContext,
) -> Result<PersonaPatch> {
    let (_, rag) = deps;
    let Some(attributed) = state.attributed else {
        return Ok(PersonaPatch::default());
    };
    let outcome = rag.run(&attributed.question, &ctx).await?;
    Ok(PersonaPatch {
        answers: Some(vec![PersonaAnswer {
            persona: attributed.persona,
            question: attributed.question,
            index: state.question_index,
            answer: outcome.answer,
            citations: outcome.citations,
            counters: outcome.counters,
        }]),
        documents: Some(outcome.documents),
        ..Default::default()
    })
}

/// Persona order, then the supervisor, then question order
fn ordered_answers<'a>(personas: &[PersonaSpec], answers: &'a [PersonaAnswer]) -> Vec<&'a PersonaAnswer> {
    let rank = |name: &str| {
        personas
            .iter()
            .position(|p| p.name == name)
            .unwrap_or(if name == SUPERVISOR { personas.len() } else { personas.len() + 1 })
    };
    let mut ordered: Vec<&PersonaAnswer> = answers.iter().collect();
    ordered.sort_by_key(|a| (rank(&a.persona), a.index));
    ordered
}

fn render_sections(ordered: &[&PersonaAnswer]) -> String {
    let mut sections: Vec<String> = Vec::new();
    let mut current: Option<&str> = None;
    for answer in ordered {
        if current != Some(answer.persona.as_str()) {
            sections.push(format!("### {}", answer.persona));
            current = Some(answer.persona.as_str());
        }
        sections.push(format!("- {}\n  {}", answer.question, answer.answer));
    }
    sections.join("\n")
}

async fn combine_personas(svc: Services, state: PersonaState, _ctx: NodeContext) -> Result<PersonaPatch> {
    let ordered = ordered_answers(&state.personas, &state.answers);
    let counters = RetryCounters::sum(ordered.iter().map(|a| &a.counters));
    if ordered.is_empty() {
        info!("no persona question was answered");
        return Ok(PersonaPatch {
            answer: Some(REFUSAL.to_string()),
            citations: Some(Vec::new()),
            counters: Some(counters),
            ..Default::default()
        });
    }

    let sections = render_sections(&ordered);
    let prompt = format!("Main question: {}\n\nFindings:\n{}", state.question, sections);
    let summary: PersonaSummary = svc
        .llm
        .structured(tasks::SUMMARIZE_PERSONAS, prompts::SUMMARIZE_PERSONAS, &prompt)
        .await?;

    let mut citations: Vec<String> = Vec::new();
    for citation in ordered.iter().flat_map(|a| &a.citations) {
        if !citations.contains(citation) {
            citations.push(citation.clone());
        }
    }
    Ok(PersonaPatch {
        answer: Some(format!("{}\n\n{}", summary.summary.trim(), sections)),
        citations: Some(citations),
        counters: Some(counters),
        ..Default::default()
    })
}

pub fn build_persona_graph(svc: &Services, rag: RagRunner) -> Result<CompiledGraph> {
    let mut graph = StateGraph::new();
    graph
        .add_reducer("questions", AppendListReducer)
        .add_reducer("answers", AppendListReducer)
        .add_reducer("documents", AppendListReducer);

    add_step(&mut graph, GENERATE_PERSONAS, svc, generate_personas);
    add_step(&mut graph, PERSONA_QUESTIONS, svc, persona_questions);
    add_step(&mut graph, SUPERVISE, svc, supervise);
    add_step(&mut graph, ANSWER_QUESTION, &(svc.clone(), rag), answer_question);
    add_step(&mut graph, COMBINE_PERSONAS, svc, combine_personas);

    graph.set_entry(GENERATE_PERSONAS);
    graph.add_typed_conditional_edges(
        GENERATE_PERSONAS,
        |state: &PersonaState| {
            let sends = state
                .personas
                .iter()
                .map(|persona| Send::new(PERSONA_QUESTIONS, json!({ "persona": persona })))
                .collect::<Vec<_>>();
            ConditionalEdgeResult::Sends(sends)
        },
        branches([PERSONA_QUESTIONS]),
    );
    graph.add_edge(PERSONA_QUESTIONS, SUPERVISE);
    graph.add_typed_conditional_edges(
        SUPERVISE,
        |state: &PersonaState| {
            if state.questions.is_empty() {
                return COMBINE_PERSONAS.into();
            }
            let sends = state
                .questions
                .iter()
                .enumerate()
                .map(|(index, q)| Send::new(ANSWER_QUESTION, json!({ "question_index": index, "attributed": q })))
                .collect::<Vec<_>>();
            ConditionalEdgeResult::Sends(sends)
        },
        branches([ANSWER_QUESTION, COMBINE_PERSONAS]),
    );
    graph.add_edge(ANSWER_QUESTION, COMBINE_PERSONAS);
    graph.add_edge(COMBINE_PERSONAS, END);

    Ok(graph
        .compile(None, InterruptConfig::new())?
        .with_default_retry(node_retry_policy(&svc.limits)))
}

/// Result of a persona run
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaOutcome {
    pub answer: String,
    pub citations: Vec<String>,
    pub documents: Vec<Document>,
    pub counters: RetryCounters,
    pub personas: Vec<String>,
    /// Answers in report order
    pub answers: Vec<PersonaAnswer>,
}

#[derive(Clone, Debug)]
pub struct PersonaRunner {
    graph: CompiledGraph,
}

impl PersonaRunner {
    pub fn new(svc: &Services) -> Result<Self> {
        let rag = RagRunner::new(svc)?;
        Ok(Self {
            graph: build_persona_graph(svc, rag)?,
        })
    }

    pub async fn run(&self, question: &str, ctx: &NodeContext) -> Result<PersonaOutcome> {
        let root = ctx.open_child("persona", question);
        self.run_traced(question, ctx.log_tree().clone(), root).await
    }

    pub async fn run_traced(&self, question: &str, log_tree: LogTree, root: String) -> Result<PersonaOutcome> {
        let values = self
            .graph
            .clone()
            .with_log_tree(log_tree)
            .invoke_with_parent(Some(json!({ "question": question })), &root, Some(root.clone()))
            .await?;
        let state: PersonaState = serde_json::from_value(values)?;
        let answers = ordered_answers(&state.personas, &state.answers)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        info!(personas = state.personas.len(), answers = answers.len(), "persona research finished");
        Ok(PersonaOutcome {
            answer: state.answer,
            citations: state.citations,
            documents: state.documents,
            counters: state.counters,
            personas: state.personas.into_iter().map(|p| p.name).collect(),
            answers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(persona: &str, index: usize) -> PersonaAnswer {
        PersonaAnswer {
            persona: persona.to_string(),
            question: format!("q{index}"),
            index,
            answer: format!("a{index}"),
            citations: vec![],
            counters: RetryCounters::default(),
        }
    }

    #[test]
    fn test_order_is_persona_then_supervisor() {
        let personas = vec![
            PersonaSpec {
                name: "Credit analyst".into(),
                description: String::new(),
            },
            PersonaSpec {
                name: "Equity analyst".into(),
                description: String::new(),
            },
        ];
        let answers = vec![
            answer(SUPERVISOR, 4),
            answer("Equity analyst", 2),
            answer("Credit analyst", 1),
            answer("Credit analyst", 0),
        ];
        let ordered: Vec<usize> = ordered_answers(&personas, &answers).iter().map(|a| a.index).collect();
        assert_eq!(ordered, vec![0, 1, 2, 4]);
    }

    #[test]
    fn test_sections_group_by_persona() {
        let answers = [answer("Credit analyst", 0), answer("Credit analyst", 1), answer(SUPERVISOR, 2)];
        let ordered: Vec<&PersonaAnswer> = answers.iter().collect();
        let rendered = render_sections(&ordered);
        assert_eq!(
            rendered,
            "### Credit analyst\n- q0\n  a0\n- q1\n  a1\n### supervisor\n- q2\n  a2"
        );
    }
}
