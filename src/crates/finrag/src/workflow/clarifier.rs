//! Bounded clarification dialogue and query refinement.
//!
//! `clarify` appends one [`ClarifyingQuestion`] per round. Anything but a
//! `none` entry sends the run to the `await_clarification` interrupt, whose
//! node stores the user's answer and loops back. The list never grows past
//! `max_clarifying_questions`, the terminating `none` included.

use finrag_graph::NodeContext;
use llm::StructuredLlmExt;
use tracing::{debug, info};

use super::prompts::{self, tasks};
use super::schemas::{ClarifierVerdict, RefinedQuery};
use super::state::{ClarifyingQuestion, QuestionType, SharedState, StatePatch};
use crate::error::Result;
use crate::services::Services;

/// Answer that ends the dialogue
pub const IGNORE: &str = "ignore";

fn is_ignore(question: &ClarifyingQuestion) -> bool {
    question
        .answer
        .as_deref()
        .is_some_and(|a| a.trim().eq_ignore_ascii_case(IGNORE))
}

fn render_dialogue<'a>(questions: impl Iterator<Item = &'a ClarifyingQuestion>) -> String {
    questions
        .map(|q| format!("Q: {}\nA: {}", q.text, q.answer.as_deref().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) async fn clarify(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    let mut questions = state.clarifying_questions.clone();
    let cap = svc.limits.max_clarifying_questions.max(1);

    let next = if questions.iter().any(is_ignore) || questions.len() + 1 >= cap {
        debug!(asked = questions.len(), "clarification closed without asking");
        ClarifyingQuestion::none()
    } else {
        let mut prompt = format!("Query: {}", state.working_query());
        if !questions.is_empty() {
            prompt.push_str(&format!("\n\nAlready asked:\n{}", render_dialogue(questions.iter())));
        }
        let verdict: ClarifierVerdict = svc
            .llm
            .structured(tasks::CLARIFY, prompts::CLARIFY, &prompt)
            .await?;
        if verdict.question_type == QuestionType::None || verdict.question.trim().is_empty() {
            ClarifyingQuestion::none()
        } else {
            ClarifyingQuestion {
                question_type: verdict.question_type,
                text: verdict.question.trim().to_string(),
                options: verdict.options,
                answer: None,
            }
        }
    };
    if !next.is_none() {
        info!(question = %next.text, "asking for clarification");
    }
    questions.push(next);

    Ok(StatePatch {
        clarifying_questions: Some(questions),
        ..Default::default()
    })
}

/// Runs on resume: record the user's answer to the open question
pub(crate) async fn await_clarification(
    _svc: Services,
    state: SharedState,
    _ctx: NodeContext,
) -> Result<StatePatch> {
    let mut questions = state.clarifying_questions.clone();
    let response = state.user_response.trim();
    if let Some(open) = questions.iter_mut().rev().find(|q| !q.is_none() && q.answer.is_none()) {
        open.answer = Some(if response.is_empty() { IGNORE.to_string() } else { response.to_string() });
    }
    Ok(StatePatch {
        clarifying_questions: Some(questions),
        user_response: Some(String::new()),
        ..Default::default()
    })
}

/// Fold the answered questions into the query; no call when none were answered
pub(crate) async fn refine(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    let base = if state.standalone_query.is_empty() {
        state.original_query.clone()
    } else {
        state.standalone_query.clone()
    };
    let answered: Vec<&ClarifyingQuestion> = state.answered_questions().filter(|q| !is_ignore(q)).collect();
    if answered.is_empty() {
        return Ok(StatePatch {
            refined_query: Some(base),
            ..Default::default()
        });
    }

    let prompt = format!(
        "Original query: {base}\n\nClarifications:\n{}",
        render_dialogue(answered.into_iter())
    );
    let refined: RefinedQuery = svc
        .llm
        .structured(tasks::REFINE_QUERY, prompts::REFINE_QUERY, &prompt)
        .await?;
    let query = if refined.query.trim().is_empty() {
        base
    } else {
        refined.query.trim().to_string()
    };
    info!(query = %query, "query refined");
    Ok(StatePatch {
        refined_query: Some(query),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answered(text: &str, answer: &str) -> ClarifyingQuestion {
        ClarifyingQuestion {
            question_type: QuestionType::DirectAnswer,
            text: text.to_string(),
            options: vec![],
            answer: Some(answer.to_string()),
        }
    }

    #[test]
    fn test_ignore_sentinel_is_case_insensitive() {
        assert!(is_ignore(&answered("Which year?", " IGNORE ")));
        assert!(!is_ignore(&answered("Which year?", "2022")));
    }

    #[test]
    fn test_dialogue_rendering() {
        let questions = [answered("Which year?", "2022"), answered("Which filing?", "10-K")];
        assert_eq!(
            render_dialogue(questions.iter()),
            "Q: Which year?\nA: 2022\nQ: Which filing?\nA: 10-K"
        );
    }
}
