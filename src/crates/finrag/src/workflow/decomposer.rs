//! Question decomposition with a bounded critique loop.
//!
//! `decompose` splits the question into groups; `critique` reviews them until
//! it answers `No changes.` or the round budget is spent. The approved groups
//! fan out to `run_group`, one branch per group.

use finrag_graph::{ConditionalEdgeResult, NodeContext, Send};
use llm::StructuredLlmExt;
use serde_json::json;
use tracing::{debug, info};

use super::prompts::{self, tasks};
use super::repeater::{RepeaterPatch, RepeaterState, RUN_GROUP};
use super::schemas::{Critique, Decomposition};
use super::clean_list;
use crate::error::Result;
use crate::services::Services;

/// Numbered rendering used in prompts
pub(crate) fn render_groups(groups: &[Vec<String>]) -> String {
    groups
        .iter()
        .enumerate()
        .map(|(i, group)| {
            let items: Vec<String> = group.iter().map(|q| format!("  - {q}")).collect();
            format!("Group {}:\n{}", i + 1, items.join("\n"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trim questions and drop empty groups; the question itself when nothing is left
pub(crate) fn clean_groups(question: &str, groups: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let cleaned: Vec<Vec<String>> = groups
        .into_iter()
        .map(|group| clean_list(group, usize::MAX))
        .filter(|group| !group.is_empty())
        .collect();
    if cleaned.is_empty() {
        vec![vec![question.to_string()]]
    } else {
        cleaned
    }
}

/// `No changes.` in any case, with or without the dot
pub(crate) fn is_approval(feedback: &str) -> bool {
    feedback
        .trim()
        .trim_end_matches('.')
        .trim()
        .eq_ignore_ascii_case("no changes")
}

pub(crate) async fn decompose(svc: Services, state: RepeaterState, _ctx: NodeContext) -> Result<RepeaterPatch> {
    let mut prompt = format!("Question: {}", state.question);
    if !state.previous_answer.is_empty() {
        let verdict = state
            .verdict
            .map(|v| v.to_string())
            .unwrap_or_else(|| "Not Answered".to_string());
        prompt.push_str(&format!(
            "\n\nA previous attempt was judged {verdict}:\n{}",
            state.previous_answer
        ));
    }
    if !state.critique.is_empty() {
        prompt.push_str(&format!(
            "\n\nPrevious decomposition:\n{}\n\nReviewer feedback:\n{}",
            render_groups(&state.groups),
            state.critique
        ));
    }

    let decomposition: Decomposition = svc
        .llm
        .structured(tasks::DECOMPOSE, prompts::DECOMPOSE, &prompt)
        .await?;
    let groups = clean_groups(&state.question, decomposition.groups);
    info!(pass = state.pass, groups = groups.len(), "question decomposed");
    Ok(RepeaterPatch {
        groups: Some(groups),
        ..Default::default()
    })
}

pub(crate) async fn critique(svc: Services, state: RepeaterState, _ctx: NodeContext) -> Result<RepeaterPatch> {
    let prompt = format!(
        "Question: {}\n\nDecomposition:\n{}",
        state.question,
        render_groups(&state.groups)
    );
    let review: Critique = svc
        .llm
        .structured(tasks::CRITIQUE, prompts::CRITIQUE, &prompt)
        .await?;
    let approved = is_approval(&review.feedback);
    let rounds = state.critique_rounds + 1;
    debug!(rounds, approved, "decomposition reviewed");
    Ok(RepeaterPatch {
        critique_rounds: Some(rounds),
        critique: Some(if approved { String::new() } else { review.feedback }),
        ..Default::default()
    })
}

/// One `run_group` branch per group
pub(crate) fn dispatch_groups(state: &RepeaterState) -> ConditionalEdgeResult {
    let sends = state
        .groups
        .iter()
        .enumerate()
        .map(|(index, group)| Send::new(RUN_GROUP, json!({ "group_index": index, "group": group })))
        .collect::<Vec<_>>();
    ConditionalEdgeResult::Sends(sends)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_phrase() {
        assert!(is_approval("No changes."));
        assert!(is_approval("  no changes "));
        assert!(is_approval("NO CHANGES"));
        assert!(!is_approval("No changes needed, except merge groups 1 and 2."));
        assert!(!is_approval(""));
    }

    #[test]
    fn test_clean_groups() {
        let groups = vec![
            vec![" What was revenue? ".to_string(), String::new()],
            vec!["  ".to_string()],
            vec![],
        ];
        assert_eq!(clean_groups("q", groups), vec![vec!["What was revenue?".to_string()]]);
        assert_eq!(clean_groups("q", vec![]), vec![vec!["q".to_string()]]);
    }

    #[test]
    fn test_dispatch_sends_one_branch_per_group() {
        let state = RepeaterState {
            groups: vec![vec!["a".into()], vec!["b".into(), "c".into()]],
            ..Default::default()
        };
        let ConditionalEdgeResult::Sends(sends) = dispatch_groups(&state) else {
            panic!("expected sends");
        };
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[1].node(), RUN_GROUP);
        assert_eq!(sends[1].arg()["group_index"], 1);
        assert_eq!(sends[1].arg()["group"][1], "c");
    }
}
