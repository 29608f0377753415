//! Entry nodes: safety check and conversation merge.

use finrag_graph::NodeContext;
use llm::StructuredLlmExt;
use tracing::{info, warn};

use super::prompts::{self, tasks, REFUSAL};
use super::schemas::{ContextMerge, SafetyVerdict};
use super::state::{ChatTurn, SharedState, StatePatch};
use crate::cache::CachedAnswer;
use crate::error::Result;
use crate::services::Services;

/// `answer_type` of a refused query
pub const REFUSAL_TYPE: &str = "refusal";
/// `answer_type` of an answer served from the cache
pub const CACHE_TYPE: &str = "cache";
/// `answer_type` of an answer taken from the conversation
pub const CONTEXT_TYPE: &str = "context";

pub(crate) async fn safety_check(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    if !svc.settings.safety_check {
        return Ok(StatePatch {
            query_safe: Some(true),
            ..Default::default()
        });
    }

    let mut prompt = state.original_query.clone();
    if !state.image_description.is_empty() {
        prompt.push_str(&format!("\n\nAttached image: {}", state.image_description));
    }
    let verdict: SafetyVerdict = svc
        .llm
        .structured(tasks::SAFETY_CHECK, prompts::SAFETY_CHECK, &prompt)
        .await?;

    if verdict.safe {
        return Ok(StatePatch {
            query_safe: Some(true),
            ..Default::default()
        });
    }
    warn!(reason = %verdict.reason, "query refused");
    Ok(StatePatch {
        query_safe: Some(false),
        final_answer: Some(REFUSAL.to_string()),
        answer_type: Some(REFUSAL_TYPE.to_string()),
        ..Default::default()
    })
}

fn render_conversation(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("User: {}\nAssistant: {}", turn.query, turn.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn cached(answer_type: &str, standalone: String, hit: CachedAnswer) -> StatePatch {
    info!(answer_type, "answered without the reasoning graph");
    StatePatch {
        standalone_query: Some(standalone),
        final_answer: Some(hit.answer),
        answer_type: Some(answer_type.to_string()),
        citations: Some(hit.citations),
        ..Default::default()
    }
}

/// Make the query standalone, answering from the cache or the conversation
/// when possible
pub(crate) async fn merge_context(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    let query = state.original_query.trim().to_string();
    if let Some(hit) = svc.cache.get(&query) {
        return Ok(cached(CACHE_TYPE, query, hit));
    }

    let mut standalone = query.clone();
    if !state.conversation.is_empty() {
        let prompt = format!(
            "Conversation:\n{}\n\nLatest query: {query}",
            render_conversation(&state.conversation)
        );
        let merged: ContextMerge = svc
            .llm
            .structured(tasks::MERGE_CONTEXT, prompts::MERGE_CONTEXT, &prompt)
            .await?;
        if !merged.standalone_query.trim().is_empty() {
            standalone = merged.standalone_query.trim().to_string();
        }
        if merged.answered_by_context {
            if let Some(answer) = merged.answer.filter(|a| !a.trim().is_empty()) {
                let hit = CachedAnswer {
                    answer,
                    citations: Vec::new(),
                };
                return Ok(cached(CONTEXT_TYPE, standalone, hit));
            }
        }
        if let Some(hit) = svc.cache.get(&standalone) {
            return Ok(cached(CACHE_TYPE, standalone, hit));
        }
    }

    if svc.settings.vision && !state.image_description.trim().is_empty() {
        standalone.push_str(&format!("\n\nAttached image: {}", state.image_description.trim()));
    }
    Ok(StatePatch {
        standalone_query: Some(standalone),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_rendering() {
        let turns = vec![ChatTurn {
            query: "Apple revenue 2022?".into(),
            answer: "$394.3B".into(),
        }];
        assert_eq!(render_conversation(&turns), "User: Apple revenue 2022?\nAssistant: $394.3B");
    }
}
