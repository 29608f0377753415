//! Answer paths, the fan-in `finalize` node and follow-up suggestions.

use finrag_graph::NodeContext;
use llm::StructuredLlmExt;
use tracing::{info, warn};

use super::analysis::with_kpi_section;
use super::persona::PersonaRunner;
use super::prompts::{self, tasks, REFUSAL};
use super::rag::{ground_citations, RagRunner};
use super::repeater::RepeaterRunner;
use super::schemas::{FollowUps, GeneralAnswer, Generation};
use super::state::{Path, SharedState, StatePatch};
use super::clean_list;
use crate::document::render_context;
use crate::error::Result;
use crate::services::Services;

/// Sub-graph runners of the financial paths
#[derive(Clone, Debug)]
pub struct AnswerDeps {
    pub svc: Services,
    pub rag: RagRunner,
    pub repeater: RepeaterRunner,
    pub persona: PersonaRunner,
}

impl AnswerDeps {
    pub fn new(svc: &Services) -> Result<Self> {
        Ok(Self {
            svc: svc.clone(),
            rag: RagRunner::new(svc)?,
            repeater: RepeaterRunner::new(svc)?,
            persona: PersonaRunner::new(svc)?,
        })
    }
}

fn path_name(state: &SharedState, fallback: Path) -> String {
    state.path_decided.unwrap_or(fallback).as_str().to_string()
}

pub(crate) async fn answer_simple(deps: AnswerDeps, state: SharedState, ctx: NodeContext) -> Result<StatePatch> {
    let outcome = deps.rag.run(state.working_query(), &ctx).await?;
    let mut patch = StatePatch::answer(
        &path_name(&state, Path::SimpleFinancial),
        outcome.answer,
        outcome.citations,
        outcome.documents,
    );
    patch.retry_counters = Some(state.retry_counters.plus(&outcome.counters));
    Ok(patch)
}

pub(crate) async fn answer_complex(deps: AnswerDeps, state: SharedState, ctx: NodeContext) -> Result<StatePatch> {
    let outcome = deps.repeater.run(state.working_query(), &ctx).await?;
    info!(passes = outcome.passes, "complex answer ready");
    let mut patch = StatePatch::answer(
        &path_name(&state, Path::ComplexFinancial),
        outcome.answer,
        outcome.citations,
        outcome.documents,
    );
    patch.retry_counters = Some(state.retry_counters.plus(&outcome.counters));
    Ok(patch)
}

pub(crate) async fn answer_persona(deps: AnswerDeps, state: SharedState, ctx: NodeContext) -> Result<StatePatch> {
    let outcome = deps.persona.run(state.working_query(), &ctx).await?;
    let mut patch = StatePatch::answer(
        &path_name(&state, Path::Persona),
        outcome.answer,
        outcome.citations,
        outcome.documents,
    );
    patch.retry_counters = Some(state.retry_counters.plus(&outcome.counters));
    Ok(patch)
}

async fn general_answer(svc: &Services, query: &str) -> Result<String> {
    let answer: GeneralAnswer = svc
        .llm
        .structured(tasks::GENERAL_ANSWER, prompts::GENERAL_ANSWER, query)
        .await?;
    Ok(answer.answer)
}

pub(crate) async fn general_llm(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    let answer = general_answer(&svc, state.working_query()).await?;
    Ok(StatePatch {
        final_answer: Some(answer),
        answer_type: Some(Path::General.as_str().to_string()),
        ..Default::default()
    })
}

pub(crate) async fn web_answer(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    let query = state.working_query();
    let documents = match svc.web.search(query, svc.limits.max_web_search_results).await {
        Ok(documents) => documents,
        Err(err) => {
            warn!(error = %err, "web search failed");
            Vec::new()
        }
    };
    if documents.is_empty() {
        info!("no web results, answering directly");
        let answer = general_answer(&svc, query).await?;
        return Ok(StatePatch {
            final_answer: Some(answer),
            answer_type: Some(Path::General.as_str().to_string()),
            ..Default::default()
        });
    }

    let prompt = format!("Question: {query}\n\nDocuments:\n{}", render_context(&documents));
    let generation: Generation = svc
        .llm
        .structured(tasks::GENERATE_ANSWER, prompts::GENERATE_ANSWER, &prompt)
        .await?;
    let (answer, citations) = ground_citations(generation, &documents);
    Ok(StatePatch::answer(Path::Web.as_str(), answer, citations, documents))
}

/// Fan-in of the answer path and the KPI analysis
pub(crate) async fn finalize(_svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    if state.kpi_results.is_empty() {
        return Ok(StatePatch::default());
    }
    Ok(StatePatch {
        final_answer: Some(with_kpi_section(&state.final_answer, &state.kpi_results)),
        ..Default::default()
    })
}

pub(crate) async fn follow_ups(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    let answer = state.final_answer.trim();
    if !svc.settings.follow_ups || answer.is_empty() || answer == REFUSAL {
        return Ok(StatePatch::default());
    }
    let prompt = format!("Question: {}\n\nAnswer:\n{answer}", state.working_query());
    let suggested: FollowUps = svc
        .llm
        .structured(tasks::FOLLOW_UPS, prompts::FOLLOW_UPS, &prompt)
        .await?;
    Ok(StatePatch {
        follow_ups: Some(clean_list(suggested.questions, svc.limits.max_follow_ups)),
        ..Default::default()
    })
}
