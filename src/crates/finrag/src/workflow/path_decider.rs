//! Two-stage path decider.
//!
//! Stage one runs on the standalone query and picks `general`, `web`,
//! `financial` or `reason`. Financial-track queries go through clarification
//! and stage two, which picks the financial path on the refined query.

use finrag_graph::NodeContext;
use llm::StructuredLlmExt;
use tracing::info;

use super::prompts::{self, tasks};
use super::schemas::{FinancialPathVerdict, PathVerdict};
use super::state::{Path, SharedState, StatePatch};
use crate::config::WorkflowSettings;
use crate::error::Result;
use crate::services::Services;

pub(crate) async fn decide_path(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    let path = if svc.reports.is_empty().await? {
        info!("no local filings, answering as a general question");
        Path::General
    } else {
        let verdict: PathVerdict = svc
            .llm
            .structured(tasks::DECIDE_PATH, prompts::DECIDE_PATH, state.working_query())
            .await?;
        info!(path = %Path::from(verdict.path), reason = %verdict.reason, "path decided");
        verdict.path.into()
    };
    Ok(StatePatch {
        path_decided: Some(path),
        ..Default::default()
    })
}

/// Apply the stage-two constraints: `reason` never takes the simple path and
/// disabled analysis falls back to the complex path
pub(crate) fn constrain(stage_one: Option<Path>, chosen: Path, settings: &WorkflowSettings) -> Path {
    match chosen {
        Path::SimpleFinancial if stage_one == Some(Path::Reason) => Path::ComplexFinancial,
        Path::Analysis | Path::Persona if !settings.analysis => Path::ComplexFinancial,
        other => other,
    }
}

pub(crate) async fn decide_financial_path(
    svc: Services,
    state: SharedState,
    _ctx: NodeContext,
) -> Result<StatePatch> {
    let stage_one = state.path_decided;
    let prompt = format!(
        "Query: {}\nInitial classification: {}",
        state.working_query(),
        stage_one.map(|p| p.as_str()).unwrap_or("financial")
    );
    let verdict: FinancialPathVerdict = svc
        .llm
        .structured(tasks::DECIDE_FINANCIAL_PATH, prompts::DECIDE_FINANCIAL_PATH, &prompt)
        .await?;
    let path = constrain(stage_one, verdict.path.into(), &svc.settings);
    info!(path = %path, reason = %verdict.reason, "financial path decided");
    Ok(StatePatch {
        path_decided: Some(path),
        ..Default::default()
    })
}
