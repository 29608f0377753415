//! Which filing a financial question is about, and fetching it when missing.

use finrag_graph::NodeContext;
use llm::StructuredLlmExt;
use tracing::{info, warn};

use super::prompts::{self, tasks};
use super::schemas::ReportRequest;
use super::state::{SharedState, StatePatch};
use crate::error::Result;
use crate::reports::ReportKey;
use crate::services::Services;

/// Filing type assumed when the question names none
pub const DEFAULT_DOC_TYPE: &str = "10-K";

/// A filing key, when the request names both company and year
pub(crate) fn report_key(request: &ReportRequest) -> Option<ReportKey> {
    let company = request.company.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
    let year = request.year?;
    let doc_type = request
        .doc_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_DOC_TYPE);
    Some(ReportKey::new(company, year, doc_type))
}

/// Whether a confirmation answer means yes
pub(crate) fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y")
}

pub(crate) async fn check_reports(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    let request: ReportRequest = svc
        .llm
        .structured(tasks::EXTRACT_REPORT, prompts::EXTRACT_REPORT, state.working_query())
        .await?;
    let Some(key) = report_key(&request) else {
        info!("question names no specific filing");
        return Ok(StatePatch::default());
    };

    if svc.reports.contains(&key).await? {
        info!(report = %key, "filing available");
        return Ok(StatePatch {
            report: Some(key),
            ..Default::default()
        });
    }
    info!(report = %key, "filing missing, asking to download");
    Ok(StatePatch {
        report: Some(key.clone()),
        missing_report: Some(key),
        ..Default::default()
    })
}

/// Runs on resume: download the missing filing if the user agreed
pub(crate) async fn confirm_download(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    let confirmed = is_yes(&state.user_response);
    if let (true, Some(key)) = (confirmed, state.missing_report.as_ref()) {
        match svc.downloader.download(key, &svc.data_dir).await {
            Ok(path) => {
                svc.reports.register(key, &path).await?;
                info!(report = %key, path = %path.display(), "filing downloaded");
            }
            Err(err) => warn!(report = %key, error = %err, "download failed, continuing without the filing"),
        }
    } else {
        info!(confirmed, "continuing without the missing filing");
    }
    Ok(StatePatch {
        download_confirmed: Some(confirmed),
        user_response: Some(String::new()),
        ..Default::default()
    })
}
