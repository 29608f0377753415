//! KPI analysis next to the main answer path.
//!
//! In research mode the run halts at `select_analysis` with the catalog's
//! topics. When the user picks one, `kpi_analysis` runs in the same superstep
//! as the answer path: every distinct input of the topic is looked up with one
//! RAG question, the figure is extracted from the answer and the topic's
//! formulas are evaluated. A lookup that fails only leaves its KPIs
//! uncomputed.

use finrag_graph::NodeContext;
use futures::stream::{self, StreamExt};
use llm::StructuredLlmExt;
use std::collections::HashMap;
use tracing::{info, warn};

use super::prompts::{self, tasks, REFUSAL};
use super::rag::RagRunner;
use super::schemas::ExtractedValue;
use super::state::{SharedState, StatePatch};
use crate::document::Document;
use crate::error::Result;
use crate::kpi::{self, KpiCatalog, KpiInput, KpiInputValue, KpiResult};
use crate::reports::ReportKey;
use crate::services::Services;

/// Topic named by the user's answer: a 1-based index or a topic name.
/// Empty or `skip` means no analysis.
pub(crate) fn parse_topic_choice(catalog: &KpiCatalog, answer: &str) -> Option<String> {
    let answer = answer.trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case("skip") {
        return None;
    }
    let names = catalog.topic_names();
    if let Ok(index) = answer.parse::<usize>() {
        return index.checked_sub(1).and_then(|i| names.get(i)).map(|n| n.to_string());
    }
    catalog.topic(answer).map(|t| t.name.clone())
}

/// Prompt shown at the analysis interrupt
pub fn topic_menu(catalog: &KpiCatalog) -> String {
    let lines: Vec<String> = catalog
        .topics
        .iter()
        .enumerate()
        .map(|(i, topic)| format!("{}. {} - {}", i + 1, topic.name, topic.description))
        .collect();
    format!(
        "Run a KPI analysis? Pick a topic by number or name, or leave empty to skip:\n{}",
        lines.join("\n")
    )
}

/// Runs on resume: record the chosen topic
pub(crate) async fn select_analysis(svc: Services, state: SharedState, _ctx: NodeContext) -> Result<StatePatch> {
    let topic = parse_topic_choice(&svc.kpis, &state.user_response);
    match &topic {
        Some(topic) => info!(topic = %topic, "KPI analysis selected"),
        None if !state.user_response.trim().is_empty() && !state.user_response.trim().eq_ignore_ascii_case("skip") => {
            warn!(answer = %state.user_response, "unknown analysis topic, skipping")
        }
        None => info!("KPI analysis skipped"),
    }
    Ok(StatePatch {
        analysis_topic: Some(topic.unwrap_or_default()),
        user_response: Some(String::new()),
        ..Default::default()
    })
}

fn input_question(input: &KpiInput, report: Option<&ReportKey>, query: &str) -> String {
    match report {
        Some(key) => format!(
            "What was the {} of {} in fiscal {} according to its {}?",
            input.description, key.company, key.year, key.doc_type
        ),
        None => format!("What was the {}? Context: {query}", input.description),
    }
}

async fn resolve_input(
    svc: &Services,
    rag: &RagRunner,
    ctx: &NodeContext,
    input: &KpiInput,
    question: String,
) -> Result<(KpiInputValue, Vec<Document>)> {
    let outcome = rag.run(&question, ctx).await?;
    if outcome.refused || outcome.answer.trim() == REFUSAL {
        return Ok((
            KpiInputValue {
                name: input.name.clone(),
                value: None,
                citations: Vec::new(),
            },
            outcome.documents,
        ));
    }

    let prompt = format!(
        "Figure: {} ({})\n\nAnswer:\n{}",
        input.name, input.description, outcome.answer
    );
    let extracted: ExtractedValue = svc
        .llm
        .structured(tasks::EXTRACT_KPI_VALUE, prompts::EXTRACT_KPI_VALUE, &prompt)
        .await?;
    let value = extracted.value.filter(|v| v.is_finite());
    Ok((
        KpiInputValue {
            name: input.name.clone(),
            value,
            citations: if value.is_some() { outcome.citations } else { Vec::new() },
        },
        outcome.documents,
    ))
}

pub(crate) async fn kpi_analysis(
    deps: (Services, RagRunner),
    state: SharedState,
    ctx: NodeContext,
) -> Result<StatePatch> {
    let (svc, rag) = deps;
    let Some(topic) = svc.kpis.topic(&state.analysis_topic).cloned() else {
        warn!(topic = %state.analysis_topic, "no such KPI topic");
        return Ok(StatePatch::default());
    };

    let inputs: Vec<KpiInput> = topic.inputs().into_iter().cloned().collect();
    let width = svc.limits.grading_concurrency.max(1);
    let resolved: Vec<(KpiInputValue, Vec<Document>)> = stream::iter(inputs)
        .map(|input| {
            let question = input_question(&input, state.report.as_ref(), state.working_query());
            let (svc, rag, ctx) = (svc.clone(), rag.clone(), ctx.clone());
            async move {
                match resolve_input(&svc, &rag, &ctx, &input, question).await {
                    Ok(found) => found,
                    Err(err) => {
                        warn!(input = %input.name, error = %err, "KPI input lookup failed");
                        let missing = KpiInputValue {
                            name: input.name.clone(),
                            value: None,
                            citations: Vec::new(),
                        };
                        (missing, Vec::new())
                    }
                }
            }
        })
        .buffer_unordered(width)
        .collect()
        .await;

    let mut values: HashMap<String, KpiInputValue> = HashMap::new();
    let mut documents: Vec<Document> = Vec::new();
    for (value, found) in resolved {
        for document in found {
            if !documents.iter().any(|d| d.id == document.id) {
                documents.push(document);
            }
        }
        values.insert(value.name.clone(), value);
    }

    let results: Vec<KpiResult> = topic
        .kpis
        .iter()
        .map(|definition| kpi::compute(&topic.name, definition, &values))
        .collect();
    let mut citations: Vec<String> = Vec::new();
    for citation in results.iter().flat_map(KpiResult::citations) {
        if !citations.contains(citation) {
            citations.push(citation.clone());
        }
    }
    let computed = results.iter().filter(|r| r.value.is_some()).count();
    info!(topic = %topic.name, kpis = results.len(), computed, "KPI analysis finished");

    Ok(StatePatch {
        kpi_results: Some(results),
        citations: Some(citations),
        documents: Some(documents),
        ..Default::default()
    })
}

/// Answer with the KPI section appended
pub(crate) fn with_kpi_section(answer: &str, results: &[KpiResult]) -> String {
    if results.is_empty() {
        return answer.to_string();
    }
    let topic = &results[0].topic;
    let lines: Vec<String> = results.iter().map(KpiResult::render).collect();
    format!("{answer}\n\nKPI analysis ({topic}):\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_choice_by_index_or_name() {
        let catalog = KpiCatalog::builtin().unwrap();
        let first = catalog.topic_names()[0].to_string();
        assert_eq!(parse_topic_choice(&catalog, "1"), Some(first));
        assert_eq!(parse_topic_choice(&catalog, "liquidity"), Some("Liquidity".to_string()));
        assert_eq!(parse_topic_choice(&catalog, "0"), None);
        assert_eq!(parse_topic_choice(&catalog, "99"), None);
        assert_eq!(parse_topic_choice(&catalog, "skip"), None);
        assert_eq!(parse_topic_choice(&catalog, ""), None);
        assert_eq!(parse_topic_choice(&catalog, "astrology"), None);
    }

    #[test]
    fn test_menu_lists_topics() {
        let catalog = KpiCatalog::builtin().unwrap();
        let menu = topic_menu(&catalog);
        assert!(menu.contains("1. Profitability"));
        assert!(menu.contains("Liquidity"));
    }

    #[test]
    fn test_input_question_names_the_filing() {
        let input = KpiInput {
            name: "current_assets".into(),
            description: "total current assets".into(),
        };
        let key = ReportKey::new("Apple", 2022, "10-K");
        assert_eq!(
            input_question(&input, Some(&key), "ignored"),
            "What was the total current assets of Apple in fiscal 2022 according to its 10-K?"
        );
    }

    #[test]
    fn test_kpi_section_is_appended() {
        assert_eq!(with_kpi_section("answer", &[]), "answer");
        let result = KpiResult {
            topic: "Liquidity".into(),
            name: "Current ratio".into(),
            formula: "current_assets / current_liabilities".into(),
            unit: "x".into(),
            value: Some(1.5),
            inputs: vec![],
            missing: vec![],
            note: None,
        };
        assert_eq!(
            with_kpi_section("answer", &[result]),
            "answer\n\nKPI analysis (Liquidity):\n- Current ratio: 1.50 x (current_assets / current_liabilities)"
        );
    }
}
