//! The main reasoning graph; see the module docs of [`crate::workflow`] for
//! its shape.

use finrag_checkpoint::CheckpointSaver;
use finrag_graph::{CompiledGraph, ConditionalEdgeResult, InterruptConfig, LogTree, StateGraph, END};
use std::sync::Arc;

use super::answer::{self, AnswerDeps};
use super::state::{register_reducers, Path, SharedState};
use super::triage::{CACHE_TYPE, CONTEXT_TYPE};
use super::{add_step, analysis, branches, clarifier, filings, node_retry_policy, path_decider, triage};
use crate::config::WorkflowSettings;
use crate::error::Result;
use crate::services::Services;

pub const SAFETY_CHECK: &str = "safety_check";
pub const MERGE_CONTEXT: &str = "merge_context";
pub const DECIDE_PATH: &str = "decide_path";
pub const CLARIFY: &str = "clarify";
pub const AWAIT_CLARIFICATION: &str = "await_clarification";
pub const REFINE: &str = "refine";
pub const DECIDE_FINANCIAL_PATH: &str = "decide_financial_path";
pub const CHECK_REPORTS: &str = "check_reports";
pub const CONFIRM_DOWNLOAD: &str = "confirm_download";
pub const SELECT_ANALYSIS: &str = "select_analysis";
pub const ANSWER_SIMPLE: &str = "answer_simple";
pub const ANSWER_COMPLEX: &str = "answer_complex";
pub const ANSWER_PERSONA: &str = "answer_persona";
pub const KPI_ANALYSIS: &str = "kpi_analysis";
pub const GENERAL_LLM: &str = "general_llm";
pub const WEB_ANSWER: &str = "web_answer";
pub const FINALIZE: &str = "finalize";
pub const FOLLOW_UPS: &str = "follow_ups";

/// Nodes the run halts before, waiting for `user_response`
pub const INTERRUPT_NODES: [&str; 3] = [AWAIT_CLARIFICATION, CONFIRM_DOWNLOAD, SELECT_ANALYSIS];

/// Compiled main graph and the log tree its runs record into
#[derive(Clone, Debug)]
pub struct MainGraph {
    graph: CompiledGraph,
    log_tree: LogTree,
}

impl MainGraph {
    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn log_tree(&self) -> &LogTree {
        &self.log_tree
    }
}

/// Answer node of a financial-track path
fn path_node(path: Option<Path>) -> &'static str {
    match path {
        Some(Path::ComplexFinancial | Path::Reason) => ANSWER_COMPLEX,
        Some(Path::Analysis | Path::Persona) => ANSWER_PERSONA,
        _ => ANSWER_SIMPLE,
    }
}

fn after_reports(settings: &WorkflowSettings, state: &SharedState) -> ConditionalEdgeResult {
    if settings.analysis && state.report.is_some() {
        SELECT_ANALYSIS.into()
    } else {
        path_node(state.path_decided).into()
    }
}

pub fn build_main_graph(svc: &Services, checkpointer: Arc<dyn CheckpointSaver>) -> Result<MainGraph> {
    let settings = svc.settings.clone();
    let deps = AnswerDeps::new(svc)?;
    let analysis_deps = (svc.clone(), deps.rag.clone());

    let mut graph = StateGraph::new();
    register_reducers(&mut graph);

    add_step(&mut graph, SAFETY_CHECK, svc, triage::safety_check);
    add_step(&mut graph, MERGE_CONTEXT, svc, triage::merge_context);
    add_step(&mut graph, DECIDE_PATH, svc, path_decider::decide_path);
    add_step(&mut graph, CLARIFY, svc, clarifier::clarify);
    add_step(&mut graph, AWAIT_CLARIFICATION, svc, clarifier::await_clarification);
    add_step(&mut graph, REFINE, svc, clarifier::refine);
    add_step(&mut graph, DECIDE_FINANCIAL_PATH, svc, path_decider::decide_financial_path);
    add_step(&mut graph, CHECK_REPORTS, svc, filings::check_reports);
    add_step(&mut graph, CONFIRM_DOWNLOAD, svc, filings::confirm_download);
    add_step(&mut graph, SELECT_ANALYSIS, svc, analysis::select_analysis);
    add_step(&mut graph, ANSWER_SIMPLE, &deps, answer::answer_simple);
    add_step(&mut graph, ANSWER_COMPLEX, &deps, answer::answer_complex);
    add_step(&mut graph, ANSWER_PERSONA, &deps, answer::answer_persona);
    add_step(&mut graph, KPI_ANALYSIS, &analysis_deps, analysis::kpi_analysis);
    add_step(&mut graph, GENERAL_LLM, svc, answer::general_llm);
    add_step(&mut graph, WEB_ANSWER, svc, answer::web_answer);
    add_step(&mut graph, FINALIZE, svc, answer::finalize);
    add_step(&mut graph, FOLLOW_UPS, svc, answer::follow_ups);

    graph.set_entry(SAFETY_CHECK);
    graph.add_typed_conditional_edges(
        SAFETY_CHECK,
        |state: &SharedState| {
            let next = if state.query_safe == Some(false) { END } else { MERGE_CONTEXT };
            next.into()
        },
        branches([MERGE_CONTEXT, END]),
    );
    graph.add_typed_conditional_edges(
        MERGE_CONTEXT,
        |state: &SharedState| {
            let answered = state.answer_type == CACHE_TYPE || state.answer_type == CONTEXT_TYPE;
            let next = if answered { END } else { DECIDE_PATH };
            next.into()
        },
        branches([DECIDE_PATH, END]),
    );

    let clarification = settings.clarification;
    graph.add_typed_conditional_edges(
        DECIDE_PATH,
        move |state: &SharedState| {
            let next = match state.path_decided {
                Some(Path::General) | None => GENERAL_LLM,
                Some(Path::Web) => WEB_ANSWER,
                Some(_) if clarification => CLARIFY,
                Some(_) => REFINE,
            };
            next.into()
        },
        branches([GENERAL_LLM, WEB_ANSWER, CLARIFY, REFINE]),
    );
    graph.add_typed_conditional_edges(
        CLARIFY,
        |state: &SharedState| {
            let done = state.clarifying_questions.last().map_or(true, |q| q.is_none());
            let next = if done { REFINE } else { AWAIT_CLARIFICATION };
            next.into()
        },
        branches([REFINE, AWAIT_CLARIFICATION]),
    );
    graph.add_edge(AWAIT_CLARIFICATION, CLARIFY);
    graph.add_edge(REFINE, DECIDE_FINANCIAL_PATH);
    graph.add_edge(DECIDE_FINANCIAL_PATH, CHECK_REPORTS);

    let answer_nodes = [ANSWER_SIMPLE, ANSWER_COMPLEX, ANSWER_PERSONA];
    let s = settings.clone();
    graph.add_typed_conditional_edges(
        CHECK_REPORTS,
        move |state: &SharedState| {
            if state.missing_report.is_some() && state.download_confirmed.is_none() {
                CONFIRM_DOWNLOAD.into()
            } else {
                after_reports(&s, state)
            }
        },
        branches([CONFIRM_DOWNLOAD, SELECT_ANALYSIS, ANSWER_SIMPLE, ANSWER_COMPLEX, ANSWER_PERSONA]),
    );
    let s = settings.clone();
    graph.add_typed_conditional_edges(
        CONFIRM_DOWNLOAD,
        move |state: &SharedState| after_reports(&s, state),
        branches([SELECT_ANALYSIS, ANSWER_SIMPLE, ANSWER_COMPLEX, ANSWER_PERSONA]),
    );
    graph.add_typed_conditional_edges(
        SELECT_ANALYSIS,
        |state: &SharedState| {
            let answer = path_node(state.path_decided);
            if state.analysis_topic.is_empty() {
                answer.into()
            } else {
                vec![answer, KPI_ANALYSIS].into()
            }
        },
        branches([ANSWER_SIMPLE, ANSWER_COMPLEX, ANSWER_PERSONA, KPI_ANALYSIS]),
    );

    for node in answer_nodes {
        graph.add_edge(node, FINALIZE);
    }
    graph.add_edge(KPI_ANALYSIS, FINALIZE);
    graph.add_edge(FINALIZE, FOLLOW_UPS);
    graph.add_edge(GENERAL_LLM, FOLLOW_UPS);
    graph.add_edge(WEB_ANSWER, FOLLOW_UPS);
    graph.add_edge(FOLLOW_UPS, END);

    let log_tree = LogTree::new();
    let compiled = graph
        .compile(
            Some(checkpointer),
            InterruptConfig::new().with_interrupt_before(INTERRUPT_NODES),
        )?
        .with_default_retry(node_retry_policy(&svc.limits))
        .with_log_tree(log_tree.clone());
    Ok(MainGraph {
        graph: compiled,
        log_tree,
    })
}
