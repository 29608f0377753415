//! Multi-pass answering of complex questions.
//!
//! ```text
//!  decompose ─▶ critique ─┬─ changes ─▶ decompose
//!      ▲                  └─ approved ─▶ run_group × N ─▶ combine ─▶ check_sufficiency ─┬─▶ END
//!      └────────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each pass decomposes the question, answers every group in parallel (the
//! items of a group serially, each through the RAG graph) and combines the
//! group answers. A pass that is not `Fully Answered` starts another one,
//! with the previous answer in the decomposition prompt, until
//! `max_repeater_passes` is reached.

use finrag_graph::{AppendListReducer, CompiledGraph, InterruptConfig, LogTree, NodeContext, StateGraph, END};
use llm::StructuredLlmExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::decomposer::{self, dispatch_groups};
use super::prompts::{self, tasks, REFUSAL};
use super::question_tree::QuestionTree;
use super::rag::RagRunner;
use super::schemas::{CombinedAnswer, SerialRewrite, Sufficiency, SufficiencyGrade};
use super::state::RetryCounters;
use super::{add_step, branches, node_retry_policy};
use crate::document::Document;
use crate::error::Result;
use crate::services::Services;

pub const DECOMPOSE: &str = "decompose";
pub const CRITIQUE: &str = "critique";
pub const RUN_GROUP: &str = "run_group";
pub const COMBINE: &str = "combine";
pub const CHECK_SUFFICIENCY: &str = "check_sufficiency";

/// One answered item of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAnswer {
    /// The item as sent to retrieval, after serial rewriting
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Answers of one group in one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAnswer {
    pub pass: u32,
    pub group_index: usize,
    pub items: Vec<SubAnswer>,
    #[serde(default)]
    pub counters: RetryCounters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeaterState {
    pub question: String,
    /// Zero-based pass number
    pub pass: u32,
    pub groups: Vec<Vec<String>>,
    pub critique_rounds: u32,
    /// Last unapproved critique, empty once approved
    pub critique: String,
    /// Every group answer of every pass (append)
    pub group_answers: Vec<GroupAnswer>,
    /// Documents consulted by every pass (append)
    pub documents: Vec<Document>,
    pub answer: String,
    /// Citations of `answer`
    pub pass_citations: Vec<String>,
    pub tree: Option<QuestionTree>,
    pub verdict: Option<Sufficiency>,
    pub previous_answer: String,
    pub counters: RetryCounters,
    /// Set on `run_group` branches only
    pub group_index: usize,
    pub group: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RepeaterPatch {
    pub pass: Option<u32>,
    pub groups: Option<Vec<Vec<String>>>,
    pub critique_rounds: Option<u32>,
    pub critique: Option<String>,
    pub group_answers: Option<Vec<GroupAnswer>>,
    pub documents: Option<Vec<Document>>,
    pub answer: Option<String>,
    pub pass_citations: Option<Vec<String>>,
    pub tree: Option<QuestionTree>,
    pub verdict: Option<Sufficiency>,
    pub previous_answer: Option<String>,
    pub counters: Option<RetryCounters>,
}

#[derive(Clone)]
struct GroupDeps {
    svc: Services,
    rag: RagRunner,
}

fn render_prior(prior: &[SubAnswer]) -> String {
    prior
        .iter()
        .map(|item| format!("Q: {}\nA: {}", item.question, item.answer))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Answer the items of one group in order; later items are rewritten with the
/// answers before them.
async fn run_group(deps: GroupDeps, state: RepeaterState, ctx: NodeContext) -> Result<RepeaterPatch> {
    let mut items: Vec<SubAnswer> = Vec::with_capacity(state.group.len());
    let mut documents: Vec<Document> = Vec::new();
    let mut counters = RetryCounters::default();

    for (position, item) in state.group.iter().enumerate() {
        let question = if position == 0 {
            item.clone()
        } else {
            let prompt = format!("Earlier answers:\n{}\n\nNext question: {item}", render_prior(&items));
            let rewrite: SerialRewrite = deps
                .svc
                .llm
                .structured(tasks::REWRITE_SERIAL, prompts::REWRITE_SERIAL, &prompt)
                .await?;
            if rewrite.question.trim().is_empty() {
                item.clone()
            } else {
                rewrite.question
            }
        };

        let outcome = deps.rag.run(&question, &ctx).await?;
        counters = counters.plus(&outcome.counters);
        documents.extend(outcome.documents);
        items.push(SubAnswer {
            question,
            answer: outcome.answer,
            citations: outcome.citations,
        });
    }
    info!(pass = state.pass, group = state.group_index, items = items.len(), "group answered");

    Ok(RepeaterPatch {
        group_answers: Some(vec![GroupAnswer {
            pass: state.pass,
            group_index: state.group_index,
            items,
            counters,
        }]),
        documents: Some(documents),
        ..Default::default()
    })
}

async fn combine(svc: Services, state: RepeaterState, _ctx: NodeContext) -> Result<RepeaterPatch> {
    let mut answers: Vec<&GroupAnswer> = state
        .group_answers
        .iter()
        .filter(|g| g.pass == state.pass)
        .collect();
    answers.sort_by_key(|g| g.group_index);

    let counters = state
        .counters
        .plus(&RetryCounters::sum(answers.iter().map(|g| &g.counters)));
    let mut tree = QuestionTree::new(state.question.clone());
    let mut citations: Vec<String> = Vec::new();
    for group in &answers {
        let mut items = group.items.iter();
        let Some(head) = items.next() else { continue };
        let head_index = tree.add_child(tree.root(), head.question.clone())?;
        tree.set_answer(head_index, head.answer.clone());
        for item in items {
            let index = tree.add_child(head_index, item.question.clone())?;
            tree.set_answer(index, item.answer.clone());
        }
        for citation in group.items.iter().flat_map(|i| &i.citations) {
            if !citations.contains(citation) {
                citations.push(citation.clone());
            }
        }
    }

    let last_pass = state.pass + 1 >= svc.limits.max_repeater_passes;
    let answer = if answers.is_empty() {
        warn!(pass = state.pass, "no group produced an answer");
        if last_pass {
            REFUSAL.to_string()
        } else {
            String::new()
        }
    } else {
        let sections: Vec<String> = answers
            .iter()
            .flat_map(|g| g.items.iter())
            .map(|item| format!("Sub-question: {}\nAnswer: {}", item.question, item.answer))
            .collect();
        let prompt = format!("Main question: {}\n\n{}", state.question, sections.join("\n\n"));
        let combined: CombinedAnswer = svc
            .llm
            .structured(tasks::COMBINE_ANSWERS, prompts::COMBINE_ANSWERS, &prompt)
            .await?;
        combined.answer
    };
    tree.set_answer(tree.root(), answer.clone());

    Ok(RepeaterPatch {
        answer: Some(answer),
        pass_citations: Some(citations),
        tree: Some(tree),
        counters: Some(counters),
        ..Default::default()
    })
}

async fn check_sufficiency(svc: Services, state: RepeaterState, _ctx: NodeContext) -> Result<RepeaterPatch> {
    let last_pass = state.pass + 1 >= svc.limits.max_repeater_passes;
    let verdict = if last_pass {
        None
    } else if state.answer.trim().is_empty() {
        Some(Sufficiency::NotAnswered)
    } else {
        let prompt = format!("Question: {}\n\nAnswer:\n{}", state.question, state.answer);
        let grade: SufficiencyGrade = svc
            .llm
            .structured(tasks::CHECK_SUFFICIENCY, prompts::CHECK_SUFFICIENCY, &prompt)
            .await?;
        Some(grade.verdict.parse().unwrap_or_else(|err| {
            warn!(error = %err, "treating unknown verdict as not answered");
            Sufficiency::NotAnswered
        }))
    };
    info!(pass = state.pass, verdict = ?verdict, "pass judged");

    let mut tree = state.tree.clone();
    if let (Some(tree), Some(verdict)) = (tree.as_mut(), verdict) {
        let root = tree.root();
        if let Some(node) = tree.node_mut(root) {
            node.sufficient = Some(verdict == Sufficiency::FullyAnswered);
        }
    }

    Ok(RepeaterPatch {
        pass: Some(state.pass + 1),
        critique_rounds: Some(0),
        critique: Some(String::new()),
        verdict,
        previous_answer: Some(state.answer.clone()),
        tree,
        ..Default::default()
    })
}

pub fn build_repeater_graph(svc: &Services, rag: RagRunner) -> Result<CompiledGraph> {
    let limits = svc.limits.clone();
    let mut graph = StateGraph::new();
    graph
        .add_reducer("group_answers", AppendListReducer)
        .add_reducer("documents", AppendListReducer);

    add_step(&mut graph, DECOMPOSE, svc, decomposer::decompose);
    add_step(&mut graph, CRITIQUE, svc, decomposer::critique);
    let deps = GroupDeps { svc: svc.clone(), rag };
    add_step(&mut graph, RUN_GROUP, &deps, run_group);
    add_step(&mut graph, COMBINE, svc, combine);
    add_step(&mut graph, CHECK_SUFFICIENCY, svc, check_sufficiency);

    graph.set_entry(DECOMPOSE);
    let critiques = limits.max_decomposition_critiques;
    graph.add_typed_conditional_edges(
        DECOMPOSE,
        move |state: &RepeaterState| {
            if critiques == 0 {
                dispatch_groups(state)
            } else {
                CRITIQUE.into()
            }
        },
        branches([CRITIQUE, RUN_GROUP]),
    );
    graph.add_typed_conditional_edges(
        CRITIQUE,
        move |state: &RepeaterState| {
            if state.critique.is_empty() || state.critique_rounds >= critiques {
                dispatch_groups(state)
            } else {
                DECOMPOSE.into()
            }
        },
        branches([DECOMPOSE, RUN_GROUP]),
    );
    graph.add_edge(RUN_GROUP, COMBINE);
    graph.add_edge(COMBINE, CHECK_SUFFICIENCY);

    let passes = limits.max_repeater_passes;
    graph.add_typed_conditional_edges(
        CHECK_SUFFICIENCY,
        move |state: &RepeaterState| {
            let done = state.verdict == Some(Sufficiency::FullyAnswered) || state.pass >= passes;
            if done {
                END.into()
            } else {
                DECOMPOSE.into()
            }
        },
        branches([DECOMPOSE, END]),
    );

    Ok(graph
        .compile(None, InterruptConfig::new())?
        .with_default_retry(node_retry_policy(&limits)))
}

/// Result of a repeater run
#[derive(Debug, Clone, PartialEq)]
pub struct RepeaterOutcome {
    pub answer: String,
    /// Sources cited by the last pass
    pub citations: Vec<String>,
    /// Documents retrieved across all passes, earlier passes included
    pub documents: Vec<Document>,
    pub counters: RetryCounters,
    /// Passes run
    pub passes: u32,
    /// Decomposition of the last pass
    pub tree: Option<QuestionTree>,
}

#[derive(Clone, Debug)]
pub struct RepeaterRunner {
    graph: CompiledGraph,
}

impl RepeaterRunner {
    pub fn new(svc: &Services) -> Result<Self> {
        let rag = RagRunner::new(svc)?;
        Ok(Self {
            graph: build_repeater_graph(svc, rag)?,
        })
    }

    pub async fn run(&self, question: &str, ctx: &NodeContext) -> Result<RepeaterOutcome> {
        let root = ctx.open_child("repeater", question);
        self.run_traced(question, ctx.log_tree().clone(), root).await
    }

    pub async fn run_traced(&self, question: &str, log_tree: LogTree, root: String) -> Result<RepeaterOutcome> {
        let values = self
            .graph
            .clone()
            .with_log_tree(log_tree)
            .invoke_with_parent(Some(json!({ "question": question })), &root, Some(root.clone()))
            .await?;
        let state: RepeaterState = serde_json::from_value(values)?;
        info!(passes = state.pass, groups = state.groups.len(), "repeater finished");
        Ok(RepeaterOutcome {
            answer: state.answer,
            citations: state.pass_citations,
            documents: state.documents,
            counters: state.counters,
            passes: state.pass,
            tree: state.tree,
        })
    }
}
