//! Superstep execution: `stream`, `invoke` and the task runner.

use super::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, NodeContext, START};
use crate::retry::RetryState;
use crate::send::ConditionalEdgeResult;
use crate::state::overlay;
use crate::trace::execution_id;
use finrag_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, PendingTask,
};
use futures::future::join_all;
use futures::{Stream, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use tracing::{debug, error, info, warn};

/// Stream of run events
pub type GraphStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// What a stream yields per superstep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamMode {
    /// Full state after each superstep
    #[default]
    Values,
    /// Each task's patch
    Updates,
}

/// An event produced while running
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// State after a superstep
    Values { step: usize, values: Value },

    /// Patch written by one task
    Updates {
        step: usize,
        node: String,
        update: Value,
    },

    /// The run halted before `next`
    Interrupt {
        step: usize,
        next: Vec<String>,
        values: Value,
    },
}

struct RunState {
    thread_id: String,
    values: Value,
    pending: Vec<PendingTask>,
    step: usize,
    steps_this_run: usize,
    retry_counts: BTreeMap<String, u32>,
    resume_past_interrupt: bool,
}

struct TaskOutcome {
    task: PendingTask,
    label: String,
    trace_id: String,
    failures: usize,
    result: Result<Value>,
}

enum Advance {
    Finished(Option<StreamEvent>),
    Interrupted(StreamEvent),
    Step(Vec<StreamEvent>),
}

const TRACE_TEXT_LIMIT: usize = 200;

fn trace_text(task: &PendingTask, step: usize) -> String {
    match &task.overlay {
        Some(overlay) => {
            let mut text = overlay.to_string();
            if text.len() > TRACE_TEXT_LIMIT {
                let cut = (0..=TRACE_TEXT_LIMIT)
                    .rev()
                    .find(|i| text.is_char_boundary(*i))
                    .unwrap_or(0);
                text.truncate(cut);
                text.push('…');
            }
            text
        }
        None => format!("step {step}"),
    }
}

impl CompiledGraph {
    /// Stream a run.
    ///
    /// With `Some(input)` a new run starts from START, with the input merged
    /// into the thread's previous state (if any). With `None` the latest
    /// checkpoint of the thread is resumed, stepping past the interrupt it
    /// halted at.
    pub fn stream(
        &self,
        input: Option<Value>,
        thread_id: impl Into<String>,
        mode: StreamMode,
    ) -> GraphStream {
        self.stream_with_parent(input, thread_id, mode, None)
    }

    /// Like [`stream`](Self::stream), hanging entry tasks under `parent_trace`
    pub fn stream_with_parent(
        &self,
        input: Option<Value>,
        thread_id: impl Into<String>,
        mode: StreamMode,
        parent_trace: Option<String>,
    ) -> GraphStream {
        let this = self.clone();
        let thread_id = thread_id.into();
        Box::pin(async_stream::stream! {
            match this.prepare(input, thread_id, parent_trace).await {
                Err(err) => {
                    yield Err(err);
                }
                Ok(mut run) => loop {
                    match this.advance(&mut run, mode).await {
                        Ok(Advance::Finished(last)) => {
                            if let Some(event) = last {
                                yield Ok(event);
                            }
                            break;
                        }
                        Ok(Advance::Interrupted(event)) => {
                            yield Ok(event);
                            break;
                        }
                        Ok(Advance::Step(events)) => {
                            for event in events {
                                yield Ok(event);
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                            break;
                        }
                    }
                },
            }
        })
    }

    /// Run until the graph finishes or halts at an interrupt; return the state
    #[tracing::instrument(skip(self, input), fields(nodes = self.graph.nodes.len()))]
    pub async fn invoke(&self, input: Value, thread_id: &str) -> Result<Value> {
        self.invoke_with_parent(Some(input), thread_id, None).await
    }

    /// [`invoke`](Self::invoke) with an optional resume and parent trace id
    pub async fn invoke_with_parent(
        &self,
        input: Option<Value>,
        thread_id: &str,
        parent_trace: Option<String>,
    ) -> Result<Value> {
        let mut stream = self.stream_with_parent(input, thread_id, StreamMode::Values, parent_trace);
        let mut last = Value::Object(Map::new());
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Values { values, .. } | StreamEvent::Interrupt { values, .. } => {
                    last = values
                }
                StreamEvent::Updates { .. } => {}
            }
        }
        Ok(last)
    }

    async fn prepare(
        &self,
        input: Option<Value>,
        thread_id: String,
        parent_trace: Option<String>,
    ) -> Result<RunState> {
        let config = CheckpointConfig::for_thread(thread_id.clone());
        let previous = match &self.checkpointer {
            Some(saver) => saver.get(&config).await?,
            None => None,
        };

        match input {
            Some(input) => {
                let (mut values, retry_counts, step) = previous
                    .map(|c| (c.values, c.retry_counts, c.step))
                    .unwrap_or_else(|| (json!({}), BTreeMap::new(), 0));
                self.graph.schema.apply(&mut values, &input)?;

                let root = parent_trace.unwrap_or_else(|| execution_id("run"));
                let mut pending = Vec::new();
                self.route_from(START, &values, &root, &mut pending)?;

                let run = RunState {
                    thread_id,
                    values,
                    pending,
                    step,
                    steps_this_run: 0,
                    retry_counts,
                    resume_past_interrupt: false,
                };
                info!(thread = %run.thread_id, next = ?next_names(&run.pending), "run started");
                self.save(&run, CheckpointSource::Input, Vec::new(), None).await?;
                Ok(run)
            }
            None => {
                let checkpoint = previous.ok_or_else(|| GraphError::NothingToResume(thread_id.clone()))?;
                info!(thread = %thread_id, next = ?checkpoint.next_nodes(), "run resumed");
                Ok(RunState {
                    thread_id,
                    resume_past_interrupt: !checkpoint.interrupted_before.is_empty(),
                    values: checkpoint.values,
                    pending: checkpoint.pending,
                    step: checkpoint.step,
                    steps_this_run: 0,
                    retry_counts: checkpoint.retry_counts,
                })
            }
        }
    }

    async fn advance(&self, run: &mut RunState, mode: StreamMode) -> Result<Advance> {
        if run.pending.is_empty() {
            debug!(thread = %run.thread_id, step = run.step, "run finished");
            let last = (run.steps_this_run == 0 || mode == StreamMode::Updates).then(|| {
                StreamEvent::Values {
                    step: run.step,
                    values: run.values.clone(),
                }
            });
            return Ok(Advance::Finished(last));
        }

        if !run.resume_past_interrupt {
            let halted: Vec<String> = next_names(&run.pending)
                .into_iter()
                .filter(|node| self.interrupts.should_interrupt_before(node))
                .collect();
            if !halted.is_empty() {
                info!(thread = %run.thread_id, nodes = ?halted, "interrupted before node");
                self.save(run, CheckpointSource::Loop, halted.clone(), None).await?;
                return Ok(Advance::Interrupted(StreamEvent::Interrupt {
                    step: run.step,
                    next: halted,
                    values: run.values.clone(),
                }));
            }
        }
        run.resume_past_interrupt = false;

        if run.steps_this_run >= self.recursion_limit {
            return Err(GraphError::RecursionLimit(self.recursion_limit));
        }

        let updates = self.superstep(run).await?;

        let events = match mode {
            StreamMode::Values => vec![StreamEvent::Values {
                step: run.step,
                values: run.values.clone(),
            }],
            StreamMode::Updates => updates
                .iter()
                .map(|(node, update)| StreamEvent::Updates {
                    step: run.step,
                    node: node.clone(),
                    update: update.clone(),
                })
                .collect(),
        };

        let writes: Map<String, Value> = updates.into_iter().collect();
        self.save(run, CheckpointSource::Loop, Vec::new(), Some(Value::Object(writes)))
            .await?;
        Ok(Advance::Step(events))
    }

    async fn superstep(&self, run: &mut RunState) -> Result<Vec<(String, Value)>> {
        let step = run.step;
        debug!(thread = %run.thread_id, step, tasks = ?next_names(&run.pending), "superstep");

        let outcomes = {
            let values = &run.values;
            join_all(
                run.pending
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(index, task)| self.execute_task(task, index, values, step)),
            )
            .await
        };

        let mut updates: Vec<(String, Value)> = Vec::new();
        let mut completed: Vec<(PendingTask, String)> = Vec::new();
        let mut dropped: Vec<(PendingTask, String)> = Vec::new();
        let mut escalation: Option<GraphError> = None;

        for outcome in outcomes {
            if outcome.failures > 0 {
                *run.retry_counts.entry(outcome.task.node.clone()).or_default() +=
                    outcome.failures as u32;
            }
            match outcome.result {
                Ok(update) => {
                    updates.push((outcome.label, update));
                    completed.push((outcome.task, outcome.trace_id));
                }
                Err(err) if outcome.task.is_branch() => {
                    warn!(node = %outcome.label, error = %err, "fan-out branch dropped after exhausting retries");
                    dropped.push((outcome.task, outcome.trace_id));
                }
                Err(err) => {
                    error!(node = %outcome.label, error = %err, "node failed after exhausting retries");
                    escalation.get_or_insert(err);
                }
            }
        }

        if let Some(err) = escalation {
            self.save(run, CheckpointSource::Loop, Vec::new(), None).await?;
            return Err(err);
        }

        self.graph.schema.merge_superstep(&mut run.values, &updates)?;

        let mut next = Vec::new();
        for (task, trace_id) in &completed {
            match &task.overlay {
                Some(partial) => {
                    let view = overlay(&run.values, partial);
                    self.route_from(&task.node, &view, trace_id, &mut next)?;
                }
                None => self.route_from(&task.node, &run.values, trace_id, &mut next)?,
            }
        }
        // fan-in still runs when branches were dropped, over whatever was collected
        for (task, trace_id) in &dropped {
            for edge in self.graph.edges_from(&task.node) {
                if let Edge::Direct(target) = edge {
                    self.schedule(target, trace_id, &mut next);
                }
            }
        }

        run.pending = next;
        run.step += 1;
        run.steps_this_run += 1;
        Ok(updates)
    }

    async fn execute_task(
        &self,
        task: PendingTask,
        index: usize,
        values: &Value,
        step: usize,
    ) -> TaskOutcome {
        let label = if task.is_branch() {
            format!("{}[{}]", task.node, index)
        } else {
            task.node.clone()
        };
        let trace_id = execution_id(&task.node);
        if let Some(parent) = &task.parent_trace {
            self.log_tree.append(parent, &trace_id, trace_text(&task, step));
        }

        let Some(spec) = self.graph.nodes.get(&task.node) else {
            return TaskOutcome {
                result: Err(GraphError::Validation(format!("unknown node '{}'", task.node))),
                task,
                label,
                trace_id,
                failures: 0,
            };
        };

        let input = match &task.overlay {
            Some(partial) => overlay(values, partial),
            None => values.clone(),
        };
        let policy = self.retry_policy_for(&task.node);
        let mut retry = RetryState::new();

        let result = loop {
            let ctx = NodeContext::new(task.node.clone(), trace_id.clone(), self.log_tree.clone())
                .with_position(step, retry.attempts);
            match (spec.executor)(input.clone(), ctx).await {
                Ok(update) => break Ok(update),
                Err(err) => {
                    retry.record_attempt(Some(err.to_string()));
                    if !policy.should_retry(retry.attempts) {
                        break Err(err);
                    }
                    let delay = policy.calculate_delay(retry.attempts - 1);
                    warn!(
                        node = %label,
                        attempt = retry.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "node failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        TaskOutcome {
            task,
            label,
            trace_id,
            failures: retry.attempts,
            result,
        }
    }

    fn route_from(
        &self,
        source: &str,
        view: &Value,
        trace_id: &str,
        next: &mut Vec<PendingTask>,
    ) -> Result<()> {
        for edge in self.graph.edges_from(source) {
            match edge {
                Edge::Direct(target) => self.schedule(target, trace_id, next),
                Edge::Conditional { router, mapping } => {
                    let decision = router(view)?;
                    debug!(source, ?decision, "routed");
                    self.resolve(source, decision, mapping, trace_id, next)?;
                }
            }
        }
        Ok(())
    }

    fn resolve(
        &self,
        source: &str,
        decision: ConditionalEdgeResult,
        mapping: &HashMap<String, String>,
        trace_id: &str,
        next: &mut Vec<PendingTask>,
    ) -> Result<()> {
        let lookup = |key: String| -> Result<String> {
            let target = mapping.get(&key).cloned().unwrap_or(key.clone());
            if self.graph.is_valid_target(&target) {
                Ok(target)
            } else {
                Err(GraphError::UnknownBranch {
                    source_node: source.to_string(),
                    branch: key,
                })
            }
        };

        match decision {
            ConditionalEdgeResult::Node(key) => {
                let target = lookup(key)?;
                self.schedule(&target, trace_id, next);
            }
            ConditionalEdgeResult::Nodes(keys) => {
                for key in keys {
                    let target = lookup(key)?;
                    self.schedule(&target, trace_id, next);
                }
            }
            ConditionalEdgeResult::Sends(sends) => {
                for send in sends {
                    let (node, arg) = send.into_parts();
                    if !self.graph.nodes.contains_key(&node) {
                        return Err(GraphError::UnknownBranch {
                            source_node: source.to_string(),
                            branch: node,
                        });
                    }
                    next.push(
                        PendingTask::new(node)
                            .with_overlay(arg)
                            .with_parent_trace(trace_id),
                    );
                }
            }
        }
        Ok(())
    }

    /// Plain successors are deduplicated so fan-in nodes run once
    fn schedule(&self, target: &str, trace_id: &str, next: &mut Vec<PendingTask>) {
        if target == crate::graph::END {
            return;
        }
        if next.iter().any(|task| task.node == target && !task.is_branch()) {
            return;
        }
        next.push(PendingTask::new(target).with_parent_trace(trace_id));
    }

    async fn save(
        &self,
        run: &RunState,
        source: CheckpointSource,
        interrupted_before: Vec<String>,
        writes: Option<Value>,
    ) -> Result<()> {
        let Some(saver) = &self.checkpointer else {
            return Ok(());
        };
        let checkpoint = Checkpoint::new(run.values.clone())
            .with_pending(run.pending.clone())
            .with_step(run.step)
            .with_retry_counts(run.retry_counts.clone())
            .with_interrupt(interrupted_before);
        let mut metadata = CheckpointMetadata::new().with_source(source).with_step(run.step);
        if let Some(writes) = writes {
            metadata = metadata.with_writes(writes);
        }
        saver
            .put(&CheckpointConfig::for_thread(run.thread_id.clone()), checkpoint, metadata)
            .await?;
        Ok(())
    }
}

fn next_names(pending: &[PendingTask]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for task in pending {
        if !names.contains(&task.node) {
            names.push(task.node.clone());
        }
    }
    names
}
