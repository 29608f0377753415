//! Session driver: runs the main graph for one query, surfaces its interrupts
//! as prompts and persists the finished exchange.
//!
//! ```text
//! let mut session = driver.start(SessionRequest::new("What was Apple's revenue in 2022?")).await?;
//! loop {
//!     match session.step().await? {
//!         SessionStep::Interrupt(prompt) => session.respond(ask_user(&prompt.prompt)).await?,
//!         SessionStep::Final(result) => break result,
//!     }
//! }
//! ```
//!
//! A run that fails with a graph error is resumed from its last checkpoint,
//! at most `max_session_retries` times. After that the session ends with
//! [`ExitCode::RetriesExhausted`] and whatever answer the state holds.

use finrag_checkpoint::{CheckpointSaver, InMemoryCheckpointSaver};
use finrag_graph::{StreamEvent, StreamMode, TraceSink};
use futures::StreamExt;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::CachedAnswer;
use crate::chat_log::{ChatLog, ChatRecord};
use crate::config::RunMode;
use crate::error::{FinragError, Result};
use crate::services::Services;
use crate::workflow::analysis::topic_menu;
use crate::workflow::graph::{AWAIT_CLARIFICATION, CONFIRM_DOWNLOAD, SELECT_ANALYSIS};
use crate::workflow::triage::{CACHE_TYPE, REFUSAL_TYPE};
use crate::workflow::{build_main_graph, MainGraph, RetryCounters, SharedState, REFUSAL};

/// Process exit status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    /// The safety check refused the query
    Refused,
    RetriesExhausted,
    Cancelled,
}

impl ExitCode {
    pub fn code(&self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Refused => 1,
            ExitCode::RetriesExhausted => 2,
            ExitCode::Cancelled => 3,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitCode::Success => "success",
            ExitCode::Refused => "refused",
            ExitCode::RetriesExhausted => "retries exhausted",
            ExitCode::Cancelled => "cancelled",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// What starts a session
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub query: String,
    pub mode: RunMode,
    pub image_description: Option<String>,
    /// Continue an earlier conversation; a new id is generated when unset
    pub session_id: Option<String>,
}

impl SessionRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: RunMode::default(),
            image_description: None,
            session_id: None,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_image(mut self, description: impl Into<String>) -> Self {
        self.image_description = Some(description.into());
        self
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// A question put to the user at an interrupt
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptPrompt {
    /// Node the run halted before
    pub node: String,
    pub prompt: String,
}

/// Outcome of a finished session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub answer: String,
    pub citations: Vec<String>,
    pub follow_ups: Vec<String>,
    pub answer_type: String,
    pub exit_code: ExitCode,
    /// Final state, for inspection
    pub state: SharedState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStep {
    Final(SessionResult),
    Interrupt(InterruptPrompt),
}

#[derive(Debug)]
enum Status {
    /// Next `step` starts the run with this input
    Ready(Value),
    /// Next `step` resumes from the checkpoint
    Resumable,
    AwaitingResponse(InterruptPrompt),
    Done(SessionResult),
}

enum RunEnd {
    Interrupted { next: Vec<String>, values: Value },
    Finished(Value),
}

/// Starts sessions against shared collaborators
#[derive(Clone)]
pub struct SessionDriver {
    services: Services,
    checkpointer: Arc<dyn CheckpointSaver>,
    chat_log: ChatLog,
    trace_sink: Option<Arc<dyn TraceSink>>,
}

impl fmt::Debug for SessionDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDriver")
            .field("services", &self.services)
            .field("chat_log", &self.chat_log)
            .field("trace_export", &self.trace_sink.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionDriver {
    pub fn new(services: Services, chat_log: ChatLog) -> Self {
        Self {
            services,
            checkpointer: Arc::new(InMemoryCheckpointSaver::new()),
            chat_log,
            trace_sink: None,
        }
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn chat_log(&self) -> &ChatLog {
        &self.chat_log
    }

    /// Compile the graph for the request's mode and prepare the first run.
    /// Nothing executes until [`Session::step`].
    pub async fn start(&self, request: SessionRequest) -> Result<Session> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(FinragError::Session("empty query".to_string()));
        }
        let services = self.services.for_mode(request.mode);
        let graph = build_main_graph(&services, self.checkpointer.clone())?;

        let session_id = request.session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let conversation = self.chat_log.conversation(&session_id).await?;
        let thread_id = format!("{session_id}:{}", Uuid::new_v4());
        info!(
            session = %session_id,
            thread = %thread_id,
            mode = %request.mode,
            turns = conversation.len(),
            "session started"
        );

        let input = json!({
            "session_id": session_id,
            "original_query": query,
            "image_description": request.image_description.unwrap_or_default(),
            "conversation": conversation,
        });
        Ok(Session {
            session_id,
            thread_id,
            services,
            graph,
            chat_log: self.chat_log.clone(),
            trace_sink: self.trace_sink.clone(),
            status: Status::Ready(input),
            failures: 0,
        })
    }
}

/// One query's run, possibly spanning several interrupts
pub struct Session {
    session_id: String,
    thread_id: String,
    services: Services,
    graph: MainGraph,
    chat_log: ChatLog,
    trace_sink: Option<Arc<dyn TraceSink>>,
    status: Status,
    failures: u32,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("thread_id", &self.thread_id)
            .field("status", &self.status)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn graph(&self) -> &MainGraph {
        &self.graph
    }

    /// Latest checkpointed state
    pub async fn state(&self) -> Result<SharedState> {
        let snapshot = self.graph.graph().get_state(&self.thread_id).await?;
        match snapshot {
            Some(snapshot) => Ok(serde_json::from_value(snapshot.values)?),
            None => Ok(SharedState::default()),
        }
    }

    /// Retry budgets the session has consumed so far
    pub async fn retry_counters(&self) -> Result<RetryCounters> {
        Ok(self.state().await?.retry_counters)
    }

    /// Run until the next interrupt or the end.
    ///
    /// A finished session returns its result again. Stepping while an
    /// interrupt waits for [`respond`](Self::respond) is an error.
    pub async fn step(&mut self) -> Result<SessionStep> {
        let mut input = match &self.status {
            Status::Done(result) => return Ok(SessionStep::Final(result.clone())),
            Status::AwaitingResponse(prompt) => {
                return Err(FinragError::Session(format!(
                    "session {} is waiting for an answer to '{}'",
                    self.session_id, prompt.node
                )))
            }
            Status::Ready(input) => Some(input.clone()),
            Status::Resumable => None,
        };

        let max_retries = self.services.limits.max_session_retries;
        loop {
            match self.run(input.take()).await {
                Ok(RunEnd::Interrupted { next, values }) => {
                    let state: SharedState = serde_json::from_value(values)?;
                    let prompt = self.interrupt_prompt(&next, &state);
                    info!(session = %self.session_id, node = %prompt.node, "waiting for user");
                    self.status = Status::AwaitingResponse(prompt.clone());
                    return Ok(SessionStep::Interrupt(prompt));
                }
                Ok(RunEnd::Finished(values)) => {
                    let state: SharedState = match values {
                        Value::Object(_) => serde_json::from_value(values)?,
                        _ => self.state().await?,
                    };
                    let result = self.complete(state).await;
                    return Ok(SessionStep::Final(result));
                }
                Err(err) => {
                    self.failures += 1;
                    self.status = Status::Resumable;
                    if self.failures > max_retries {
                        error!(session = %self.session_id, failures = self.failures, error = %err, "session failed");
                        let mut state = self.state().await.unwrap_or_default();
                        if state.final_answer.trim().is_empty() {
                            state.final_answer = REFUSAL.to_string();
                        }
                        let result = self.finish(state, ExitCode::RetriesExhausted).await;
                        return Ok(SessionStep::Final(result));
                    }
                    warn!(
                        session = %self.session_id,
                        attempt = self.failures,
                        max = max_retries,
                        error = %err,
                        "run failed, resuming from last checkpoint"
                    );
                }
            }
        }
    }

    /// Answer the pending interrupt; the next [`step`](Self::step) resumes
    pub async fn respond(&mut self, answer: impl Into<String>) -> Result<()> {
        let Status::AwaitingResponse(prompt) = &self.status else {
            return Err(FinragError::Session(format!(
                "session {} has no pending question",
                self.session_id
            )));
        };
        let answer = answer.into();
        info!(session = %self.session_id, node = %prompt.node, "user answered");
        self.graph
            .graph()
            .update_state(&self.thread_id, json!({ "user_response": answer }))
            .await?;
        self.status = Status::Resumable;
        Ok(())
    }

    /// Give up at the current interrupt without resuming
    pub async fn cancel(&mut self) -> SessionResult {
        if let Status::Done(result) = &self.status {
            return result.clone();
        }
        info!(session = %self.session_id, "session cancelled");
        let state = self.state().await.unwrap_or_default();
        self.finish(state, ExitCode::Cancelled).await
    }

    async fn run(&self, input: Option<Value>) -> Result<RunEnd> {
        let mut stream = self
            .graph
            .graph()
            .stream(input, self.thread_id.clone(), StreamMode::Values);
        let mut last = Value::Null;
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Interrupt { next, values, .. } => return Ok(RunEnd::Interrupted { next, values }),
                StreamEvent::Values { values, .. } => last = values,
                StreamEvent::Updates { .. } => {}
            }
        }
        Ok(RunEnd::Finished(last))
    }

    fn interrupt_prompt(&self, next: &[String], state: &SharedState) -> InterruptPrompt {
        let node = next.first().cloned().unwrap_or_default();
        let prompt = match node.as_str() {
            AWAIT_CLARIFICATION => state
                .clarifying_questions
                .last()
                .map(|q| q.prompt())
                .unwrap_or_default(),
            CONFIRM_DOWNLOAD => match &state.missing_report {
                Some(key) => format!("Filing {key} is not available locally. Download it? (yes/no)"),
                None => "Download the missing filing? (yes/no)".to_string(),
            },
            SELECT_ANALYSIS => topic_menu(&self.services.kpis),
            other => format!("Input needed before '{other}':"),
        };
        InterruptPrompt { node, prompt }
    }

    async fn complete(&mut self, state: SharedState) -> SessionResult {
        let exit_code = if state.query_safe == Some(false) {
            ExitCode::Refused
        } else {
            ExitCode::Success
        };

        let answered = !state.final_answer.trim().is_empty() && state.final_answer.trim() != REFUSAL;
        let persisted = exit_code == ExitCode::Success && answered && state.answer_type != CACHE_TYPE;
        if persisted {
            let key = if state.standalone_query.trim().is_empty() {
                &state.original_query
            } else {
                &state.standalone_query
            };
            self.services.cache.put(
                key,
                CachedAnswer {
                    answer: state.final_answer.clone(),
                    citations: state.citations.clone(),
                },
            );
        }

        let answer_type = if state.answer_type.is_empty() && exit_code == ExitCode::Refused {
            REFUSAL_TYPE.to_string()
        } else {
            state.answer_type.clone()
        };
        let record = ChatRecord::new(&state.original_query, &state.final_answer, answer_type);
        if let Err(err) = self.chat_log.append(&self.session_id, &record).await {
            warn!(session = %self.session_id, error = %err, "could not write chat log");
        }

        self.finish(state, exit_code).await
    }

    async fn finish(&mut self, state: SharedState, exit_code: ExitCode) -> SessionResult {
        if let Some(sink) = &self.trace_sink {
            let edges = self.graph.log_tree().edges();
            if let Err(err) = sink.export(&edges).await {
                warn!(session = %self.session_id, error = %err, "execution tree export failed");
            }
        }
        info!(
            session = %self.session_id,
            exit = %exit_code,
            answer_type = %state.answer_type,
            citations = state.citations.len(),
            "session finished"
        );
        let result = SessionResult {
            answer: state.final_answer.clone(),
            citations: state.citations.clone(),
            follow_ups: state.follow_ups.clone(),
            answer_type: state.answer_type.clone(),
            exit_code,
            state,
        };
        self.status = Status::Done(result.clone());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Refused.code(), 1);
        assert_eq!(ExitCode::RetriesExhausted.code(), 2);
        assert_eq!(ExitCode::Cancelled.code(), 3);
        assert_eq!(ExitCode::Cancelled.to_string(), "cancelled (3)");
    }

    #[test]
    fn test_request_builder() {
        let request = SessionRequest::new("q")
            .with_mode(RunMode::research())
            .with_image("a bar chart")
            .in_session("abc");
        assert!(request.mode.is_research());
        assert_eq!(request.image_description.as_deref(), Some("a bar chart"));
        assert_eq!(request.session_id.as_deref(), Some("abc"));
    }
}
