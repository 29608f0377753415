//! Deterministic, recording test double.
//!
//! Responses are scripted per task name and consumed in order. The last
//! scripted step of a task repeats forever, so a test only scripts the calls
//! whose answers change. Every request is recorded for later assertions.
//!
//! ```rust
//! use llm::{ScriptedLlm, StructuredLlmExt};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let llm = ScriptedLlm::new()
//!     .with_response("grade", json!({"binary_score": "no"}))
//!     .with_response("grade", json!({"binary_score": "yes"}));
//!
//! let first: serde_json::Value = llm.structured("grade", "sys", "a").await.unwrap();
//! let second: serde_json::Value = llm.structured("grade", "sys", "b").await.unwrap();
//! let third: serde_json::Value = llm.structured("grade", "sys", "c").await.unwrap();
//! assert_eq!(first["binary_score"], "no");
//! assert_eq!(second["binary_score"], "yes");
//! assert_eq!(third["binary_score"], "yes");
//! assert_eq!(llm.call_count("grade"), 3);
//! # }
//! ```

use crate::error::{LlmError, Result};
use crate::structured::{StructuredLlm, StructuredRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Computes the answer of one scripted step from the request
pub type Responder = Arc<dyn Fn(&StructuredRequest) -> Result<Value> + Send + Sync>;

#[derive(Default)]
struct Script {
    steps: HashMap<String, VecDeque<Responder>>,
    calls: Vec<StructuredRequest>,
}

/// Scripted [`StructuredLlm`]
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    script: Arc<Mutex<Script>>,
}

impl std::fmt::Debug for ScriptedLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let script = self.script.lock();
        let mut tasks: Vec<&String> = script.steps.keys().collect();
        tasks.sort();
        f.debug_struct("ScriptedLlm")
            .field("tasks", &tasks)
            .field("calls", &script.calls.len())
            .finish()
    }
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fixed answer for `task`
    pub fn with_response(self, task: &str, value: Value) -> Self {
        self.with_handler(task, move |_| Ok(value.clone()))
    }

    /// Append a failing step for `task`
    pub fn with_failure<F>(self, task: &str, make_error: F) -> Self
    where
        F: Fn() -> LlmError + Send + Sync + 'static,
    {
        self.with_handler(task, move |_| Err(make_error()))
    }

    /// Append a step whose answer depends on the request
    pub fn with_handler<F>(self, task: &str, handler: F) -> Self
    where
        F: Fn(&StructuredRequest) -> Result<Value> + Send + Sync + 'static,
    {
        self.push(task, Arc::new(handler));
        self
    }

    /// Same as the builder methods, on a shared instance
    pub fn push(&self, task: &str, responder: Responder) {
        self.script
            .lock()
            .steps
            .entry(task.to_string())
            .or_default()
            .push_back(responder);
    }

    /// Every recorded request, in call order
    pub fn calls(&self) -> Vec<StructuredRequest> {
        self.script.lock().calls.clone()
    }

    /// Recorded requests of one task
    pub fn calls_for(&self, task: &str) -> Vec<StructuredRequest> {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|call| call.task == task)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, task: &str) -> usize {
        self.script.lock().calls.iter().filter(|call| call.task == task).count()
    }

    /// Task names in call order
    pub fn call_sequence(&self) -> Vec<String> {
        self.script.lock().calls.iter().map(|call| call.task.clone()).collect()
    }

    fn next_responder(&self, request: &StructuredRequest) -> Option<Responder> {
        let mut script = self.script.lock();
        script.calls.push(request.clone());
        let steps = script.steps.get_mut(&request.task)?;
        if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        }
    }
}

#[async_trait]
impl StructuredLlm for ScriptedLlm {
    async fn invoke(&self, request: StructuredRequest) -> Result<Value> {
        // the lock is released before the responder runs
        let responder = self.next_responder(&request);
        match responder {
            Some(responder) => responder(&request),
            None => Err(LlmError::Unscripted(format!("task '{}'", request.task))),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
