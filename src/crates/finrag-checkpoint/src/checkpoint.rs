//! Checkpoint data structures.
//!
//! A [`Checkpoint`] is the full resumable picture of a thread after one
//! superstep. [`CheckpointMetadata`] records how it came to be, and
//! [`CheckpointConfig`] addresses it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Unique checkpoint identifier
pub type CheckpointId = String;

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// A task scheduled for the next superstep.
///
/// Tasks created by a `Send` carry the partial state that overlays the parent
/// state for that branch only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    /// Node to run
    pub node: String,

    /// Partial state overlaid on the parent state for a `Send` branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<Value>,

    /// Execution-tree id of the task that scheduled this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_trace: Option<String>,
}

impl PendingTask {
    /// Plain task for `node`
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            overlay: None,
            parent_trace: None,
        }
    }

    /// Fan-out task carrying a partial state overlay
    pub fn with_overlay(mut self, overlay: Value) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Record which task scheduled this one
    pub fn with_parent_trace(mut self, parent: impl Into<String>) -> Self {
        self.parent_trace = Some(parent.into());
        self
    }

    /// Whether this task is a `Send` branch
    pub fn is_branch(&self) -> bool {
        self.overlay.is_some()
    }
}

/// Snapshot of a thread after a superstep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version
    pub v: u32,

    /// Checkpoint id (uuid v4)
    pub id: CheckpointId,

    /// Creation time
    pub ts: DateTime<Utc>,

    /// Merged state values
    pub values: Value,

    /// Tasks for the next superstep. Empty once the run has finished.
    #[serde(default)]
    pub pending: Vec<PendingTask>,

    /// Number of completed supersteps
    #[serde(default)]
    pub step: usize,

    /// Failures recorded per node across the whole thread
    #[serde(default)]
    pub retry_counts: BTreeMap<String, u32>,

    /// Nodes the run halted before, when it stopped at an interrupt
    #[serde(default)]
    pub interrupted_before: Vec<String>,
}

impl Checkpoint {
    /// Fresh checkpoint holding `values` with nothing scheduled
    pub fn new(values: Value) -> Self {
        Self {
            v: CHECKPOINT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            ts: Utc::now(),
            values,
            pending: Vec::new(),
            step: 0,
            retry_counts: BTreeMap::new(),
            interrupted_before: Vec::new(),
        }
    }

    /// Set the tasks for the next superstep
    pub fn with_pending(mut self, pending: Vec<PendingTask>) -> Self {
        self.pending = pending;
        self
    }

    /// Set the superstep counter
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    /// Carry failure counters forward
    pub fn with_retry_counts(mut self, retry_counts: BTreeMap<String, u32>) -> Self {
        self.retry_counts = retry_counts;
        self
    }

    /// Mark the checkpoint as halted before `nodes`
    pub fn with_interrupt(mut self, nodes: Vec<String>) -> Self {
        self.interrupted_before = nodes;
        self
    }

    /// Copy with a new id and timestamp, used when forking a successor
    pub fn successor(&self) -> Self {
        let mut next = self.clone();
        next.id = uuid::Uuid::new_v4().to_string();
        next.ts = Utc::now();
        next
    }

    /// Nodes scheduled next, deduplicated in schedule order
    pub fn next_nodes(&self) -> Vec<String> {
        let mut next: Vec<String> = Vec::new();
        for task in &self.pending {
            if !next.contains(&task.node) {
                next.push(task.node.clone());
            }
        }
        next
    }

    /// True when nothing is left to run
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }
}

/// What produced a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Created from run input
    Input,
    /// Created inside the superstep loop
    Loop,
    /// Created by a manual `update_state`
    Update,
}

/// Metadata stored next to a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Source of the checkpoint
    pub source: CheckpointSource,

    /// Superstep that produced it
    pub step: usize,

    /// Per-node patches written during that superstep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writes: Option<Value>,

    /// Free-form extras
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl CheckpointMetadata {
    /// Metadata for an input checkpoint at step 0
    pub fn new() -> Self {
        Self {
            source: CheckpointSource::Input,
            step: 0,
            writes: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_writes(mut self, writes: Value) -> Self {
        self.writes = Some(writes);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl Default for CheckpointMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Addresses a thread, and optionally one checkpoint inside it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub thread_id: Option<String>,
    pub checkpoint_id: Option<CheckpointId>,
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config pointing at the latest checkpoint of `thread_id`
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            checkpoint_id: None,
        }
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: CheckpointId) -> Self {
        self.checkpoint_id = Some(checkpoint_id);
        self
    }
}

/// A checkpoint together with its address and metadata
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub parent_config: Option<CheckpointConfig>,
}
