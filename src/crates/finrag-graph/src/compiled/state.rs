//! Inspecting and patching a thread between runs.

use super::CompiledGraph;
use crate::error::{GraphError, Result};
use chrono::{DateTime, Utc};
use finrag_checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource};
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Current state of a thread and what would run next
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub values: Value,
    pub next: Vec<String>,
    pub step: usize,
    pub retry_counts: BTreeMap<String, u32>,
    /// The run halted at an interrupt before `next`
    pub interrupted: bool,
    pub checkpoint_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<Checkpoint> for StateSnapshot {
    fn from(checkpoint: Checkpoint) -> Self {
        Self {
            next: checkpoint.next_nodes(),
            interrupted: !checkpoint.interrupted_before.is_empty(),
            values: checkpoint.values,
            step: checkpoint.step,
            retry_counts: checkpoint.retry_counts,
            checkpoint_id: checkpoint.id,
            created_at: checkpoint.ts,
        }
    }
}

impl CompiledGraph {
    fn saver(&self) -> Result<&Arc<dyn CheckpointSaver>> {
        self.checkpointer
            .as_ref()
            .ok_or_else(|| GraphError::Validation("graph was compiled without a checkpointer".to_string()))
    }

    /// Latest state of `thread_id`, `None` if the thread never ran
    pub async fn get_state(&self, thread_id: &str) -> Result<Option<StateSnapshot>> {
        let saver = self.saver()?;
        Ok(saver
            .get(&CheckpointConfig::for_thread(thread_id))
            .await?
            .map(StateSnapshot::from))
    }

    /// Merge `patch` into the thread's state through the reducers.
    ///
    /// Pending tasks and the interrupt marker are kept, so the next
    /// `stream(None, ..)` resumes where the run halted.
    pub async fn update_state(&self, thread_id: &str, patch: Value) -> Result<StateSnapshot> {
        let saver = self.saver()?;
        let config = CheckpointConfig::for_thread(thread_id);
        let current = saver
            .get(&config)
            .await?
            .ok_or_else(|| GraphError::NothingToResume(thread_id.to_string()))?;

        let mut next = current.successor();
        self.graph.schema.apply(&mut next.values, &patch)?;

        let metadata = CheckpointMetadata::new()
            .with_source(CheckpointSource::Update)
            .with_step(next.step)
            .with_writes(patch);
        saver.put(&config, next.clone(), metadata).await?;
        Ok(StateSnapshot::from(next))
    }

    /// Snapshots of a thread, newest first
    pub async fn state_history(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<StateSnapshot>> {
        let saver = self.saver()?;
        let mut stream = saver.list(&CheckpointConfig::for_thread(thread_id), limit).await?;
        let mut history = Vec::new();
        while let Some(tuple) = stream.next().await {
            history.push(StateSnapshot::from(tuple?.checkpoint));
        }
        Ok(history)
    }
}
