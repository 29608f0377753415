//! The [`CheckpointSaver`] trait implemented by checkpoint backends.

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple};
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Stream of checkpoint tuples, newest first
pub type CheckpointStream = Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send>>;

/// Storage backend for checkpoints.
///
/// Implementations must be safe to share between concurrently running
/// sessions; each session writes only to its own thread.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch a checkpoint tuple.
    ///
    /// Without a `checkpoint_id` in `config` the latest checkpoint of the
    /// thread is returned.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// Fetch just the checkpoint
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// List the checkpoints of a thread, newest first
    async fn list(
        &self,
        config: &CheckpointConfig,
        limit: Option<usize>,
    ) -> Result<CheckpointStream>;

    /// Store a checkpoint and return the config addressing it
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    /// Drop every checkpoint of a thread
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
