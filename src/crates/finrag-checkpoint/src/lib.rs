//! # finrag-checkpoint - Persisted snapshots of graph runs
//!
//! Checkpoints are written by the graph executor after every superstep. They
//! capture everything needed to stop a run at an interrupt and pick it up
//! later from a different call site:
//!
//! - the merged state values after the superstep
//! - the tasks scheduled for the next superstep, including `Send` overlays
//! - per-node failure counters, which only ever grow within a thread
//! - the interrupt marker, when the run halted before a node
//!
//! ```text
//!   superstep N            superstep N+1
//!  ┌──────────┐  put()   ┌──────────────┐  get_tuple()  ┌──────────────┐
//!  │ executor │ ───────▶ │ CheckpointSaver │ ◀────────── │ resume / get_state │
//!  └──────────┘          └──────────────┘               └──────────────┘
//! ```
//!
//! The crate ships [`InMemoryCheckpointSaver`]. Durable backends implement
//! [`CheckpointSaver`].
//!
//! # Example
//!
//! ```rust
//! use finrag_checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, InMemoryCheckpointSaver};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = InMemoryCheckpointSaver::new();
//! let config = CheckpointConfig::for_thread("session-1");
//!
//! let checkpoint = Checkpoint::new(json!({"original_query": "What was Apple's revenue in 2022?"}));
//! saver.put(&config, checkpoint, CheckpointMetadata::new()).await?;
//!
//! let latest = saver.get(&config).await?.expect("checkpoint stored");
//! assert_eq!(latest.step, 0);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointSource,
    CheckpointTuple, PendingTask,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use traits::{CheckpointSaver, CheckpointStream};
