//! Vector-store access.
//!
//! The workflows only see `Arc<dyn Retriever>`:
//!
//! - [`InMemoryRetriever`] - term-overlap scoring over a fixed corpus
//! - [`HttpRetriever`] - one vector-store server
//! - [`MultiRetriever`] - several retrievers merged by score

pub mod filter;
pub mod http;
pub mod memory;
pub mod multi;

pub use filter::{convert_metadata_to_jmespath, ExtractedMetadata, MetadataFilter, FILTER_KEY_ORDER};
pub use http::HttpRetriever;
pub use memory::InMemoryRetriever;
pub use multi::MultiRetriever;

use async_trait::async_trait;
use serde_json::Value;

use crate::document::Document;
use crate::error::Result;

/// Similarity search over the filings
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` documents ordered by decreasing similarity
    async fn query(&self, text: &str, k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<Document>>;

    /// Store statistics, shape defined by the backend
    async fn statistics(&self) -> Result<Value>;
}
