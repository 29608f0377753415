//! Fan a query over several retrievers.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use super::{MetadataFilter, Retriever};
use crate::document::Document;
use crate::error::{FinragError, Result};

/// Queries every inner retriever concurrently and keeps the best `k` by score.
///
/// A failing retriever is logged and skipped; the query fails only when all
/// of them fail, with the first error.
#[derive(Clone)]
pub struct MultiRetriever {
    retrievers: Vec<Arc<dyn Retriever>>,
}

impl MultiRetriever {
    pub fn new(retrievers: Vec<Arc<dyn Retriever>>) -> Self {
        Self { retrievers }
    }

    pub fn len(&self) -> usize {
        self.retrievers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retrievers.is_empty()
    }
}

#[async_trait]
impl Retriever for MultiRetriever {
    async fn query(&self, text: &str, k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<Document>> {
        let results = join_all(self.retrievers.iter().map(|r| r.query(text, k, filter))).await;

        let mut first_error: Option<FinragError> = None;
        let mut succeeded = 0;
        let mut merged: Vec<Document> = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(documents) => {
                    succeeded += 1;
                    merged.extend(documents);
                }
                Err(err) => {
                    warn!(retriever = index, error = %err, "retriever failed, using the others");
                    first_error.get_or_insert(err);
                }
            }
        }
        if succeeded == 0 {
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        merged.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut seen = HashSet::new();
        merged.retain(|doc| seen.insert(doc.id.clone()));
        merged.truncate(k);
        Ok(merged)
    }

    async fn statistics(&self) -> Result<Value> {
        let results = join_all(self.retrievers.iter().map(|r| r.statistics())).await;
        let stats: Vec<Value> = results
            .into_iter()
            .map(|r| r.unwrap_or_else(|e| json!({"error": e.to_string()})))
            .collect();
        Ok(json!({"backend": "multi", "retrievers": stats}))
    }
}
