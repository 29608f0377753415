//! In-memory retriever.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::{MetadataFilter, Retriever};
use crate::document::Document;
use crate::error::Result;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "by", "did", "do", "does", "for", "from", "how", "in", "is",
    "it", "its", "of", "on", "or", "s", "the", "to", "was", "were", "what", "which", "with",
];

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Scores documents by the share of query terms they contain
#[derive(Debug, Clone, Default)]
pub struct InMemoryRetriever {
    documents: Arc<RwLock<Vec<Document>>>,
}

impl InMemoryRetriever {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: Arc::new(RwLock::new(documents)),
        }
    }

    pub fn insert(&self, document: Document) {
        self.documents.write().push(document);
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn query(&self, text: &str, k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<Document>> {
        let query_terms = terms(text);
        if query_terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let documents = self.documents.read();
        let mut scored: Vec<(f32, usize)> = documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| filter.map_or(true, |f| f.matches(&doc.metadata)))
            .filter_map(|(index, doc)| {
                let doc_terms = terms(&doc.content);
                let hits = query_terms.iter().filter(|t| doc_terms.contains(*t)).count();
                (hits > 0).then(|| (hits as f32 / query_terms.len() as f32, index))
            })
            .collect();

        // stable on ties: corpus order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, index)| documents[index].clone().with_score(score))
            .collect())
    }

    async fn statistics(&self) -> Result<Value> {
        let documents = self.documents.read();
        let mut companies: BTreeMap<String, usize> = BTreeMap::new();
        for doc in documents.iter() {
            if let Some(company) = &doc.metadata.company_name {
                *companies.entry(company.clone()).or_default() += 1;
            }
        }
        Ok(json!({
            "backend": "memory",
            "documents": documents.len(),
            "companies": companies,
        }))
    }
}
