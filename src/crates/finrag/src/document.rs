//! Retrieved documents.

use serde::{Deserialize, Serialize};

/// Metadata attached to a chunk at ingestion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<String>,
    /// Filing type, e.g. `10-K`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// 10-K item, e.g. `Item 1A`
    #[serde(default, rename = "item_10K", skip_serializing_if = "Option::is_none")]
    pub item_10k: Option<String>,
    #[serde(default)]
    pub is_table_value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_no: Option<u32>,
    /// File name or URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl DocumentMetadata {
    /// Value of a filterable key as text
    pub fn field(&self, key: &str) -> Option<String> {
        match key {
            "company_name" => self.company_name.clone(),
            "year" => self.year.clone(),
            "quarter" => self.quarter.clone(),
            "type" => self.doc_type.clone(),
            "topic" => self.topic.clone(),
            "item_10K" => self.item_10k.clone(),
            "is_table_value" => Some(self.is_table_value.to_string()),
            "page_no" => self.page_no.map(|p| p.to_string()),
            "source" => self.source.clone(),
            _ => None,
        }
    }
}

/// A retrieved unit of text. Immutable once returned by a retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier used in citations
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    /// Similarity to the query, higher is closer
    #[serde(default)]
    pub score: f32,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: DocumentMetadata::default(),
            score: 0.0,
        }
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Whether the document came from web search rather than the filings
    pub fn is_web(&self) -> bool {
        self.id.starts_with(WEB_ID_PREFIX)
    }

    /// One block of prompt context: `[id] (company year type) content`
    pub fn as_context(&self) -> String {
        let meta = &self.metadata;
        let label: Vec<&str> = [&meta.company_name, &meta.year, &meta.doc_type]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .collect();
        if label.is_empty() {
            format!("[{}] {}", self.id, self.content)
        } else {
            format!("[{}] ({}) {}", self.id, label.join(" "), self.content)
        }
    }
}

/// Prefix of identifiers given to web results
pub const WEB_ID_PREFIX: &str = "web:";

/// Render documents as numbered prompt context
pub fn render_context(documents: &[Document]) -> String {
    documents
        .iter()
        .map(Document::as_context)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_uses_store_field_names() {
        let doc: Document = serde_json::from_value(json!({
            "id": "aapl-2022-p28",
            "content": "Total net sales 394,328",
            "metadata": {"company_name": "Apple", "year": "2022", "type": "10-K", "item_10K": "Item 8", "is_table_value": true}
        }))
        .unwrap();
        assert_eq!(doc.metadata.doc_type.as_deref(), Some("10-K"));
        assert_eq!(doc.metadata.field("item_10K").as_deref(), Some("Item 8"));
        assert_eq!(doc.metadata.field("is_table_value").as_deref(), Some("true"));
        assert_eq!(doc.score, 0.0);
    }

    #[test]
    fn test_context_label() {
        let doc = Document::new("d1", "Revenue grew").with_metadata(DocumentMetadata {
            company_name: Some("Apple".into()),
            year: Some("2022".into()),
            ..Default::default()
        });
        assert_eq!(doc.as_context(), "[d1] (Apple 2022) Revenue grew");
        assert!(!doc.is_web());
        assert!(Document::new("web:https://example.com", "x").is_web());
    }
}
