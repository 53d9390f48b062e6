use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category assigned when a raw record does not carry one.
pub const DEFAULT_CATEGORY: &str = "general";

/// A single care-tip document.
///
/// Items are immutable once built by the ingestion pipeline; writing an item
/// with an existing `id` replaces the stored version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    /// Plant species the tip concerns; empty for species-agnostic tips.
    #[serde(default)]
    pub species: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Auxiliary attributes (source, sponsor, ingestion time). Never ranked on.
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl KnowledgeItem {
    pub fn new(
        id: impl Into<String>,
        species: impl Into<String>,
        category: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            species: species.into(),
            category: category.into(),
            text: text.into(),
            embedding: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `source` metadata, if the item carries one.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

/// Read-path request handed to a `KnowledgeStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreQuery {
    pub text: String,
    pub species: Option<String>,
    pub limit: usize,
}

impl StoreQuery {
    pub fn new(text: impl Into<String>, species: Option<&str>, limit: usize) -> Self {
        Self {
            text: text.into(),
            species: species
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            limit,
        }
    }
}

/// A candidate ranked by a store, before it is shaped into a `QueryResult`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item: KnowledgeItem,
    pub score: f32,
}

/// One entry of a retrieval answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub item: KnowledgeItem,
    /// Non-negative; the scale depends on the backend that ranked the item.
    pub relevance_score: f32,
    /// 0-based position in the returned ordering.
    pub rank: usize,
}

impl QueryResult {
    /// Caller-facing projection without embedding or metadata.
    pub fn to_tip(&self) -> RetrievedTip {
        RetrievedTip {
            id: self.item.id.clone(),
            species: self.item.species.clone(),
            category: self.item.category.clone(),
            text: self.item.text.clone(),
            relevance_score: self.relevance_score,
        }
    }
}

/// Retrieval output as consumed by a conversational assistant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedTip {
    pub id: String,
    pub species: String,
    pub category: String,
    pub text: String,
    pub relevance_score: f32,
}

/// The answer to one `retrieve` call.
///
/// `degraded` is set when the primary store was unavailable and the local
/// fallback answered instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Retrieval {
    pub results: Vec<QueryResult>,
    pub backend: String,
    pub degraded: bool,
}

impl Retrieval {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn tips(&self) -> Vec<RetrievedTip> {
        self.results.iter().map(QueryResult::to_tip).collect()
    }
}

impl IntoIterator for Retrieval {
    type Item = QueryResult;
    type IntoIter = std::vec::IntoIter<QueryResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// A raw record that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Position in the input sequence.
    pub index: usize,
    pub id: Option<String>,
    pub reason: String,
}

/// A field that was defaulted or coerced while normalizing a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coercion {
    pub index: usize,
    pub field: String,
    pub detail: String,
}

/// A chunk whose write still failed after every retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    /// 0-based chunk position within the ingest call.
    pub chunk: usize,
    pub ids: Vec<String>,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub total_records: usize,
    /// Records that passed validation.
    pub accepted: usize,
    pub rejected: Vec<Rejection>,
    pub coerced: Vec<Coercion>,
    /// Accepted records whose id repeated an earlier record of the same call.
    pub duplicates: usize,
    /// Items confirmed written by the store.
    pub written: usize,
    pub chunks_written: usize,
    pub failed_chunks: Vec<ChunkFailure>,
}

impl IngestionReport {
    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}
