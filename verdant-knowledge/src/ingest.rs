//! Raw record validation, identifier assignment and batched writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{
    ChunkFailure, Coercion, DEFAULT_CATEGORY, IngestionReport, KnowledgeItem, Rejection,
};
use crate::store::KnowledgeStore;
use crate::{IngestDefaults, KnowledgeSettings};

/// Keys interpreted by the pipeline; any other key is passthrough metadata.
const ID_KEY: &str = "id";
const SPECIES_KEY: &str = "species";
const CATEGORY_KEY: &str = "category";
const TEXT_KEY: &str = "text";
const EMBEDDING_KEY: &str = "embedding";

const DEFAULT_SOURCE: &str = "knowledge_base";
const ID_PREFIX: &str = "kb-";

/// Turns raw records into stored `KnowledgeItem`s.
///
/// Holds no corpus state between calls: every `ingest` is validated and
/// written on its own, and running it twice on the same input replaces
/// items instead of duplicating them.
#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn KnowledgeStore>,
    options: IngestDefaults,
    embedding_dim: Option<usize>,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("store", &self.store.name())
            .field("options", &self.options)
            .field("embedding_dim", &self.embedding_dim)
            .finish()
    }
}

enum ChunkOutcome {
    Written(usize),
    Failed(ChunkFailure),
    Fatal(KnowledgeError),
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn KnowledgeStore>, settings: &KnowledgeSettings) -> Self {
        Self::with_options(store, settings.ingest.clone(), settings.embedding_dim)
    }

    pub fn with_options(
        store: Arc<dyn KnowledgeStore>,
        options: IngestDefaults,
        embedding_dim: Option<usize>,
    ) -> Self {
        let options = IngestDefaults {
            chunk_size: options.chunk_size.max(1),
            max_attempts: options.max_attempts.max(1),
            concurrency: options.concurrency.max(1),
            ..options
        };
        Self {
            store,
            options,
            embedding_dim,
        }
    }

    pub fn options(&self) -> &IngestDefaults {
        &self.options
    }

    /// Validate `records` and write the accepted ones in chunks.
    ///
    /// Invalid records and chunks that keep failing are reported, not
    /// raised. The only error returned is a configuration failure from the
    /// store, which no retry can fix.
    pub async fn ingest(&self, records: &[Value]) -> KnowledgeResult<IngestionReport> {
        let mut report = IngestionReport {
            total_records: records.len(),
            ..Default::default()
        };

        let ingested_at = self
            .options
            .stamp_ingested_at
            .then(|| Utc::now().to_rfc3339());
        let mut expected_dim = self.embedding_dim;
        let mut items: Vec<KnowledgeItem> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (index, raw) in records.iter().enumerate() {
            match normalize_record(index, raw, expected_dim, ingested_at.as_deref()) {
                Ok((item, coercions)) => {
                    if expected_dim.is_none() {
                        expected_dim = item.embedding.as_ref().map(Vec::len);
                    }
                    report.coerced.extend(coercions);
                    report.accepted += 1;
                    match positions.get(&item.id) {
                        Some(&position) => {
                            debug!("Record {} replaces earlier record with id {}", index, item.id);
                            report.duplicates += 1;
                            items[position] = item;
                        }
                        None => {
                            positions.insert(item.id.clone(), items.len());
                            items.push(item);
                        }
                    }
                }
                Err(rejection) => {
                    warn!("Rejected record {}: {}", rejection.index, rejection.reason);
                    report.rejected.push(rejection);
                }
            }
        }

        let mut outcomes = futures::stream::iter(items.chunks(self.options.chunk_size).enumerate())
            .map(|(chunk, batch)| self.write_chunk(chunk, batch))
            .buffered(self.options.concurrency);

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                ChunkOutcome::Written(count) => {
                    report.written += count;
                    report.chunks_written += 1;
                }
                ChunkOutcome::Failed(failure) => report.failed_chunks.push(failure),
                ChunkOutcome::Fatal(err) => return Err(err),
            }
        }

        info!(
            "Ingested {} of {} records into {} ({} rejected, {} failed chunks)",
            report.written,
            report.total_records,
            self.store.name(),
            report.rejected.len(),
            report.failed_chunks.len()
        );

        Ok(report)
    }

    async fn write_chunk(&self, chunk: usize, batch: &[KnowledgeItem]) -> ChunkOutcome {
        let mut attempt = 0;
        let mut delay = self.options.backoff();

        loop {
            attempt += 1;
            match self.store.upsert(batch).await {
                Ok(()) => {
                    debug!("Chunk {} written ({} items, attempt {})", chunk, batch.len(), attempt);
                    return ChunkOutcome::Written(batch.len());
                }
                Err(err @ KnowledgeError::Configuration(_)) => return ChunkOutcome::Fatal(err),
                Err(err) if err.is_retryable() && attempt < self.options.max_attempts => {
                    warn!(
                        "Chunk {} failed on attempt {}/{}: {}; retrying in {:?}",
                        chunk, attempt, self.options.max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay);
                }
                Err(err) => {
                    warn!("Chunk {} failed after {} attempts: {}", chunk, attempt, err);
                    return ChunkOutcome::Failed(ChunkFailure {
                        chunk,
                        ids: batch.iter().map(|item| item.id.clone()).collect(),
                        attempts: attempt,
                        error: err.to_string(),
                    });
                }
            }
        }
    }
}

fn next_delay(delay: Duration) -> Duration {
    delay.saturating_mul(2)
}

/// Stable identifier derived from content, never from the clock.
pub fn derive_id(species: &str, category: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(species.as_bytes());
    hasher.update([0x1f]);
    hasher.update(category.as_bytes());
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    format!("{}{}", ID_PREFIX, &hex::encode(digest)[..24])
}

/// Turn one raw record into an item, or explain why it cannot be one.
pub fn normalize_record(
    index: usize,
    raw: &Value,
    embedding_dim: Option<usize>,
    ingested_at: Option<&str>,
) -> Result<(KnowledgeItem, Vec<Coercion>), Rejection> {
    let Some(fields) = raw.as_object() else {
        return Err(Rejection {
            index,
            id: None,
            reason: "record is not an object".to_string(),
        });
    };
    let supplied_id = fields.get(ID_KEY).and_then(scalar_string);

    let text = match fields.get(TEXT_KEY) {
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Some(Value::String(_)) => return Err(reject(index, supplied_id, "text is empty")),
        None | Some(Value::Null) => return Err(reject(index, supplied_id, "text is missing")),
        Some(_) => return Err(reject(index, supplied_id, "text is not a string")),
    };

    let mut coercions = Vec::new();
    let mut coerce = |field: &str, detail: String| {
        coercions.push(Coercion {
            index,
            field: field.to_string(),
            detail,
        })
    };

    let species = match fields.get(SPECIES_KEY) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(species)) => species.trim().to_string(),
        Some(other) => match scalar_string(other) {
            Some(species) => {
                coerce(SPECIES_KEY, format!("converted {other} to string"));
                species
            }
            None => {
                coerce(SPECIES_KEY, "non-scalar value replaced by empty".to_string());
                String::new()
            }
        },
    };

    let category = match fields.get(CATEGORY_KEY) {
        None | Some(Value::Null) => DEFAULT_CATEGORY.to_string(),
        Some(Value::String(category)) if category.trim().is_empty() => {
            DEFAULT_CATEGORY.to_string()
        }
        Some(Value::String(category)) => category.trim().to_string(),
        Some(other) => match scalar_string(other) {
            Some(category) => {
                coerce(CATEGORY_KEY, format!("converted {other} to string"));
                category
            }
            None => {
                coerce(
                    CATEGORY_KEY,
                    format!("non-scalar value replaced by {DEFAULT_CATEGORY}"),
                );
                DEFAULT_CATEGORY.to_string()
            }
        },
    };

    let id = match fields.get(ID_KEY) {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        None | Some(Value::Null) => derive_id(&species, &category, &text),
        Some(Value::String(_)) => {
            coerce(ID_KEY, "blank id replaced by content hash".to_string());
            derive_id(&species, &category, &text)
        }
        Some(other) => match scalar_string(other) {
            Some(id) => {
                coerce(ID_KEY, format!("converted {other} to string"));
                id
            }
            None => {
                coerce(ID_KEY, "non-scalar id replaced by content hash".to_string());
                derive_id(&species, &category, &text)
            }
        },
    };

    let embedding = match fields.get(EMBEDDING_KEY) {
        None | Some(Value::Null) => None,
        Some(value) => match parse_embedding(value) {
            Some(vector) => match embedding_dim {
                Some(dim) if dim != vector.len() => {
                    coerce(
                        EMBEDDING_KEY,
                        format!("dropped: expected {dim} dimensions, got {}", vector.len()),
                    );
                    None
                }
                _ => Some(vector),
            },
            None => {
                coerce(EMBEDDING_KEY, "dropped: not a numeric array".to_string());
                None
            }
        },
    };

    let mut metadata = passthrough(fields);
    metadata
        .entry("source".to_string())
        .or_insert_with(|| Value::from(DEFAULT_SOURCE));
    if let Some(timestamp) = ingested_at {
        metadata.insert("ingested_at".to_string(), Value::from(timestamp));
    }

    Ok((
        KnowledgeItem {
            id,
            species,
            category,
            text,
            embedding,
            metadata,
        },
        coercions,
    ))
}

fn reject(index: usize, id: Option<String>, reason: &str) -> Rejection {
    Rejection {
        index,
        id,
        reason: reason.to_string(),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

fn parse_embedding(value: &Value) -> Option<Vec<f32>> {
    let values = value.as_array()?;
    if values.is_empty() {
        return None;
    }
    values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn passthrough(fields: &Map<String, Value>) -> std::collections::BTreeMap<String, Value> {
    fields
        .iter()
        .filter(|(key, _)| {
            !matches!(
                key.as_str(),
                ID_KEY | SPECIES_KEY | CATEGORY_KEY | TEXT_KEY | EMBEDDING_KEY
            )
        })
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
