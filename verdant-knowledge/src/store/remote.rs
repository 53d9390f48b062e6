//! Adapter from `KnowledgeStore` to an external vector database.
//!
//! The database embeds documents and runs the nearest-neighbour search; this
//! module only maps items to documents + metadata and bounds every call with
//! a timeout. The collection is resolved lazily: writes get-or-create it,
//! reads treat a missing collection as an empty corpus.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::KnowledgeStore;
use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{DEFAULT_CATEGORY, KnowledgeItem, ScoredItem, StoreQuery};

/// Metadata keys the adapter owns; everything else is passthrough.
const SPECIES_KEY: &str = "species";
const CATEGORY_KEY: &str = "category";

const GET_ALL_PAGE: usize = 100;

/// Opaque reference to a remote collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    pub id: String,
    pub name: String,
}

/// One batched write: parallel arrays, as vector databases expect them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertBatch {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<BTreeMap<String, Value>>,
    /// Present only when every item of the batch carries an embedding.
    /// `to_batches` never mixes embedded and plain items in one batch.
    pub embeddings: Option<Vec<Vec<f32>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorQuery {
    pub text: String,
    pub n_results: usize,
}

/// A nearest-neighbour hit, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub document: String,
    pub metadata: BTreeMap<String, Value>,
    pub distance: f32,
}

/// A stored document as returned by a listing call. `document` is empty
/// when the store holds no text for the id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub document: String,
    pub metadata: BTreeMap<String, Value>,
}

/// The capability set the adapter needs from a vector database.
#[async_trait::async_trait]
pub trait VectorBackend: Send + Sync {
    /// `Ok(None)` when no collection with that name exists.
    async fn get_collection(&self, name: &str) -> KnowledgeResult<Option<CollectionHandle>>;

    async fn create_collection(
        &self,
        name: &str,
        metadata: BTreeMap<String, Value>,
    ) -> KnowledgeResult<CollectionHandle>;

    async fn delete_collection(&self, name: &str) -> KnowledgeResult<()>;

    async fn upsert(&self, collection: &CollectionHandle, batch: UpsertBatch)
    -> KnowledgeResult<()>;

    async fn query(
        &self,
        collection: &CollectionHandle,
        query: VectorQuery,
    ) -> KnowledgeResult<Vec<QueryMatch>>;

    async fn list(
        &self,
        collection: &CollectionHandle,
        offset: usize,
        limit: usize,
    ) -> KnowledgeResult<Vec<StoredDocument>>;

    async fn count(&self, collection: &CollectionHandle) -> KnowledgeResult<usize>;
}

pub struct RemoteVectorStore {
    backend: Arc<dyn VectorBackend>,
    collection_name: String,
    timeout: Duration,
    collection: Mutex<Option<CollectionHandle>>,
}

impl std::fmt::Debug for RemoteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteVectorStore")
            .field("collection_name", &self.collection_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteVectorStore {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        collection_name: &str,
        timeout: Duration,
    ) -> KnowledgeResult<Self> {
        let collection_name = collection_name.trim();
        if collection_name.is_empty() {
            return Err(KnowledgeError::Configuration(
                "collection name is empty".to_string(),
            ));
        }
        Ok(Self {
            backend,
            collection_name: collection_name.to_string(),
            timeout,
            collection: Mutex::new(None),
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    async fn timed<T, F>(&self, call: F) -> KnowledgeResult<T>
    where
        F: Future<Output = KnowledgeResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(KnowledgeError::Timeout(self.timeout)),
        }
    }

    /// Ask the backend for the collection. A `NotFound` answer means the
    /// collection is absent, not that the call failed.
    async fn fetch_collection(&self) -> KnowledgeResult<Option<CollectionHandle>> {
        match self
            .timed(self.backend.get_collection(&self.collection_name))
            .await
        {
            Ok(found) => Ok(found),
            Err(KnowledgeError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Fetch the collection, creating it when it does not exist yet.
    /// Only the write path calls this.
    async fn collection(&self) -> KnowledgeResult<CollectionHandle> {
        let mut cached = self.collection.lock().await;
        if let Some(handle) = cached.as_ref() {
            return Ok(handle.clone());
        }

        let handle = match self.fetch_collection().await? {
            Some(handle) => handle,
            None => {
                let mut metadata = BTreeMap::new();
                metadata.insert(
                    "description".to_string(),
                    Value::from("Plant care tips and knowledge base"),
                );
                let handle = self
                    .timed(
                        self.backend
                            .create_collection(&self.collection_name, metadata),
                    )
                    .await?;
                info!("Created collection {}", self.collection_name);
                handle
            }
        };

        *cached = Some(handle.clone());
        Ok(handle)
    }

    /// Read-only lookup: a missing collection is `None` and is never
    /// created here.
    async fn existing_collection(&self) -> KnowledgeResult<Option<CollectionHandle>> {
        let mut cached = self.collection.lock().await;
        if let Some(handle) = cached.as_ref() {
            return Ok(Some(handle.clone()));
        }

        let found = self.fetch_collection().await?;
        if found.is_none() {
            debug!("Collection {} does not exist yet", self.collection_name);
        }
        cached.clone_from(&found);
        Ok(found)
    }

    async fn forget_collection(&self) {
        *self.collection.lock().await = None;
    }
}

/// Build the parallel-array writes for `items`.
///
/// Consecutive items that all carry an embedding share a batch that sends
/// them; plain items go in batches the store embeds itself. Whether an
/// item's embedding is sent therefore never depends on its neighbours, and
/// the batches keep the input order.
pub fn to_batches(items: &[KnowledgeItem]) -> Vec<UpsertBatch> {
    let mut batches = Vec::new();
    let mut start = 0;
    while start < items.len() {
        let embedded = items[start].embedding.is_some();
        let end = items[start..]
            .iter()
            .position(|item| item.embedding.is_some() != embedded)
            .map_or(items.len(), |offset| start + offset);
        batches.push(to_batch(&items[start..end], embedded));
        start = end;
    }
    batches
}

fn to_batch(items: &[KnowledgeItem], embedded: bool) -> UpsertBatch {
    let mut batch = UpsertBatch::default();

    for item in items {
        batch.ids.push(item.id.clone());
        batch.documents.push(item.text.clone());

        let mut metadata: BTreeMap<String, Value> = item
            .metadata
            .iter()
            .map(|(key, value)| (key.clone(), scalar_metadata(value)))
            .collect();
        metadata.insert(SPECIES_KEY.to_string(), Value::from(item.species.clone()));
        metadata.insert(CATEGORY_KEY.to_string(), Value::from(item.category.clone()));
        batch.metadatas.push(metadata);
    }

    if embedded {
        batch.embeddings = Some(
            items
                .iter()
                .filter_map(|item| item.embedding.clone())
                .collect(),
        );
    }

    batch
}

/// Vector databases accept only scalar metadata values.
fn scalar_metadata(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::from(value.to_string()),
        other => other.clone(),
    }
}

/// Rebuild an item from a stored document and its metadata.
pub fn to_item(
    id: String,
    document: String,
    mut metadata: BTreeMap<String, Value>,
) -> KnowledgeItem {
    let species = take_string(&mut metadata, SPECIES_KEY).unwrap_or_default();
    let category =
        take_string(&mut metadata, CATEGORY_KEY).unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
    KnowledgeItem {
        id,
        species,
        category,
        text: document,
        embedding: None,
        metadata,
    }
}

fn take_string(metadata: &mut BTreeMap<String, Value>, key: &str) -> Option<String> {
    match metadata.remove(key) {
        Some(Value::String(value)) => Some(value),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

/// Cosine-style distances map to `1 - distance`, floored at zero.
pub fn relevance_from_distance(distance: f32) -> f32 {
    (1.0 - distance).max(0.0)
}

#[async_trait::async_trait]
impl KnowledgeStore for RemoteVectorStore {
    fn name(&self) -> &'static str {
        "chroma"
    }

    async fn upsert(&self, items: &[KnowledgeItem]) -> KnowledgeResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        let collection = self.collection().await?;
        for batch in to_batches(items) {
            self.timed(self.backend.upsert(&collection, batch)).await?;
        }
        Ok(())
    }

    async fn query(&self, query: &StoreQuery) -> KnowledgeResult<Vec<ScoredItem>> {
        let Some(collection) = self.existing_collection().await? else {
            return Ok(Vec::new());
        };
        let text = match &query.species {
            Some(species) => format!("{} {}", species, query.text.trim()),
            None => query.text.trim().to_string(),
        };
        let matches = self
            .timed(self.backend.query(
                &collection,
                VectorQuery {
                    text,
                    n_results: query.limit,
                },
            ))
            .await?;

        Ok(matches
            .into_iter()
            .map(|hit| ScoredItem {
                score: relevance_from_distance(hit.distance),
                item: to_item(hit.id, hit.document, hit.metadata),
            })
            .collect())
    }

    async fn get_all(&self) -> KnowledgeResult<Vec<KnowledgeItem>> {
        let Some(collection) = self.existing_collection().await? else {
            return Ok(Vec::new());
        };
        let mut items = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .timed(self.backend.list(&collection, offset, GET_ALL_PAGE))
                .await?;
            let fetched = page.len();
            offset += fetched;
            // Documents stored without text cannot be valid items
            items.extend(
                page.into_iter()
                    .filter(|doc| !doc.document.trim().is_empty())
                    .map(|doc| to_item(doc.id, doc.document, doc.metadata)),
            );
            if fetched < GET_ALL_PAGE {
                break;
            }
        }
        Ok(items)
    }

    async fn count(&self) -> KnowledgeResult<usize> {
        let Some(collection) = self.existing_collection().await? else {
            return Ok(0);
        };
        self.timed(self.backend.count(&collection)).await
    }

    async fn reset(&self) -> KnowledgeResult<()> {
        match self
            .timed(self.backend.delete_collection(&self.collection_name))
            .await
        {
            Ok(()) | Err(KnowledgeError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        self.forget_collection().await;
        info!("Deleted collection {}", self.collection_name);
        Ok(())
    }
}
