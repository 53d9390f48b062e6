#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use verdant_knowledge::store::{
    CollectionHandle, QueryMatch, StoredDocument, UpsertBatch, VectorBackend, VectorQuery,
};
use verdant_knowledge::{
    IngestDefaults, KnowledgeError, KnowledgeItem, KnowledgeResult, KnowledgeStore,
    LocalLexicalStore, ScoredItem, StoreQuery,
};

/// Ingest options with near-zero backoff so retry tests stay fast.
pub fn fast_options(chunk_size: usize) -> IngestDefaults {
    IngestDefaults {
        chunk_size,
        max_attempts: 3,
        backoff_ms: 1,
        concurrency: 1,
        stamp_ingested_at: false,
    }
}

pub fn tip_records(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "species": format!("Species {}", i % 4),
                "category": if i % 2 == 0 { "watering" } else { "lighting" },
                "text": format!("Care tip number {i} for this plant."),
                "source": "plant_care_dataset"
            })
        })
        .collect()
}

pub fn scenario_corpus() -> Vec<KnowledgeItem> {
    vec![
        KnowledgeItem::new(
            "snake-water",
            "Snake Plant",
            "watering",
            "Water Snake Plant every 2 weeks.",
        ),
        KnowledgeItem::new(
            "pothos-light",
            "Pothos",
            "lighting",
            "Pothos tolerates low light.",
        ),
    ]
}

/// A local store whose writes fail on demand.
///
/// Failures are keyed by the first id of a chunk so a test can target one
/// chunk regardless of call order.
pub struct FlakyStore {
    inner: LocalLexicalStore,
    failures: Mutex<HashMap<String, (u32, KnowledgeErrorKind)>>,
    pub attempts: AtomicUsize,
    pub received: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
pub enum KnowledgeErrorKind {
    Unavailable,
    Configuration,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: LocalLexicalStore::in_memory(),
            failures: Mutex::new(HashMap::new()),
            attempts: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
        }
    }

    /// Fail the chunk starting with `first_id` `times` times.
    pub fn fail_chunk(&self, first_id: &str, times: u32, kind: KnowledgeErrorKind) {
        self.failures
            .lock()
            .unwrap()
            .insert(first_id.to_string(), (times, kind));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl KnowledgeStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn upsert(&self, items: &[KnowledgeItem]) -> KnowledgeResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let injected = {
            let mut failures = self.failures.lock().unwrap();
            match items.first().and_then(|item| failures.get_mut(&item.id)) {
                Some((remaining, kind)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*kind)
                }
                _ => None,
            }
        };
        match injected {
            Some(KnowledgeErrorKind::Unavailable) => Err(KnowledgeError::StoreUnavailable(
                "connection reset".to_string(),
            )),
            Some(KnowledgeErrorKind::Configuration) => Err(KnowledgeError::Configuration(
                "bad credentials".to_string(),
            )),
            None => {
                self.received.fetch_add(1, Ordering::SeqCst);
                self.inner.upsert(items).await
            }
        }
    }

    async fn query(&self, query: &StoreQuery) -> KnowledgeResult<Vec<ScoredItem>> {
        self.inner.query(query).await
    }

    async fn get_all(&self) -> KnowledgeResult<Vec<KnowledgeItem>> {
        self.inner.get_all().await
    }

    async fn count(&self) -> KnowledgeResult<usize> {
        self.inner.count().await
    }

    async fn reset(&self) -> KnowledgeResult<()> {
        self.inner.reset().await
    }
}

#[derive(Debug, Clone)]
struct FakeDocument {
    id: String,
    document: String,
    metadata: BTreeMap<String, Value>,
}

/// In-process stand-in for a vector database.
///
/// Query hits come back in insertion order with distances 0.1, 0.2, ...
#[derive(Default)]
pub struct FakeVectorBackend {
    collections: Mutex<HashMap<String, CollectionHandle>>,
    documents: Mutex<Vec<FakeDocument>>,
    pub created: AtomicUsize,
    pub unavailable: AtomicBool,
    /// Answer lookups of a missing collection with `NotFound` instead of
    /// `Ok(None)`, as some servers do.
    pub missing_as_not_found: AtomicBool,
    pub query_delay: Mutex<Option<Duration>>,
    pub last_query: Mutex<Option<VectorQuery>>,
    pub upserts: Mutex<Vec<UpsertBatch>>,
}

impl FakeVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(name: &str) -> Self {
        let backend = Self::default();
        backend.collections.lock().unwrap().insert(
            name.to_string(),
            CollectionHandle {
                id: format!("{name}-id"),
                name: name.to_string(),
            },
        );
        backend
    }

    pub fn set_unavailable(&self, value: bool) {
        self.unavailable.store(value, Ordering::SeqCst);
    }

    pub fn set_missing_as_not_found(&self, value: bool) {
        self.missing_as_not_found.store(value, Ordering::SeqCst);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = Some(delay);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn last_query_text(&self) -> Option<String> {
        self.last_query
            .lock()
            .unwrap()
            .as_ref()
            .map(|query| query.text.clone())
    }

    pub fn document_count(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .map(|doc| doc.id.clone())
            .collect()
    }

    /// Ids whose embedding was sent in some upsert.
    pub fn embedded_ids(&self) -> BTreeSet<String> {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .filter(|batch| batch.embeddings.is_some())
            .flat_map(|batch| batch.ids.iter().cloned())
            .collect()
    }

    fn check_available(&self) -> KnowledgeResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KnowledgeError::StoreUnavailable(
                "connection refused".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorBackend for FakeVectorBackend {
    async fn get_collection(&self, name: &str) -> KnowledgeResult<Option<CollectionHandle>> {
        self.check_available()?;
        let found = self.collections.lock().unwrap().get(name).cloned();
        if found.is_none() && self.missing_as_not_found.load(Ordering::SeqCst) {
            return Err(KnowledgeError::NotFound(format!("collection {name}")));
        }
        Ok(found)
    }

    async fn create_collection(
        &self,
        name: &str,
        _metadata: BTreeMap<String, Value>,
    ) -> KnowledgeResult<CollectionHandle> {
        self.check_available()?;
        self.created.fetch_add(1, Ordering::SeqCst);
        let handle = CollectionHandle {
            id: format!("{name}-id"),
            name: name.to_string(),
        };
        self.collections
            .lock()
            .unwrap()
            .insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    async fn delete_collection(&self, name: &str) -> KnowledgeResult<()> {
        self.check_available()?;
        match self.collections.lock().unwrap().remove(name) {
            Some(_) => {
                self.documents.lock().unwrap().clear();
                Ok(())
            }
            None => Err(KnowledgeError::NotFound(name.to_string())),
        }
    }

    async fn upsert(
        &self,
        _collection: &CollectionHandle,
        batch: UpsertBatch,
    ) -> KnowledgeResult<()> {
        self.check_available()?;
        let mut documents = self.documents.lock().unwrap();
        for ((id, document), metadata) in batch
            .ids
            .iter()
            .zip(batch.documents.iter())
            .zip(batch.metadatas.iter())
        {
            let doc = FakeDocument {
                id: id.clone(),
                document: document.clone(),
                metadata: metadata.clone(),
            };
            match documents.iter_mut().find(|existing| existing.id == *id) {
                Some(existing) => *existing = doc,
                None => documents.push(doc),
            }
        }
        drop(documents);
        self.upserts.lock().unwrap().push(batch);
        Ok(())
    }

    async fn query(
        &self,
        _collection: &CollectionHandle,
        query: VectorQuery,
    ) -> KnowledgeResult<Vec<QueryMatch>> {
        let delay = *self.query_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;
        *self.last_query.lock().unwrap() = Some(query.clone());

        let documents = self.documents.lock().unwrap();
        Ok(documents
            .iter()
            .take(query.n_results)
            .enumerate()
            .map(|(i, doc)| QueryMatch {
                id: doc.id.clone(),
                document: doc.document.clone(),
                metadata: doc.metadata.clone(),
                distance: 0.1 * (i as f32 + 1.0),
            })
            .collect())
    }

    async fn list(
        &self,
        _collection: &CollectionHandle,
        offset: usize,
        limit: usize,
    ) -> KnowledgeResult<Vec<StoredDocument>> {
        self.check_available()?;
        let documents = self.documents.lock().unwrap();
        Ok(documents
            .iter()
            .skip(offset)
            .take(limit)
            .map(|doc| StoredDocument {
                id: doc.id.clone(),
                document: doc.document.clone(),
                metadata: doc.metadata.clone(),
            })
            .collect())
    }

    async fn count(&self, _collection: &CollectionHandle) -> KnowledgeResult<usize> {
        self.check_available()?;
        Ok(self.documents.lock().unwrap().len())
    }
}
