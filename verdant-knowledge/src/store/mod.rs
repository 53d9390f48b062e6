//! Corpus persistence and querying.
//!
//! `KnowledgeStore` is the only seam the ingestion pipeline and retrieval
//! engine talk to. Which implementation backs a process is decided once, by
//! configuration, in [`open_stores`].

use std::sync::Arc;

use tracing::info;

use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{KnowledgeItem, ScoredItem, StoreQuery};
use crate::paths::snapshot_path;
use crate::{ChromaCredentials, KnowledgeBackend, KnowledgeSettings};

pub mod chroma;
pub mod lexical;
pub mod remote;

pub use chroma::ChromaClient;
pub use lexical::{CorpusSnapshot, LocalLexicalStore, SNAPSHOT_VERSION, export_snapshot};
pub use remote::{
    CollectionHandle, QueryMatch, RemoteVectorStore, StoredDocument, UpsertBatch, VectorBackend,
    VectorQuery,
};

#[async_trait::async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Short backend name used in logs and retrieval output.
    fn name(&self) -> &'static str;

    /// Insert or replace every item by `id`. A call is atomic from the
    /// store's point of view: either the whole slice is written or none.
    async fn upsert(&self, items: &[KnowledgeItem]) -> KnowledgeResult<()>;

    /// Ranked candidates for `query`, best first, at most `query.limit`.
    async fn query(&self, query: &StoreQuery) -> KnowledgeResult<Vec<ScoredItem>>;

    /// Every item in the corpus.
    async fn get_all(&self) -> KnowledgeResult<Vec<KnowledgeItem>>;

    async fn count(&self) -> KnowledgeResult<usize>;

    /// Delete the whole corpus.
    async fn reset(&self) -> KnowledgeResult<()>;
}

/// The stores a process runs with: the configured primary and, when
/// degraded mode is enabled, a local snapshot to answer from.
#[derive(Clone)]
pub struct StoreSet {
    pub primary: Arc<dyn KnowledgeStore>,
    pub fallback: Option<Arc<dyn KnowledgeStore>>,
}

impl std::fmt::Debug for StoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSet")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|store| store.name()))
            .finish()
    }
}

/// Build the stores selected by `settings`.
///
/// # Errors
///
/// Returns `KnowledgeError::Configuration` when the remote backend is
/// selected without credentials; this is never retried.
pub async fn open_stores(
    settings: &KnowledgeSettings,
    credentials: Option<ChromaCredentials>,
) -> KnowledgeResult<StoreSet> {
    match settings.backend {
        KnowledgeBackend::Local => {
            let path = snapshot_path(settings)?;
            let store = LocalLexicalStore::open(&path).await?;
            info!("Local knowledge store opened at {:?}", path);
            Ok(StoreSet {
                primary: Arc::new(store),
                fallback: None,
            })
        }
        KnowledgeBackend::Chroma => {
            let credentials = credentials.ok_or_else(|| {
                KnowledgeError::Configuration("chroma backend requires credentials".to_string())
            })?;
            let client = ChromaClient::new(&settings.chroma_url, credentials)?;
            let remote = RemoteVectorStore::new(
                Arc::new(client),
                &settings.collection,
                settings.request_timeout(),
            )?;
            info!(
                "Remote knowledge store configured (collection: {})",
                settings.collection
            );

            let fallback: Option<Arc<dyn KnowledgeStore>> = if settings.fallback_to_local {
                let path = snapshot_path(settings)?;
                let store = LocalLexicalStore::open(&path).await?;
                info!("Local fallback snapshot loaded from {:?}", path);
                Some(Arc::new(store))
            } else {
                None
            };

            Ok(StoreSet {
                primary: Arc::new(remote),
                fallback,
            })
        }
    }
}
