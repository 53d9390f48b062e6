use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::errors::KnowledgeResult;
use crate::ingest::IngestionPipeline;
use crate::models::{IngestionReport, Retrieval};
use crate::store::{StoreSet, export_snapshot, open_stores};
use crate::{ChromaCredentials, KnowledgeSettings};

pub(crate) mod retrieval;

pub use retrieval::{DEFAULT_LIMIT, RetrievalEngine};

/// Ingestion and retrieval wired to the stores selected by configuration.
///
/// The engine owns the store instances; dropping it releases them.
#[derive(Debug, Clone)]
pub struct KnowledgeEngine {
    settings: KnowledgeSettings,
    stores: StoreSet,
    pipeline: IngestionPipeline,
    retrieval: RetrievalEngine,
}

impl KnowledgeEngine {
    /// Open the configured stores and build both pipelines over them.
    pub async fn open(
        settings: KnowledgeSettings,
        credentials: Option<ChromaCredentials>,
    ) -> KnowledgeResult<Self> {
        let stores = open_stores(&settings, credentials).await?;
        Ok(Self::with_stores(settings, stores))
    }

    /// Build an engine over stores constructed by the caller.
    pub fn with_stores(settings: KnowledgeSettings, stores: StoreSet) -> Self {
        let pipeline = IngestionPipeline::new(stores.primary.clone(), &settings);
        let retrieval = RetrievalEngine::from_stores(&stores, settings.search.default_limit);
        Self {
            settings,
            stores,
            pipeline,
            retrieval,
        }
    }

    /// Access the knowledge settings.
    pub fn settings(&self) -> &KnowledgeSettings {
        &self.settings
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    pub async fn ingest(&self, records: &[Value]) -> KnowledgeResult<IngestionReport> {
        self.pipeline.ingest(records).await
    }

    pub async fn retrieve(
        &self,
        query_text: &str,
        species_filter: Option<&str>,
        limit: Option<usize>,
    ) -> KnowledgeResult<Retrieval> {
        self.retrieval
            .retrieve(query_text, species_filter, limit)
            .await
    }

    /// Number of items in the primary store.
    pub async fn count(&self) -> KnowledgeResult<usize> {
        self.stores.primary.count().await
    }

    /// Write the primary corpus to `path` in snapshot format, e.g. to seed
    /// the local fallback of a remote deployment.
    pub async fn export_snapshot(&self, path: &Path) -> KnowledgeResult<usize> {
        let items = self.stores.primary.get_all().await?;
        let count = items.len();
        export_snapshot(items, path).await?;
        Ok(count)
    }

    /// Delete every item from the primary store.
    pub async fn reset(&self) -> KnowledgeResult<()> {
        self.stores.primary.reset().await?;
        info!("Knowledge corpus reset ({})", self.stores.primary.name());
        Ok(())
    }
}
