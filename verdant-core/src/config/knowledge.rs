//! Knowledge system configuration types.
//!
//! These types define the resolved (non-optional) settings used by
//! `verdant-knowledge`. They are created from the user-facing
//! `KnowledgeSection` TOML structs via `From`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::settings::{IngestSection, KnowledgeBackend, KnowledgeSection, SearchSection};

/// Resolved knowledge engine settings (all values filled with defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSettings {
    #[serde(default)]
    pub backend: KnowledgeBackend,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_chroma_url")]
    pub chroma_url: String,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Explicit snapshot location. When unset the snapshot lives under the
    /// data root (`VERDANT_DATA_DIR` or XDG data dir).
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default)]
    pub fallback_to_local: bool,
    #[serde(default)]
    pub embedding_dim: Option<usize>,
    #[serde(default)]
    pub ingest: IngestDefaults,
    #[serde(default)]
    pub search: RetrievalDefaults,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            backend: KnowledgeBackend::default(),
            collection: default_collection(),
            chroma_url: default_chroma_url(),
            request_timeout_seconds: default_request_timeout_seconds(),
            snapshot_path: None,
            fallback_to_local: false,
            embedding_dim: None,
            ingest: IngestDefaults::default(),
            search: RetrievalDefaults::default(),
        }
    }
}

impl KnowledgeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Resolved ingestion tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestDefaults {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every further attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Chunks written at once. Above 1 a retried chunk can land after a
    /// later one, so corpus insertion order (and lexical tie order) follows
    /// completion order; keep 1 when that order matters.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_stamp_ingested_at")]
    pub stamp_ingested_at: bool,
}

impl Default for IngestDefaults {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            concurrency: default_concurrency(),
            stamp_ingested_at: default_stamp_ingested_at(),
        }
    }
}

impl IngestDefaults {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Resolved retrieval tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalDefaults {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalDefaults {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

fn default_collection() -> String {
    "plant_care_knowledge".to_string()
}

fn default_chroma_url() -> String {
    "https://api.trychroma.com".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_concurrency() -> usize {
    1
}

fn default_stamp_ingested_at() -> bool {
    true
}

fn default_limit() -> usize {
    5
}

impl From<&IngestSection> for IngestDefaults {
    fn from(value: &IngestSection) -> Self {
        let mut ingest = IngestDefaults::default();
        if let Some(size) = value.chunk_size {
            ingest.chunk_size = size.max(1);
        }
        if let Some(attempts) = value.max_attempts {
            ingest.max_attempts = attempts.max(1);
        }
        if let Some(ms) = value.backoff_ms {
            ingest.backoff_ms = ms;
        }
        if let Some(concurrency) = value.concurrency {
            ingest.concurrency = concurrency.max(1);
        }
        if let Some(stamp) = value.stamp_ingested_at {
            ingest.stamp_ingested_at = stamp;
        }
        ingest
    }
}

impl From<&SearchSection> for RetrievalDefaults {
    fn from(value: &SearchSection) -> Self {
        let mut search = RetrievalDefaults::default();
        if let Some(limit) = value.default_limit {
            search.default_limit = limit.max(1);
        }
        search
    }
}

impl From<&KnowledgeSection> for KnowledgeSettings {
    fn from(value: &KnowledgeSection) -> Self {
        let mut settings = KnowledgeSettings {
            backend: value.backend,
            ..Default::default()
        };
        if let Some(collection) = &value.collection {
            settings.collection = collection.trim().to_string();
        }
        if let Some(url) = &value.chroma_url {
            settings.chroma_url = url.clone();
        }
        if let Some(seconds) = value.request_timeout_seconds {
            settings.request_timeout_seconds = seconds.max(1);
        }
        if let Some(path) = &value.snapshot_path {
            settings.snapshot_path = Some(path.clone());
        }
        if let Some(fallback) = value.fallback_to_local {
            settings.fallback_to_local = fallback;
        }
        if let Some(dim) = value.embedding_dim {
            settings.embedding_dim = Some(dim);
        }
        settings.ingest = IngestDefaults::from(&value.ingest);
        settings.search = RetrievalDefaults::from(&value.search);
        settings
    }
}
