use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::KnowledgeStore;
use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{KnowledgeItem, ScoredItem, StoreQuery};
use crate::search::{LexicalQuery, rank_items};

pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// On-disk corpus format. Unrecognized top-level fields are ignored so
/// snapshots written by newer versions still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    #[serde(default)]
    pub items: Vec<KnowledgeItem>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: Option<String>,
}

impl CorpusSnapshot {
    pub fn new(items: Vec<KnowledgeItem>) -> Self {
        Self {
            items,
            created_at: Some(Utc::now()),
            version: Some(SNAPSHOT_VERSION.to_string()),
        }
    }

    pub async fn read(path: &Path) -> KnowledgeResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let snapshot: Self = serde_json::from_str(&raw)?;
        match snapshot.version.as_deref() {
            Some(SNAPSHOT_VERSION) => {}
            other => debug!("Reading snapshot with version {:?}", other),
        }
        Ok(snapshot)
    }

    /// Write via a temporary sibling file and rename, so readers never see
    /// a half-written snapshot.
    pub async fn write(&self, path: &Path) -> KnowledgeResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Write `items` to `path` in snapshot format.
pub async fn export_snapshot(items: Vec<KnowledgeItem>, path: &Path) -> KnowledgeResult<()> {
    let count = items.len();
    CorpusSnapshot::new(items).write(path).await?;
    info!("Exported {} knowledge items to {:?}", count, path);
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[derive(Debug, Default, Clone)]
struct Corpus {
    items: Vec<KnowledgeItem>,
    positions: HashMap<String, usize>,
    created_at: Option<DateTime<Utc>>,
}

impl Corpus {
    fn from_items(items: Vec<KnowledgeItem>, created_at: Option<DateTime<Utc>>) -> Self {
        let mut corpus = Self {
            created_at,
            ..Default::default()
        };
        corpus.apply(items);
        corpus
    }

    fn embedding_dim(&self) -> Option<usize> {
        self.items
            .iter()
            .find_map(|item| item.embedding.as_ref().map(Vec::len))
    }

    /// Replace-or-append by id; new ids keep arrival order.
    fn apply(&mut self, items: impl IntoIterator<Item = KnowledgeItem>) {
        for item in items {
            match self.positions.get(&item.id) {
                Some(&index) => self.items[index] = item,
                None => {
                    self.positions.insert(item.id.clone(), self.items.len());
                    self.items.push(item);
                }
            }
        }
    }

    fn snapshot(&self) -> CorpusSnapshot {
        CorpusSnapshot {
            items: self.items.clone(),
            created_at: self.created_at.or_else(|| Some(Utc::now())),
            version: Some(SNAPSHOT_VERSION.to_string()),
        }
    }
}

/// In-process corpus scored with the lexical algorithm, optionally backed
/// by a snapshot file that is rewritten after every successful write.
#[derive(Debug)]
pub struct LocalLexicalStore {
    corpus: RwLock<Corpus>,
    path: Option<PathBuf>,
}

impl LocalLexicalStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            corpus: RwLock::new(Corpus::default()),
            path: None,
        }
    }

    /// A memory-only store seeded with `items`.
    pub fn with_items(items: Vec<KnowledgeItem>) -> Self {
        Self {
            corpus: RwLock::new(Corpus::from_items(items, None)),
            path: None,
        }
    }

    /// Load the snapshot at `path`. A missing file yields an empty corpus
    /// that is created on the first write.
    pub async fn open(path: &Path) -> KnowledgeResult<Self> {
        let corpus = if tokio::fs::try_exists(path).await? {
            let snapshot = CorpusSnapshot::read(path).await?;
            info!(
                "Loaded {} knowledge items from {:?}",
                snapshot.items.len(),
                path
            );
            Corpus::from_items(snapshot.items, snapshot.created_at)
        } else {
            warn!("No knowledge snapshot at {:?}, starting empty", path);
            Corpus::default()
        };

        Ok(Self {
            corpus: RwLock::new(corpus),
            path: Some(path.to_path_buf()),
        })
    }

    async fn persist(&self, corpus: &Corpus) -> KnowledgeResult<()> {
        if let Some(path) = &self.path {
            corpus.snapshot().write(path).await?;
        }
        Ok(())
    }
}

fn validate_batch(items: &[KnowledgeItem], corpus_dim: Option<usize>) -> KnowledgeResult<()> {
    let mut expected = corpus_dim;
    for item in items {
        if item.id.trim().is_empty() {
            return Err(KnowledgeError::Validation("item id is empty".to_string()));
        }
        if item.text.trim().is_empty() {
            return Err(KnowledgeError::Validation(format!(
                "item {} has empty text",
                item.id
            )));
        }
        if let Some(embedding) = &item.embedding {
            match expected {
                Some(dim) if dim != embedding.len() => {
                    return Err(KnowledgeError::EmbeddingDimMismatch {
                        expected: dim,
                        actual: embedding.len(),
                    });
                }
                Some(_) => {}
                None => expected = Some(embedding.len()),
            }
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl KnowledgeStore for LocalLexicalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upsert(&self, items: &[KnowledgeItem]) -> KnowledgeResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        // Readers hold the read lock, so they see either the old or the new
        // corpus, never a partially replaced item.
        let mut corpus = self.corpus.write().await;
        validate_batch(items, corpus.embedding_dim())?;

        let mut next = (*corpus).clone();
        next.apply(items.iter().cloned());
        self.persist(&next).await?;
        *corpus = next;

        debug!("Upserted {} items into local store", items.len());
        Ok(())
    }

    async fn query(&self, query: &StoreQuery) -> KnowledgeResult<Vec<ScoredItem>> {
        let lexical = LexicalQuery::from_store_query(query);
        let corpus = self.corpus.read().await;
        Ok(rank_items(&corpus.items, &lexical, query.limit))
    }

    async fn get_all(&self) -> KnowledgeResult<Vec<KnowledgeItem>> {
        Ok(self.corpus.read().await.items.clone())
    }

    async fn count(&self) -> KnowledgeResult<usize> {
        Ok(self.corpus.read().await.items.len())
    }

    async fn reset(&self) -> KnowledgeResult<()> {
        let mut corpus = self.corpus.write().await;
        let next = Corpus {
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        self.persist(&next).await?;
        *corpus = next;
        info!("Local knowledge corpus reset");
        Ok(())
    }
}
