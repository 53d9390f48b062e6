use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{KnowledgeError, KnowledgeResult};
use crate::models::{QueryResult, Retrieval, ScoredItem, StoreQuery};
use crate::store::{KnowledgeStore, StoreSet};

/// Ranks corpus entries for a query through whichever store is configured.
///
/// The engine never looks at which concrete store it holds. When the
/// primary reports an availability failure and a fallback was configured,
/// the same query is answered from the fallback and flagged as degraded.
#[derive(Clone)]
pub struct RetrievalEngine {
    primary: Arc<dyn KnowledgeStore>,
    fallback: Option<Arc<dyn KnowledgeStore>>,
    default_limit: usize,
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|store| store.name()))
            .field("default_limit", &self.default_limit)
            .finish()
    }
}

pub const DEFAULT_LIMIT: usize = 5;

impl RetrievalEngine {
    pub fn new(primary: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            primary,
            fallback: None,
            default_limit: DEFAULT_LIMIT,
        }
    }

    pub fn from_stores(stores: &StoreSet, default_limit: usize) -> Self {
        Self {
            primary: stores.primary.clone(),
            fallback: stores.fallback.clone(),
            default_limit: default_limit.max(1),
        }
    }

    /// Answer from `store` when the primary is unavailable.
    pub fn with_fallback(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.fallback = Some(store);
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    /// Rank the corpus for `query_text`, optionally narrowed by species.
    ///
    /// # Errors
    ///
    /// `InvalidQuery` for a zero limit or a query with neither text nor
    /// species. Store failures propagate unless they are availability
    /// failures and a fallback is configured.
    pub async fn retrieve(
        &self,
        query_text: &str,
        species_filter: Option<&str>,
        limit: Option<usize>,
    ) -> KnowledgeResult<Retrieval> {
        let limit = limit.unwrap_or(self.default_limit);
        if limit == 0 {
            return Err(KnowledgeError::InvalidQuery(
                "limit must be positive".to_string(),
            ));
        }
        let query = StoreQuery::new(query_text, species_filter, limit);
        if query.text.trim().is_empty() && query.species.is_none() {
            return Err(KnowledgeError::InvalidQuery(
                "query text and species filter are both empty".to_string(),
            ));
        }

        match self.primary.query(&query).await {
            Ok(candidates) => Ok(shape(candidates, limit, self.primary.name(), false)),
            Err(KnowledgeError::NotFound(what)) => {
                debug!("Nothing to search in {}: {}", self.primary.name(), what);
                Ok(shape(Vec::new(), limit, self.primary.name(), false))
            }
            Err(err) if err.is_unavailable() => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        "{} store unavailable ({}), answering from {} fallback",
                        self.primary.name(),
                        err,
                        fallback.name()
                    );
                    let candidates = fallback.query(&query).await?;
                    Ok(shape(candidates, limit, fallback.name(), true))
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}

fn shape(candidates: Vec<ScoredItem>, limit: usize, backend: &str, degraded: bool) -> Retrieval {
    let results = candidates
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(rank, candidate)| QueryResult {
            item: candidate.item,
            relevance_score: candidate.score.max(0.0),
            rank,
        })
        .collect();

    Retrieval {
        results,
        backend: backend.to_string(),
        degraded,
    }
}
