//! Plant-care knowledge ingestion and retrieval for verdant.

pub mod engine;
pub mod errors;
pub mod ingest;
pub mod models;
pub mod paths;
pub mod search;
pub mod store;

pub use verdant_core::config::{
    ChromaCredentials, IngestDefaults, KnowledgeBackend, KnowledgeSettings, RetrievalDefaults,
};
pub use engine::{KnowledgeEngine, RetrievalEngine};
pub use errors::{KnowledgeError, KnowledgeResult};
pub use ingest::IngestionPipeline;
pub use models::{
    ChunkFailure, Coercion, IngestionReport, KnowledgeItem, QueryResult, Rejection, Retrieval,
    RetrievedTip, ScoredItem, StoreQuery,
};
pub use store::{KnowledgeStore, LocalLexicalStore, RemoteVectorStore, StoreSet};
