use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("missing data directory")]
    MissingDataDir,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid record: {0}")]
    Validation(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("knowledge store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("knowledge store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimMismatch { expected: usize, actual: usize },
    #[error("remote store returned {status}: {body}")]
    Remote { status: u16, body: String },
}

impl KnowledgeError {
    /// Transient failures worth retrying on the write path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Timeout(_))
    }

    /// Failures that allow the read path to answer from the local fallback.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Timeout(_))
    }
}

impl From<reqwest::Error> for KnowledgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured duration
            return Self::Timeout(Duration::ZERO);
        }
        if err.is_connect() || err.is_request() {
            return Self::StoreUnavailable(err.to_string());
        }
        if err.is_decode() {
            return Self::Remote {
                status: 200,
                body: format!("undecodable response: {err}"),
            };
        }
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), err.to_string()),
            None => Self::StoreUnavailable(err.to_string()),
        }
    }
}

impl KnowledgeError {
    /// Classify a non-success HTTP status returned by a remote store.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Configuration(format!("remote store rejected credentials: {body}")),
            404 => Self::NotFound(body),
            408 | 429 | 500..=599 => Self::StoreUnavailable(format!("HTTP {status}: {body}")),
            _ => Self::Remote { status, body },
        }
    }
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
