//! Error taxonomy for the retrieval-augmented generation pipeline.
//!
//! Each layer has its own `thiserror` enum. Per-chunk embedding failures
//! ([`EmbedError`]) are recoverable by exclusion and never abort indexing;
//! everything else propagates to the caller as a typed [`RagError`].

use std::time::Duration;

/// Failure of a single remote call to an embedding or completion provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{provider} API error {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("invalid {provider} response: {message}")]
    Decode { provider: String, message: String },

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("{0} provider is disabled")]
    Disabled(&'static str),
}

impl ProviderError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Transport failures, timeouts, 408, 429, 5xx and 400 are retried; the
    /// latter because providers intermittently reject well-formed requests
    /// under load. Other client errors and undecodable bodies are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Transport(_) => true,
            ProviderError::Status { status, .. } => {
                matches!(*status, 400 | 408 | 429) || (500..600).contains(status)
            }
            ProviderError::Decode { .. }
            | ProviderError::MissingCredentials(_)
            | ProviderError::Disabled(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// A provider error that survived the retry policy.
#[derive(Debug, thiserror::Error)]
#[error("{label} failed after {attempts} attempt(s) in {elapsed:?}: {source}")]
pub struct RetryFailure {
    pub label: String,
    pub attempts: u32,
    pub elapsed: Duration,
    #[source]
    pub source: ProviderError,
}

/// Permanent failure to embed one text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding provider failed after {attempts} attempt(s): {message}")]
    Provider { attempts: u32, message: String },

    #[error("provider returned {got} vectors for a batch of {expected}")]
    CountMismatch { expected: usize, got: usize },

    #[error("vector has {got} dimensions, expected {expected}")]
    Dimension { expected: usize, got: usize },

    #[error("embedding task aborted: {0}")]
    Task(String),
}

impl From<RetryFailure> for EmbedError {
    fn from(f: RetryFailure) -> Self {
        EmbedError::Provider {
            attempts: f.attempts,
            message: f.source.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("vector index has not been built")]
    NotReady,

    #[error("vector has {got} dimensions, index expects {expected}")]
    Dimension { expected: usize, got: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Exhausted(#[from] RetryFailure),
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by [`RagSession`](crate::engine::RagSession).
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("indexing failed: {0}")]
    IndexingFailed(#[source] Box<RagError>),

    #[error("none of the {failed} chunk(s) could be embedded")]
    NoEmbeddings { failed: usize },

    #[error("no repository has been indexed in this session")]
    NotIndexed,

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("query embedding failed: {0}")]
    QueryEmbedding(#[source] EmbedError),

    #[error("generation failed: {0}")]
    GenerationFailed(#[from] GenerationError),
}

impl RagError {
    /// Machine-readable code used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::SourceUnavailable(_) => "source_unavailable",
            RagError::IndexingFailed(_) => "indexing_failed",
            RagError::NoEmbeddings { .. } => "no_embeddings",
            RagError::NotIndexed => "not_indexed",
            RagError::Index(IndexError::NotReady) => "index_not_ready",
            RagError::Index(IndexError::Dimension { .. }) => "dimension_mismatch",
            RagError::QueryEmbedding(_) => "embedding_failed",
            RagError::GenerationFailed(_) => "generation_failed",
        }
    }
}
