//! Error taxonomy shared by the normalizer, the persistence layer, the
//! archive source, and the summarization pipeline.
//!
//! Two failure kinds never appear here as values: duplicate identities are
//! absorbed by insert-or-return-existing in [`crate::ingest`], and reply
//! cycles are resolved by [`crate::thread`] and reported as warnings.

use thiserror::Error;

/// A message or container that could not be parsed.
///
/// `Entry` is per-message and never aborts a batch; `Container` means the
/// whole payload is unreadable and is returned as a hard error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("entry {position}: {reason}")]
    Entry { position: usize, reason: String },

    #[error("unreadable container: {0}")]
    Container(String),
}

impl FormatError {
    pub fn entry(position: usize, reason: impl Into<String>) -> Self {
        FormatError::Entry {
            position,
            reason: reason.into(),
        }
    }
}

/// Errors that can be classified as worth retrying.
///
/// [`crate::retry::RetryPolicy`] consults nothing but this flag, so each
/// implementor decides its own closed set of transient kinds.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Failure reported by an LLM provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("provider server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("response blocked by safety filter: {0}")]
    SafetyRejected(String),

    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_) | ProviderError::Server { .. } | ProviderError::Connection(_)
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            ProviderError::Connection(e.to_string())
        } else if e.is_decode() || e.is_body() {
            ProviderError::MalformedResponse(e.to_string())
        } else {
            ProviderError::Connection(e.to_string())
        }
    }
}

/// Failure reading or writing the summarization cache. Never fatal.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A single record's write failure.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Failure downloading an archive.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("download timed out: {0}")]
    Timeout(String),

    #[error("archive server error {0}")]
    Server(u16),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("payload is not a gzip archive (first bytes: {0})")]
    NotGzip(String),

    #[error("payload is not an XML feed")]
    NotXml,

    #[error("decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Server(_) | FetchError::Connection(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else {
            FetchError::Connection(e.to_string())
        }
    }
}
