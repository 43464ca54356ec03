//! Error taxonomy for the retrieval core.

use crate::cache::CacheStatus;
use crate::document::DocId;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Corpus, stopword or cache file missing, unreadable, or not valid JSON.
    #[error("data access failed for {path}: {source}")]
    DataAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single-term API received input that did not tokenize to exactly one token.
    #[error("term must be a single token, '{input}' produced {tokens}")]
    InvalidQuery { input: String, tokens: usize },

    /// A cache artifact vanished or could not be decoded after the cache was judged built.
    #[error("cache artifact {path} is corrupt: {reason}; rebuild the cache")]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("index cannot be served, cache is {0}")]
    CacheBlocked(CacheStatus),

    #[error("document with the id {0} does not exist")]
    UnknownDocument(DocId),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl SearchError {
    pub(crate) fn data_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DataAccess { path: path.into(), source }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CacheCorrupt { path: path.into(), reason: reason.to_string() }
    }
}

/// Failures of the external embedding and text-generation services.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterError {
    /// Retryable: the service asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl AdapterError {
    pub fn is_rate_limited(&self) -> bool { matches!(self, Self::RateLimited(_)) }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(s) if s.as_u16() == 429 => Self::RateLimited(e.to_string()),
            Some(_) => Self::Server(e.to_string()),
            None if e.is_decode() => Self::Malformed(e.to_string()),
            None => Self::Transport(e.to_string()),
        }
    }
}
