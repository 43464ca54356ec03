//! Tuning constants and on-disk layout of the cache directory.
//!
//! Everything here is compile-time; runtime knobs (paths, adapter endpoints)
//! come from CLI flags and environment variables in the binaries.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// BM25 term frequency saturation parameter.
pub const BM25_K1: f64 = 1.5;

/// BM25 document length normalization parameter.
pub const BM25_B: f64 = 0.75;

/// Weight of the keyword side in weighted fusion.
pub const DEFAULT_ALPHA: f64 = 0.5;

/// Reciprocal Rank Fusion constant `k` in `1 / (k + rank)`.
pub const RRF_K: f64 = 60.0;

/// Result count for plain keyword and BM25 searches.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Result count for hybrid searches.
pub const DEFAULT_HYBRID_LIMIT: usize = 10;

/// Each ranker contributes `CANDIDATE_MULTIPLIER * limit` candidates before fusion.
pub const CANDIDATE_MULTIPLIER: usize = 500;

/// Fused candidates fetched per requested result when reranking.
pub const RERANK_MULTIPLIER: usize = 5;

/// Worker threads used to read cache artifacts.
pub const LOAD_WORKERS: usize = 4;

pub const RETRY_MAX_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(4);

/// Sentences per semantic chunk and the overlap between neighbouring chunks.
pub const CHUNK_SENTENCES: usize = 4;
pub const CHUNK_OVERLAP: usize = 1;

/// Dimension of the offline hashing embedder.
pub const HASH_EMBEDDING_DIM: usize = 384;

pub const DEFAULT_EMBED_MODEL: &str = "all-minilm";
pub const EMBED_TIMEOUT: Duration = Duration::from_secs(30);
pub const LLM_TIMEOUT: Duration = Duration::from_secs(60);

pub const INDEX_FILE: &str = "index.json";
pub const TERM_FREQUENCIES_FILE: &str = "term_frequencies.json";
pub const DOC_LENGTHS_FILE: &str = "doc_length.json";
pub const AVG_DOC_LENGTH_FILE: &str = "avg_doc_length.json";
pub const CHUNK_EMBEDDINGS_FILE: &str = "chunk_embeddings.bin";
pub const CHUNK_METADATA_FILE: &str = "chunk_metadata.json";

/// Resolves artifact paths under a cache root.
#[derive(Debug, Clone)]
pub struct CachePaths {
    pub root: PathBuf,
}

impl CachePaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn index(&self) -> PathBuf { self.root.join(INDEX_FILE) }
    pub fn term_frequencies(&self) -> PathBuf { self.root.join(TERM_FREQUENCIES_FILE) }
    pub fn doc_lengths(&self) -> PathBuf { self.root.join(DOC_LENGTHS_FILE) }
    pub fn avg_doc_length(&self) -> PathBuf { self.root.join(AVG_DOC_LENGTH_FILE) }
    pub fn chunk_embeddings(&self) -> PathBuf { self.root.join(CHUNK_EMBEDDINGS_FILE) }
    pub fn chunk_metadata(&self) -> PathBuf { self.root.join(CHUNK_METADATA_FILE) }

    /// The four inverted-index artifacts whose presence defines a built cache.
    pub fn expected_index_files(&self) -> [PathBuf; 4] {
        [self.index(), self.term_frequencies(), self.doc_lengths(), self.avg_doc_length()]
    }
}
