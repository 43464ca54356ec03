//! Movie retrieval core: a BM25 inverted index fused with a semantic ranker.
//!
//! Build path: corpus -> [`Tokenizer`] -> [`InvertedIndex::build`] -> save to
//! the cache directory. Query path: [`Engine::open`] (refuses unless the cache
//! is built) -> BM25 and semantic candidates -> weighted or RRF fusion ->
//! optional LLM rerank.

pub mod bm25;
pub mod cache;
pub mod config;
pub mod corpus;
pub mod document;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod index;
pub mod llm;
pub mod persist;
pub mod retry;
pub mod semantic;
pub mod tokenizer;

pub use bm25::LexicalHit;
pub use cache::{check_cache_integrity, CacheManager, CacheStatus};
pub use config::CachePaths;
pub use document::{DocId, Document, RawDocument};
pub use engine::{build_cache, Engine, RrfHit, RrfOptions, WeightedHit};
pub use error::{AdapterError, Result, SearchError};
pub use fusion::{RrfScore, WeightedScore};
pub use index::InvertedIndex;
pub use llm::{EnhanceMethod, GeminiClient, RerankMethod, TextGenerator};
pub use retry::RetryPolicy;
pub use semantic::{select_embedder, ChunkedSemanticIndex, Embedder, HashEmbedder, HttpEmbedder, SemanticHit};
pub use tokenizer::Tokenizer;
