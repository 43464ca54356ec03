//! Semantic ranking over chunked document embeddings.
//!
//! The embedding model is an external service behind [`Embedder`]. The chunk
//! index owns an embedder rather than extending one: it splits descriptions
//! into overlapping sentence windows, embeds them, and scores a document by
//! its best-matching chunk.

use crate::config::{CachePaths, CHUNK_OVERLAP, CHUNK_SENTENCES, EMBED_TIMEOUT, HASH_EMBEDDING_DIM};
use crate::document::{DocId, Document};
use crate::error::{AdapterError, Result, SearchError};
use crate::persist::{read_json, write_atomic, write_json};
use crate::retry::RetryPolicy;
use crate::tokenizer::Tokenizer;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, create_dir_all};
use std::sync::Arc;
use std::time::Duration;

lazy_static! {
    static ref SENTENCE: Regex = Regex::new(r"[^.!?]+(?:[.!?]+|$)").expect("valid regex");
}

/// A vector-producing service. Deterministic for a fixed model.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, AdapterError>;

    fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, AdapterError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticHit {
    pub doc_id: DocId,
    pub score: f64,
}

/// Feature-hashing embedder (FNV-1a over normalized tokens, signed buckets,
/// L2-normalized). Needs no model and no network.
pub struct HashEmbedder {
    dim: usize,
    tokenizer: Arc<Tokenizer>,
}

impl HashEmbedder {
    pub fn new(dim: usize, tokenizer: Arc<Tokenizer>) -> Self {
        Self { dim: dim.max(1), tokenizer }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, AdapterError> {
        let mut v = vec![0f32; self.dim];
        for token in self.tokenizer.tokenize(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dim as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(v)
    }
}

/// Client for an Ollama-style `POST {base_url}/api/embed` endpoint.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AdapterError::from)?;
        Ok(Self { client, base_url: base_url.into(), model: model.into(), retry: RetryPolicy::default() })
    }

    fn request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, AdapterError> {
        let url = format!("{}/api/embed", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()?
            .error_for_status()?;
        let body: EmbedResponse = resp.json()?;
        if body.embeddings.len() != texts.len() {
            return Err(AdapterError::Malformed(format!("asked for {} embeddings, got {}", texts.len(), body.embeddings.len())));
        }
        Ok(body.embeddings)
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, AdapterError> {
        let mut out = self.embed_batch(&[text.to_string()])?;
        out.pop().ok_or_else(|| AdapterError::Malformed("no embedding returned".into()))
    }

    fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, AdapterError> {
        if texts.is_empty() { return Ok(Vec::new()); }
        self.retry.run(|| self.request(texts))
    }
}

/// The HTTP embedder when a service URL is configured, otherwise the offline
/// hashing embedder.
pub fn select_embedder(
    url: Option<&str>,
    model: &str,
    tokenizer: Arc<Tokenizer>,
) -> Result<Arc<dyn Embedder>> {
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            tracing::info!(url, model, "using embedding service");
            Ok(Arc::new(HttpEmbedder::new(url, model, EMBED_TIMEOUT)?))
        }
        None => {
            tracing::info!(dim = HASH_EMBEDDING_DIM, "no embedding service configured, using hashing embedder");
            Ok(Arc::new(HashEmbedder::new(HASH_EMBEDDING_DIM, tokenizer)))
        }
    }
}

/// Split text into sentences and group them into windows of at most
/// `max_sentences`, neighbouring windows sharing `overlap` sentences.
pub fn semantic_chunk(text: &str, max_sentences: usize, overlap: usize) -> Vec<String> {
    let sentences: Vec<&str> = SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect();
    let size = max_sentences.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < sentences.len() {
        let end = (start + size).min(sentences.len());
        chunks.push(sentences[start..end].join(" "));
        if end == sentences.len() { break; }
        start += step;
    }
    chunks
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut na, mut nb) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 { return 0.0; }
    dot / (na.sqrt() * nb.sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub movie_idx: usize,
    pub chunk_idx: usize,
    pub total_chunks: usize,
}

#[derive(Serialize, Deserialize)]
struct ChunkMetadataFile {
    chunks: Vec<ChunkMetadata>,
    total_chunks: usize,
    /// Corpus the embeddings were built from, in `movie_idx` order.
    #[serde(default)]
    doc_ids: Vec<DocId>,
}

/// Embeddings for every description chunk, with the chunk -> document mapping.
pub struct ChunkedSemanticIndex {
    embedder: Arc<dyn Embedder>,
    /// Documents in the order `movie_idx` refers to.
    doc_ids: Vec<DocId>,
    embeddings: Vec<Vec<f32>>,
    metadata: Vec<ChunkMetadata>,
}

impl ChunkedSemanticIndex {
    pub fn embeddings_cached(paths: &CachePaths) -> bool {
        paths.chunk_embeddings().exists() && paths.chunk_metadata().exists()
    }

    pub fn build<'a, I>(embedder: Arc<dyn Embedder>, documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        tracing::info!("building chunked embeddings");
        let mut doc_ids = Vec::new();
        let mut texts = Vec::new();
        let mut metadata = Vec::new();
        for (movie_idx, doc) in documents.into_iter().enumerate() {
            doc_ids.push(doc.id);
            let description = doc.description.trim();
            if description.is_empty() { continue; }
            let chunks = semantic_chunk(description, CHUNK_SENTENCES, CHUNK_OVERLAP);
            let total_chunks = chunks.len();
            for (chunk_idx, chunk) in chunks.into_iter().enumerate() {
                texts.push(chunk);
                metadata.push(ChunkMetadata { movie_idx, chunk_idx, total_chunks });
            }
        }
        let embeddings = embedder.embed_batch(&texts)?;
        if embeddings.len() != texts.len() {
            return Err(AdapterError::Malformed(format!("{} chunks but {} embeddings", texts.len(), embeddings.len())).into());
        }
        tracing::info!(documents = doc_ids.len(), chunks = texts.len(), "chunked embeddings built");
        Ok(Self { embedder, doc_ids, embeddings, metadata })
    }

    pub fn save(&self, paths: &CachePaths) -> Result<()> {
        create_dir_all(&paths.root).map_err(|e| SearchError::data_access(&paths.root, e))?;
        let path = paths.chunk_embeddings();
        let bytes = bincode::serialize(&self.embeddings)
            .map_err(|e| SearchError::data_access(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        write_atomic(&path, &bytes)?;
        let meta = ChunkMetadataFile {
            chunks: self.metadata.clone(),
            total_chunks: self.metadata.len(),
            doc_ids: self.doc_ids.clone(),
        };
        write_json(&paths.chunk_metadata(), &meta)?;
        tracing::info!(root = %paths.root.display(), chunks = self.metadata.len(), "chunked embeddings saved");
        Ok(())
    }

    /// Load cached embeddings. `documents` must be the corpus they were built
    /// from, in the same order.
    pub fn load<'a, I>(embedder: Arc<dyn Embedder>, paths: &CachePaths, documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let path = paths.chunk_embeddings();
        let bytes = fs::read(&path).map_err(|e| SearchError::corrupt(&path, e))?;
        let embeddings: Vec<Vec<f32>> = bincode::deserialize(&bytes).map_err(|e| SearchError::corrupt(&path, e))?;
        let meta: ChunkMetadataFile = read_json(&paths.chunk_metadata())?;
        let doc_ids: Vec<DocId> = documents.into_iter().map(|d| d.id).collect();

        if embeddings.len() != meta.chunks.len() || meta.total_chunks != meta.chunks.len() {
            return Err(SearchError::corrupt(&path, format!("{} embeddings for {} chunks", embeddings.len(), meta.chunks.len())));
        }
        if meta.doc_ids != doc_ids {
            return Err(SearchError::corrupt(paths.chunk_metadata(), "embeddings were built from a different corpus"));
        }
        if let Some(bad) = meta.chunks.iter().find(|c| c.movie_idx >= doc_ids.len()) {
            return Err(SearchError::corrupt(paths.chunk_metadata(), format!("chunk points at document #{} of {}", bad.movie_idx, doc_ids.len())));
        }
        tracing::info!(chunks = embeddings.len(), "chunked embeddings loaded");
        Ok(Self { embedder, doc_ids, embeddings, metadata: meta.chunks })
    }

    /// Remove cached embeddings, if any.
    pub fn clear(paths: &CachePaths) -> Result<()> {
        for path in [paths.chunk_embeddings(), paths.chunk_metadata()] {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(SearchError::data_access(&path, e)),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn total_chunks(&self) -> usize { self.metadata.len() }

    pub fn chunks(&self) -> &[ChunkMetadata] { &self.metadata }

    /// Parent document of a chunk.
    pub fn chunk_document(&self, chunk: usize) -> Option<DocId> {
        self.metadata.get(chunk).and_then(|m| self.doc_ids.get(m.movie_idx)).copied()
    }

    /// Documents ranked by their best chunk's cosine similarity to the query.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SemanticHit>> {
        let q = self.embedder.embed(query)?;
        let mut best: HashMap<usize, f64> = HashMap::new();
        for (vector, meta) in self.embeddings.iter().zip(&self.metadata) {
            if vector.len() != q.len() {
                return Err(AdapterError::Malformed(format!("query has dimension {}, chunks have {}", q.len(), vector.len())).into());
            }
            let score = cosine_similarity(&q, vector);
            best.entry(meta.movie_idx).and_modify(|s| *s = s.max(score)).or_insert(score);
        }
        let mut hits: Vec<(usize, f64)> = best.into_iter().collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(hits
            .into_iter()
            .take(limit)
            .filter_map(|(idx, score)| self.doc_ids.get(idx).map(|&doc_id| SemanticHit { doc_id, score }))
            .collect())
    }
}
