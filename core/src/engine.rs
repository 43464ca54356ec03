//! The query-serving handle: a loaded, read-only index plus the semantic
//! ranker, with every operation the CLI and server expose.

use crate::bm25::{self, LexicalHit};
use crate::cache::{CacheManager, CacheStatus};
use crate::config::{CachePaths, BM25_B, BM25_K1, CANDIDATE_MULTIPLIER, RERANK_MULTIPLIER};
use crate::document::{DocId, Document, RawDocument};
use crate::error::{Result, SearchError};
use crate::fusion::{self, RrfScore, WeightedScore};
use crate::index::InvertedIndex;
use crate::llm::{self, EnhanceMethod, RerankMethod, Rerankable, TextGenerator};
use crate::retry::RetryPolicy;
use crate::semantic::{ChunkedSemanticIndex, Embedder, SemanticHit};
use crate::tokenizer::Tokenizer;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct WeightedHit {
    pub document: Document,
    #[serde(flatten)]
    pub score: WeightedScore,
}

#[derive(Debug, Clone, Serialize)]
pub struct RrfHit {
    pub document: Document,
    #[serde(flatten)]
    pub score: RrfScore,
}

impl Rerankable for RrfHit {
    fn doc_id(&self) -> DocId { self.document.id }
    fn document(&self) -> &Document { &self.document }
}

/// Optional LLM steps around an RRF search.
#[derive(Clone, Copy, Default)]
pub struct RrfOptions<'a> {
    pub generator: Option<&'a dyn TextGenerator>,
    pub enhance: Option<EnhanceMethod>,
    pub rerank: Option<RerankMethod>,
    pub retry: RetryPolicy,
}

pub struct Engine {
    cache: CacheManager,
    index: InvertedIndex,
    semantic: Option<ChunkedSemanticIndex>,
}

impl Engine {
    /// Open the cache at `paths`. Refuses, naming the blocking state, unless
    /// the cache is built; never attempts a partial load.
    pub fn open(paths: CachePaths, tokenizer: Arc<Tokenizer>) -> Result<Self> {
        let cache = CacheManager::open(paths);
        if cache.status() != CacheStatus::Built {
            tracing::warn!(status = %cache.status(), "{}", cache.status().remedy());
            return Err(SearchError::CacheBlocked(cache.status()));
        }
        let index = InvertedIndex::load(&cache, tokenizer)?;
        Ok(Self { cache, index, semantic: None })
    }

    /// Attach the semantic ranker, building and caching chunk embeddings if
    /// none are on disk yet.
    pub fn attach_semantic(&mut self, embedder: Arc<dyn Embedder>) -> Result<()> {
        let paths = self.cache.paths();
        let semantic = if ChunkedSemanticIndex::embeddings_cached(paths) {
            ChunkedSemanticIndex::load(embedder, paths, self.index.documents())?
        } else {
            let built = ChunkedSemanticIndex::build(embedder, self.index.documents())?;
            built.save(paths)?;
            built
        };
        self.semantic = Some(semantic);
        Ok(())
    }

    pub fn with_semantic(mut self, embedder: Arc<dyn Embedder>) -> Result<Self> {
        self.attach_semantic(embedder)?;
        Ok(self)
    }

    pub fn status(&self) -> CacheStatus { self.cache.status() }

    pub fn index(&self) -> &InvertedIndex { &self.index }

    pub fn semantic(&self) -> Option<&ChunkedSemanticIndex> { self.semantic.as_ref() }

    pub fn document(&self, doc_id: DocId) -> Option<&Document> { self.index.document(doc_id) }

    pub fn search(&self, query: &str, limit: usize) -> Vec<Document> {
        bm25::search(&self.index, query, limit).into_iter().cloned().collect()
    }

    pub fn term_frequency(&self, doc_id: DocId, term: &str) -> u32 {
        neutral(bm25::term_frequency(&self.index, doc_id, term), 0)
    }

    pub fn idf(&self, term: &str) -> f64 {
        neutral(bm25::inverse_document_frequency(&self.index, term), 0.0)
    }

    pub fn tf_idf(&self, doc_id: DocId, term: &str) -> f64 {
        neutral(bm25::tf_idf(&self.index, doc_id, term), 0.0)
    }

    pub fn bm25_idf(&self, term: &str) -> f64 {
        neutral(bm25::bm25_idf(&self.index, term), 0.0)
    }

    /// Unlike the other single-term helpers, an unknown document is an error.
    pub fn bm25_tf(&self, doc_id: DocId, term: &str, k1: f64, b: f64) -> Result<f64> {
        match bm25::bm25_tf(&self.index, doc_id, term, k1, b) {
            Err(SearchError::InvalidQuery { input, tokens }) => {
                tracing::warn!(%input, tokens, "term must be a single token");
                Ok(0.0)
            }
            other => other,
        }
    }

    pub fn bm25_tf_default(&self, doc_id: DocId, term: &str) -> Result<f64> {
        self.bm25_tf(doc_id, term, BM25_K1, BM25_B)
    }

    pub fn bm25_search(&self, query: &str, limit: usize) -> Vec<LexicalHit> {
        bm25::bm25_search(&self.index, query, limit)
    }

    /// Semantic candidates; an embedding failure degrades to no candidates.
    fn semantic_candidates(&self, query: &str, limit: usize) -> Result<Vec<SemanticHit>> {
        let semantic = self
            .semantic
            .as_ref()
            .ok_or_else(|| SearchError::Configuration("semantic ranker is not attached".into()))?;
        match semantic.search(query, limit) {
            Ok(hits) => Ok(hits),
            Err(SearchError::Adapter(e)) => {
                tracing::warn!(error = %e, "semantic search failed, fusing lexical results only");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn candidates(&self, query: &str, limit: usize) -> Result<(Vec<LexicalHit>, Vec<SemanticHit>)> {
        let pool = CANDIDATE_MULTIPLIER.saturating_mul(limit);
        let semantic = self.semantic_candidates(query, pool)?;
        let lexical = self.bm25_search(query, pool);
        tracing::debug!(lexical = lexical.len(), semantic = semantic.len(), "fusion candidates");
        Ok((lexical, semantic))
    }

    pub fn weighted_search(&self, query: &str, alpha: f64, limit: usize) -> Result<Vec<WeightedHit>> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(SearchError::Configuration(format!("alpha must be within [0, 1], got {alpha}")));
        }
        let (lexical, semantic) = self.candidates(query, limit)?;
        Ok(fusion::weighted_fusion(&lexical, &semantic, alpha, limit)
            .into_iter()
            .filter_map(|score| self.document(score.doc_id).map(|d| WeightedHit { document: d.clone(), score }))
            .collect())
    }

    pub fn rrf_search(&self, query: &str, k: f64, limit: usize) -> Result<Vec<RrfHit>> {
        check_rrf_k(k)?;
        let (lexical, semantic) = self.candidates(query, limit)?;
        Ok(fusion::rrf_fusion(&lexical, &semantic, k, limit)
            .into_iter()
            .filter_map(|score| self.document(score.doc_id).map(|d| RrfHit { document: d.clone(), score }))
            .collect())
    }

    /// RRF search with optional query enhancement and reranking. Without a
    /// generator both steps are skipped.
    pub fn rrf_search_with(&self, query: &str, k: f64, limit: usize, opts: RrfOptions<'_>) -> Result<Vec<RrfHit>> {
        check_rrf_k(k)?;
        let Some(generator) = opts.generator else {
            return self.rrf_search(query.trim(), k, limit);
        };
        let enhanced = llm::enhance_query(generator, query, opts.enhance, &opts.retry);
        let Some(method) = opts.rerank else {
            return self.rrf_search(&enhanced, k, limit);
        };
        let fused = self.rrf_search(&enhanced, k, limit.saturating_mul(RERANK_MULTIPLIER))?;
        let mut reranked = llm::rerank_results(generator, query, fused, method, &opts.retry);
        reranked.truncate(limit);
        Ok(reranked)
    }
}

fn check_rrf_k(k: f64) -> Result<()> {
    if k.is_finite() && k >= 0.0 {
        return Ok(());
    }
    Err(SearchError::Configuration(format!("rrf k must be a non-negative number, got {k}")))
}

fn neutral<T>(res: Result<T>, default: T) -> T {
    match res {
        Ok(v) => v,
        Err(SearchError::InvalidQuery { input, tokens }) => {
            tracing::warn!(%input, tokens, "term must be a single token");
            default
        }
        Err(e) => {
            tracing::warn!(error = %e, "lookup failed");
            default
        }
    }
}

/// Full rebuild. Index and embeddings are both built in memory before the
/// cache is touched; old embeddings are removed before the new index lands,
/// so a failure never leaves embeddings of another corpus beside the index.
pub fn build_cache(
    paths: &CachePaths,
    corpus: Vec<RawDocument>,
    tokenizer: Arc<Tokenizer>,
    embedder: Option<Arc<dyn Embedder>>,
) -> Result<CacheStatus> {
    let index = InvertedIndex::build(tokenizer, corpus)?;
    let semantic = match embedder {
        Some(embedder) => Some(ChunkedSemanticIndex::build(embedder, index.documents())?),
        None => None,
    };
    let mut cache = CacheManager::open(paths.clone());
    ChunkedSemanticIndex::clear(paths)?;
    index.save(&mut cache)?;
    if let Some(semantic) = semantic {
        semantic.save(paths)?;
    }
    Ok(cache.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RRF_K;
    use crate::error::AdapterError;
    use crate::index::tests::sample_corpus;
    use crate::llm::tests::Scripted;
    use crate::semantic::tests::hash_embedder;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn engine(dir: &std::path::Path) -> Engine {
        let paths = CachePaths::new(dir);
        let tokenizer = Arc::new(Tokenizer::default());
        let status = build_cache(&paths, sample_corpus(), tokenizer.clone(), Some(hash_embedder())).unwrap();
        assert_eq!(status, CacheStatus::Built);
        Engine::open(paths, tokenizer).unwrap().with_semantic(hash_embedder()).unwrap()
    }

    fn no_wait() -> RetryPolicy { RetryPolicy::new(3, Duration::ZERO) }

    #[test]
    fn single_term_helpers_are_neutral_on_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        assert_eq!(e.term_frequency(1, "polite bear"), 0);
        assert_eq!(e.idf("the"), 0.0);
        assert_eq!(e.bm25_tf(1, "polite bear", BM25_K1, BM25_B).unwrap(), 0.0);
        assert!(matches!(e.bm25_tf_default(77, "bear"), Err(SearchError::UnknownDocument(77))));
        assert!(e.bm25_idf("bear") > 0.0);
    }

    #[test]
    fn hybrid_search_requires_semantic_ranker() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        let tokenizer = Arc::new(Tokenizer::default());
        build_cache(&paths, sample_corpus(), tokenizer.clone(), None).unwrap();
        let e = Engine::open(paths, tokenizer).unwrap();
        assert!(matches!(e.rrf_search("bear", RRF_K, 3), Err(SearchError::Configuration(_))));
        assert_eq!(e.bm25_search("bear", 2).len(), 2);
    }

    #[test]
    fn enhanced_query_drives_the_search() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        let gen = Scripted::new(vec![Ok("shark beach".into())]);
        let opts = RrfOptions { generator: Some(&gen), enhance: Some(EnhanceMethod::Rewrite), rerank: None, retry: no_wait() };
        let hits = e.rrf_search_with("that fish movie", RRF_K, 2, opts).unwrap();
        assert_eq!(hits[0].document.id, 4);
    }

    #[test]
    fn batch_rerank_reorders_then_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        let gen = Scripted::new(vec![Ok("[3, 2, 1]".into())]);
        let opts = RrfOptions { generator: Some(&gen), enhance: None, rerank: Some(RerankMethod::Batch), retry: no_wait() };
        let hits = e.rrf_search_with("bear", RRF_K, 2, opts).unwrap();
        assert_eq!(hits.iter().map(|h| h.document.id).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[test]
    fn failed_rerank_keeps_fused_order() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        let plain: Vec<DocId> = e.rrf_search("bear", RRF_K, 3).unwrap().iter().map(|h| h.document.id).collect();
        let gen = Scripted::new(vec![Err(AdapterError::Server("down".into()))]);
        let opts = RrfOptions { generator: Some(&gen), enhance: None, rerank: Some(RerankMethod::Individual), retry: no_wait() };
        let hits = e.rrf_search_with("bear", RRF_K, 3, opts).unwrap();
        assert_eq!(hits.iter().map(|h| h.document.id).collect::<Vec<_>>(), plain);
    }

    #[test]
    fn rrf_k_must_be_non_negative() {
        let dir = tempfile::tempdir().unwrap();
        let e = engine(dir.path());
        for k in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(e.rrf_search("bear", k, 3), Err(SearchError::Configuration(_))));
            assert!(matches!(e.rrf_search_with("bear", k, 3, RrfOptions::default()), Err(SearchError::Configuration(_))));
        }
        assert!(e.rrf_search("bear", 0.0, 3).is_ok());
    }

    /// Works until switched off, then reports the service as down.
    struct Switchable {
        inner: Arc<dyn Embedder>,
        down: AtomicBool,
    }

    impl Embedder for Switchable {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, AdapterError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(AdapterError::Server("embedding service down".into()));
            }
            self.inner.embed(text)
        }
    }

    #[test]
    fn embedding_outage_degrades_to_lexical_only() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        let tokenizer = Arc::new(Tokenizer::default());
        let embedder = Arc::new(Switchable { inner: hash_embedder(), down: AtomicBool::new(false) });
        build_cache(&paths, sample_corpus(), tokenizer.clone(), Some(embedder.clone() as Arc<dyn Embedder>)).unwrap();
        let e = Engine::open(paths, tokenizer).unwrap().with_semantic(embedder.clone() as Arc<dyn Embedder>).unwrap();
        embedder.down.store(true, Ordering::SeqCst);

        let lexical: Vec<DocId> = e.bm25_search("grizzly bear", 3).iter().map(|h| h.doc_id).collect();
        let rrf = e.rrf_search("grizzly bear", RRF_K, 3).unwrap();
        assert_eq!(rrf.iter().map(|h| h.document.id).collect::<Vec<_>>(), lexical);
        assert!(rrf.iter().all(|h| h.score.semantic_rank.is_none()));

        let weighted = e.weighted_search("grizzly bear", 0.5, 3).unwrap();
        assert_eq!(weighted.iter().map(|h| h.document.id).collect::<Vec<_>>(), lexical);
        assert!(weighted.iter().all(|h| h.score.semantic_score == 0.0));
    }
}
