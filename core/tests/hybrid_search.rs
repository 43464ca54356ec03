use reelfuse_core::config::{HASH_EMBEDDING_DIM, RRF_K};
use reelfuse_core::{build_cache, CachePaths, Embedder, Engine, HashEmbedder, RawDocument, RrfOptions, Tokenizer};
use std::sync::Arc;

fn corpus() -> Vec<RawDocument> {
    let rows = [
        (1, "Paddington", "A polite bear from Peru arrives in London. He loves marmalade."),
        (2, "The Revenant", "A frontiersman is mauled by a grizzly bear. He seeks revenge across the frozen wilderness."),
        (3, "Toy Story", "A cowboy doll feels threatened by a new space ranger toy."),
        (4, "Jaws", "A great white shark terrorizes a summer beach town. The police chief hunts it."),
        (5, "Brother Bear", "A young hunter is turned into a bear and learns about his brother."),
    ];
    rows.iter()
        .map(|(id, t, d)| RawDocument { id: Some(*id), title: t.to_string(), description: d.to_string() })
        .collect()
}

fn engine(dir: &std::path::Path) -> Engine {
    let paths = CachePaths::new(dir);
    let tokenizer = Arc::new(Tokenizer::default());
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(HASH_EMBEDDING_DIM, tokenizer.clone()));
    build_cache(&paths, corpus(), tokenizer.clone(), Some(embedder.clone())).unwrap();
    Engine::open(paths, tokenizer).unwrap().with_semantic(embedder).unwrap()
}

#[test]
fn alpha_one_matches_bm25_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let bm25: Vec<u32> = engine.bm25_search("bear", 10).iter().map(|h| h.doc_id).collect();
    let weighted = engine.weighted_search("bear", 1.0, 10).unwrap();
    let lexical_prefix: Vec<u32> = weighted.iter().take(bm25.len()).map(|h| h.document.id).collect();
    assert_eq!(lexical_prefix, bm25);
}

#[test]
fn alpha_out_of_range_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    assert!(engine.weighted_search("bear", 1.5, 5).is_err());
}

#[test]
fn rrf_scores_are_descending_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let hits = engine.rrf_search("shark beach", RRF_K, 3).unwrap();
    assert!(!hits.is_empty() && hits.len() <= 3);
    assert_eq!(hits[0].document.id, 4);
    assert!(hits.windows(2).all(|w| w[0].score.rrf_score >= w[1].score.rrf_score));
    assert!(hits[0].score.rrf_score <= 2.0 / (RRF_K + 1.0) + 1e-12);
}

#[test]
fn rrf_without_generator_skips_llm_steps() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let plain: Vec<u32> = engine.rrf_search("bear", RRF_K, 3).unwrap().iter().map(|h| h.document.id).collect();
    let with: Vec<u32> = engine
        .rrf_search_with("  bear ", RRF_K, 3, RrfOptions::default())
        .unwrap()
        .iter()
        .map(|h| h.document.id)
        .collect();
    assert_eq!(plain, with);
}

#[test]
fn embeddings_are_reused_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let first = engine(dir.path());
    let tokenizer = Arc::new(Tokenizer::default());
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(HASH_EMBEDDING_DIM, tokenizer.clone()));
    let reopened = Engine::open(CachePaths::new(dir.path()), tokenizer).unwrap().with_semantic(embedder).unwrap();
    let a = first.rrf_search("revenge", RRF_K, 5).unwrap();
    let b = reopened.rrf_search("revenge", RRF_K, 5).unwrap();
    assert_eq!(
        a.iter().map(|h| h.document.id).collect::<Vec<_>>(),
        b.iter().map(|h| h.document.id).collect::<Vec<_>>()
    );
}
