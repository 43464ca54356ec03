use reelfuse_core::config::HASH_EMBEDDING_DIM;
use reelfuse_core::{
    build_cache, AdapterError, CachePaths, CacheStatus, ChunkedSemanticIndex, Embedder, Engine, HashEmbedder, RawDocument,
    SearchError, Tokenizer,
};
use std::fs;
use std::sync::Arc;

fn corpus() -> Vec<RawDocument> {
    vec![
        RawDocument { id: Some(1), title: "Paddington".into(), description: "A polite bear arrives in London.".into() },
        RawDocument { id: Some(2), title: "The Revenant".into(), description: "A frontiersman is mauled by a grizzly bear.".into() },
        RawDocument { id: Some(3), title: "Jaws".into(), description: "A great white shark terrorizes a beach town.".into() },
    ]
}

#[test]
fn fresh_directory_is_not_built() {
    let dir = tempfile::tempdir().unwrap();
    let err = Engine::open(CachePaths::new(dir.path().join("cache")), Arc::new(Tokenizer::default())).err().unwrap();
    assert!(matches!(err, SearchError::CacheBlocked(CacheStatus::NotBuilt)));
}

#[test]
fn build_then_break_then_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::new(dir.path());
    let tokenizer = Arc::new(Tokenizer::default());

    let status = build_cache(&paths, corpus(), tokenizer.clone(), None).unwrap();
    assert_eq!(status, CacheStatus::Built);
    let engine = Engine::open(paths.clone(), tokenizer.clone()).unwrap();
    assert_eq!(engine.index().num_docs(), 3);

    fs::remove_file(paths.doc_lengths()).unwrap();
    let err = Engine::open(paths.clone(), tokenizer.clone()).err().unwrap();
    assert!(matches!(err, SearchError::CacheBlocked(CacheStatus::Corrupt)));

    assert_eq!(build_cache(&paths, corpus(), tokenizer.clone(), None).unwrap(), CacheStatus::Built);
    let engine = Engine::open(paths, tokenizer).unwrap();
    let hits = engine.bm25_search("bear", 5);
    // full scan: the shark movie is still listed, with a zero score
    assert_eq!(hits.len(), 3);
    assert!(hits[..2].iter().all(|h| h.score > 0.0));
    assert_eq!(hits[2].doc_id, 3);
    assert_eq!(hits[2].score, 0.0);
}

#[test]
fn duplicate_ids_fail_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::new(dir.path().join("cache"));
    let mut docs = corpus();
    docs[2].id = Some(1);
    let err = build_cache(&paths, docs, Arc::new(Tokenizer::default()), None).unwrap_err();
    assert!(matches!(err, SearchError::Configuration(_)));
    assert_eq!(reelfuse_core::check_cache_integrity(&paths), CacheStatus::NotBuilt);
}

struct Unreachable;

impl Embedder for Unreachable {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, AdapterError> {
        Err(AdapterError::Server("down".into()))
    }
}

#[test]
fn failed_embedding_rebuild_leaves_no_stale_vectors() {
    let dir = tempfile::tempdir().unwrap();
    let paths = CachePaths::new(dir.path());
    let tokenizer = Arc::new(Tokenizer::default());
    let hashing: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(HASH_EMBEDDING_DIM, tokenizer.clone()));
    build_cache(&paths, corpus(), tokenizer.clone(), Some(hashing.clone())).unwrap();
    assert!(ChunkedSemanticIndex::embeddings_cached(&paths));

    let toy_story = vec![RawDocument {
        id: Some(1),
        title: "Toy Story".into(),
        description: "A cowboy doll feels threatened by a space ranger toy.".into(),
    }];
    let err = build_cache(&paths, toy_story.clone(), tokenizer.clone(), Some(Arc::new(Unreachable) as Arc<dyn Embedder>)).unwrap_err();
    assert!(matches!(err, SearchError::Adapter(AdapterError::Server(_))));

    // the embedding step failed before anything was written
    let engine = Engine::open(paths.clone(), tokenizer.clone()).unwrap();
    assert_eq!(engine.index().num_docs(), 3);
    assert!(ChunkedSemanticIndex::embeddings_cached(&paths));

    // a rebuild without embeddings removes the old ones; attaching re-embeds the new corpus
    build_cache(&paths, toy_story, tokenizer.clone(), None).unwrap();
    assert!(!ChunkedSemanticIndex::embeddings_cached(&paths));
    let engine = Engine::open(paths.clone(), tokenizer).unwrap().with_semantic(hashing).unwrap();
    let hits = engine.semantic().unwrap().search("shark beach", 5).unwrap();
    assert!(hits.iter().all(|h| h.doc_id == 1));
    assert_eq!(engine.semantic().unwrap().total_chunks(), 1);
}
