//! Lexical ranking over an [`InvertedIndex`]: TF-IDF and BM25 Okapi.
//!
//! Functions taking a bare `term` tokenize it first and reject anything that
//! is not exactly one token.

use crate::config::{BM25_B, BM25_K1};
use crate::document::{DocId, Document};
use crate::error::Result;
use crate::index::InvertedIndex;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalHit {
    pub doc_id: DocId,
    pub title: String,
    pub score: f64,
}

/// Documents matching any query token, in token order, de-duplicated by id.
pub fn search<'a>(index: &'a InvertedIndex, query: &str, limit: usize) -> Vec<&'a Document> {
    let tokens = index.tokenizer().tokenize(query);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in &tokens {
        for doc in index.get_documents(token, None) {
            if out.len() == limit { return out; }
            if seen.insert(doc.id) { out.push(doc); }
        }
    }
    out
}

pub fn term_frequency(index: &InvertedIndex, doc_id: DocId, term: &str) -> Result<u32> {
    index.get_token_frequency(doc_id, term)
}

/// Smoothed IDF: `ln((N + 1) / (df + 1))`.
pub fn inverse_document_frequency(index: &InvertedIndex, term: &str) -> Result<f64> {
    let token = index.tokenizer().single_token(term)?;
    Ok(idf_for_df(index.num_docs(), index.doc_frequency(&token)))
}

pub fn tf_idf(index: &InvertedIndex, doc_id: DocId, term: &str) -> Result<f64> {
    let tf = term_frequency(index, doc_id, term)?;
    Ok(tf as f64 * inverse_document_frequency(index, term)?)
}

pub fn idf_for_df(n: usize, df: usize) -> f64 {
    ((n as f64 + 1.0) / (df as f64 + 1.0)).ln()
}

/// BM25 IDF: `ln((N - df + 0.5) / (df + 0.5) + 1)`.
pub fn bm25_idf(index: &InvertedIndex, term: &str) -> Result<f64> {
    let token = index.tokenizer().single_token(term)?;
    Ok(bm25_idf_for_df(index.num_docs(), index.doc_frequency(&token)))
}

pub fn bm25_idf_for_df(n: usize, df: usize) -> f64 {
    let (n, df) = (n as f64, df as f64);
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// Saturated, length-normalized term frequency. Fails with `UnknownDocument`
/// when `doc_id` has no recorded length.
pub fn bm25_tf(index: &InvertedIndex, doc_id: DocId, term: &str, k1: f64, b: f64) -> Result<f64> {
    let token = index.tokenizer().single_token(term)?;
    let doc_len = index.doc_length(doc_id)?;
    Ok(saturate(index.token_count(doc_id, &token), doc_len, index.avg_doc_length(), k1, b))
}

pub fn bm25(index: &InvertedIndex, doc_id: DocId, term: &str) -> Result<f64> {
    Ok(bm25_tf(index, doc_id, term, BM25_K1, BM25_B)? * bm25_idf(index, term)?)
}

fn saturate(tf: u32, doc_len: usize, avg_doc_length: f64, k1: f64, b: f64) -> f64 {
    let tf = tf as f64;
    // zero average only happens when every document is empty, so tf is 0 too
    let ratio = if avg_doc_length > 0.0 { doc_len as f64 / avg_doc_length } else { 0.0 };
    let denom = tf + k1 * (1.0 - b + b * ratio);
    if denom == 0.0 { return 0.0; }
    (tf * (k1 + 1.0)) / denom
}

/// Score every document against the query and return the best `limit`.
///
/// This is a full corpus scan, O(N * Q); documents sharing no token with the
/// query score 0. Ties keep corpus order.
pub fn bm25_search(index: &InvertedIndex, query: &str, limit: usize) -> Vec<LexicalHit> {
    let tokens = index.tokenizer().tokenize(query);
    if tokens.is_empty() { return Vec::new(); }

    let n = index.num_docs();
    let idfs: Vec<f64> = tokens.iter().map(|t| bm25_idf_for_df(n, index.doc_frequency(t))).collect();
    let avg = index.avg_doc_length();

    let mut scored: Vec<LexicalHit> = index
        .documents()
        .map(|doc| {
            let doc_len = index.doc_lengths.get(&doc.id).copied().unwrap_or(0);
            let score = tokens
                .iter()
                .zip(&idfs)
                .map(|(t, idf)| saturate(index.token_count(doc.id, t), doc_len, avg, BM25_K1, BM25_B) * idf)
                .sum();
            LexicalHit { doc_id: doc.id, title: doc.title.clone(), score }
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::index::tests::sample_index;
    use crate::tokenizer::Tokenizer;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    /// Three documents of 10, 20 and 30 tokens; "bear" occurs twice in doc 1
    /// and once in doc 2.
    fn three_doc_index() -> InvertedIndex {
        let mut idx = InvertedIndex::empty(Arc::new(Tokenizer::default()));
        for (id, len) in [(1u32, 10usize), (2, 20), (3, 30)] {
            idx.docmap.insert(id, Document { id, title: format!("doc {id}"), description: String::new() });
            idx.doc_lengths.insert(id, len);
            idx.order.push(id);
        }
        idx.postings.insert("bear".into(), [1, 2].into_iter().collect());
        idx.term_frequencies.insert(1, HashMap::from([("bear".to_string(), 2)]));
        idx.term_frequencies.insert(2, HashMap::from([("bear".to_string(), 1)]));
        idx.avg_doc_length = 20.0;
        idx
    }

    #[test]
    fn bm25_worked_example() {
        let idx = three_doc_index();
        assert_eq!(bm25_idf(&idx, "bear").unwrap(), (1.5f64 / 2.5 + 1.0).ln());
        assert_eq!(bm25_tf(&idx, 1, "bear", 1.5, 0.75).unwrap(), 5.0 / 2.9375);
        assert_eq!(bm25_tf(&idx, 2, "bear", 1.5, 0.75).unwrap(), 1.0);
        assert_eq!(bm25_tf(&idx, 3, "bear", 1.5, 0.75).unwrap(), 0.0);
    }

    #[test]
    fn bm25_tf_unknown_document() {
        let idx = three_doc_index();
        assert!(matches!(bm25_tf(&idx, 9, "bear", BM25_K1, BM25_B), Err(SearchError::UnknownDocument(9))));
    }

    #[test]
    fn bm25_idf_strictly_decreases_with_df() {
        let n = 10;
        let values: Vec<f64> = (0..=n).map(|df| bm25_idf_for_df(n, df)).collect();
        assert!(values.windows(2).all(|w| w[0] > w[1]));
        // still positive when every document has the term
        assert_eq!(values[n], (0.5f64 / 10.5 + 1.0).ln());
        assert!(values[n] > 0.0);
    }

    #[test]
    fn classic_idf_and_tf_idf() {
        let idx = sample_index();
        let expected = (5.0f64 / 3.0).ln();
        assert_eq!(inverse_document_frequency(&idx, "bears").unwrap(), expected);
        assert_eq!(tf_idf(&idx, 2, "bear").unwrap(), expected);
        assert_eq!(tf_idf(&idx, 4, "bear").unwrap(), 0.0);
        assert_eq!(inverse_document_frequency(&idx, "unicorn").unwrap(), 5.0f64.ln());
    }

    #[test]
    fn multi_token_terms_are_rejected() {
        let idx = sample_index();
        assert!(matches!(bm25_idf(&idx, "grizzly bear"), Err(SearchError::InvalidQuery { .. })));
        assert!(matches!(inverse_document_frequency(&idx, ""), Err(SearchError::InvalidQuery { .. })));
        assert!(matches!(bm25(&idx, 1, "a the"), Err(SearchError::InvalidQuery { .. })));
    }

    #[test]
    fn bm25_search_ranks_matching_documents_first() {
        let idx = sample_index();
        let hits = bm25_search(&idx, "grizzly bear", 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].doc_id, 2);
        assert_eq!(hits[1].doc_id, 1);
        assert_eq!(hits[2].score, 0.0);
        assert_eq!(hits[2].doc_id, 3);
    }

    #[test]
    fn bm25_search_sums_per_token_scores() {
        let idx = sample_index();
        let hits = bm25_search(&idx, "grizzly bear", 10);
        let doc2 = hits.iter().find(|h| h.doc_id == 2).unwrap();
        let expected = bm25(&idx, 2, "grizzly").unwrap() + bm25(&idx, 2, "bear").unwrap();
        assert!((doc2.score - expected).abs() < 1e-12);
    }

    #[test]
    fn bm25_ties_follow_corpus_order() {
        let docs = vec![
            crate::index::tests::raw(3, "Toy Story", "Toys come to life."),
            crate::index::tests::raw(1, "Jaws", "A shark terrorizes a beach."),
        ];
        let idx = InvertedIndex::build(Arc::new(Tokenizer::default()), docs).unwrap();
        let ids: Vec<DocId> = bm25_search(&idx, "dragon", 5).iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn empty_queries_return_nothing() {
        let idx = sample_index();
        assert!(search(&idx, "", 5).is_empty());
        assert!(search(&idx, "the of and", 5).is_empty());
        assert!(bm25_search(&idx, "", 5).is_empty());
    }

    #[test]
    fn keyword_search_deduplicates_and_limits() {
        let idx = sample_index();
        let ids: Vec<DocId> = search(&idx, "bear london", 10).iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(search(&idx, "bear london", 1).len(), 1);
    }

    #[test]
    fn zero_length_documents_score_zero() {
        let mut idx = InvertedIndex::empty(Arc::new(Tokenizer::default()));
        idx.docmap.insert(1, Document { id: 1, title: String::new(), description: String::new() });
        idx.order.push(1);
        idx.doc_lengths = BTreeMap::from([(1, 0)]);
        assert_eq!(bm25_tf(&idx, 1, "bear", BM25_K1, BM25_B).unwrap(), 0.0);
    }
}
