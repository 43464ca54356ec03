use crate::document::{DocId, Document, RawDocument};
use crate::error::{Result, SearchError};
use crate::tokenizer::Tokenizer;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

static NO_DOCS: BTreeSet<DocId> = BTreeSet::new();

/// Term -> document postings plus the per-document statistics BM25 needs.
///
/// An index is only ever produced whole, by [`InvertedIndex::build`] or by
/// loading a complete cache snapshot; there is no incremental mutation.
pub struct InvertedIndex {
    pub(crate) postings: HashMap<String, BTreeSet<DocId>>,
    pub(crate) docmap: BTreeMap<DocId, Document>,
    /// Ids in corpus order, which is also the tie-break order for ranking.
    pub(crate) order: Vec<DocId>,
    pub(crate) term_frequencies: HashMap<DocId, HashMap<String, u32>>,
    pub(crate) doc_lengths: BTreeMap<DocId, usize>,
    pub(crate) avg_doc_length: f64,
    tokenizer: Arc<Tokenizer>,
}

impl InvertedIndex {
    pub fn empty(tokenizer: Arc<Tokenizer>) -> Self {
        Self {
            postings: HashMap::new(),
            docmap: BTreeMap::new(),
            order: Vec::new(),
            term_frequencies: HashMap::new(),
            doc_lengths: BTreeMap::new(),
            avg_doc_length: 0.0,
            tokenizer,
        }
    }

    /// Index every document's `title + " " + description` in one pass.
    ///
    /// Fails with `Configuration` on a missing or repeated id; nothing is
    /// returned in that case, so a failed build never leaks partial state.
    pub fn build<I>(tokenizer: Arc<Tokenizer>, documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = RawDocument>,
    {
        tracing::info!("building inverted index");
        let mut index = Self::empty(tokenizer);
        for raw in documents {
            let doc = Document::try_from(raw)?;
            if index.docmap.contains_key(&doc.id) {
                return Err(SearchError::Configuration(format!("duplicate document id {}", doc.id)));
            }
            index.add_document(doc);
        }
        index.avg_doc_length = mean_length(&index.doc_lengths);
        tracing::info!(num_docs = index.docmap.len(), num_terms = index.postings.len(), avg_doc_length = index.avg_doc_length, "inverted index built");
        Ok(index)
    }

    fn add_document(&mut self, doc: Document) {
        let tokens = self.tokenizer.tokenize(&doc.indexed_text());
        self.doc_lengths.insert(doc.id, tokens.len());
        let counts = self.term_frequencies.entry(doc.id).or_default();
        for token in tokens {
            *counts.entry(token).or_insert(0) += 1;
        }
        for token in counts.keys() {
            self.postings.entry(token.clone()).or_default().insert(doc.id);
        }
        self.order.push(doc.id);
        self.docmap.insert(doc.id, doc);
    }

    pub fn tokenizer(&self) -> &Tokenizer { &self.tokenizer }

    pub(crate) fn shared_tokenizer(&self) -> Arc<Tokenizer> { Arc::clone(&self.tokenizer) }

    pub fn num_docs(&self) -> usize { self.docmap.len() }

    pub fn num_terms(&self) -> usize { self.postings.len() }

    pub fn avg_doc_length(&self) -> f64 { self.avg_doc_length }

    pub fn document(&self, doc_id: DocId) -> Option<&Document> { self.docmap.get(&doc_id) }

    /// Documents in the order the corpus listed them.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.order.iter().filter_map(|id| self.docmap.get(id))
    }

    /// Ids of documents containing an already-normalized term.
    pub fn get_doc_ids(&self, term: &str) -> &BTreeSet<DocId> {
        self.postings.get(term).unwrap_or(&NO_DOCS)
    }

    pub fn doc_frequency(&self, term: &str) -> usize { self.get_doc_ids(term).len() }

    /// Documents containing `term`, truncated to `limit` when one is given.
    pub fn get_documents(&self, term: &str, limit: Option<usize>) -> Vec<&Document> {
        let docs = self.get_doc_ids(term).iter().filter_map(|id| self.docmap.get(id));
        match limit {
            Some(n) => docs.take(n).collect(),
            None => docs.collect(),
        }
    }

    /// Count of `term` in `doc_id`. `term` must tokenize to exactly one token.
    pub fn get_token_frequency(&self, doc_id: DocId, term: &str) -> Result<u32> {
        let token = self.tokenizer.single_token(term)?;
        Ok(self.token_count(doc_id, &token))
    }

    /// Count of an already-normalized token; 0 for unseen pairs.
    pub fn token_count(&self, doc_id: DocId, token: &str) -> u32 {
        self.term_frequencies
            .get(&doc_id)
            .and_then(|counts| counts.get(token))
            .copied()
            .unwrap_or(0)
    }

    pub fn term_counts(&self, doc_id: DocId) -> Option<&HashMap<String, u32>> {
        self.term_frequencies.get(&doc_id)
    }

    pub fn doc_length(&self, doc_id: DocId) -> Result<usize> {
        self.doc_lengths.get(&doc_id).copied().ok_or(SearchError::UnknownDocument(doc_id))
    }

    /// Every id referenced by postings, term frequencies or doc lengths must be
    /// in the docmap, and the stored average must match the lengths.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        if let Some((term, id)) = self
            .postings
            .iter()
            .flat_map(|(t, ids)| ids.iter().map(move |id| (t, id)))
            .find(|(_, id)| !self.docmap.contains_key(id))
        {
            return Err(format!("term '{term}' references unknown document {id}"));
        }
        if let Some(id) = self.term_frequencies.keys().find(|id| !self.docmap.contains_key(id)) {
            return Err(format!("term frequencies reference unknown document {id}"));
        }
        if let Some(id) = self.doc_lengths.keys().find(|id| !self.docmap.contains_key(id)) {
            return Err(format!("doc lengths reference unknown document {id}"));
        }
        if self.order.len() != self.docmap.len() || self.order.iter().any(|id| !self.docmap.contains_key(id)) {
            return Err(format!("document order lists {} ids for {} documents", self.order.len(), self.docmap.len()));
        }
        let expected = mean_length(&self.doc_lengths);
        if (expected - self.avg_doc_length).abs() > 1e-9 {
            return Err(format!("average length {} does not match {}", self.avg_doc_length, expected));
        }
        Ok(())
    }
}

fn mean_length(lengths: &BTreeMap<DocId, usize>) -> f64 {
    if lengths.is_empty() { return 0.0; }
    lengths.values().sum::<usize>() as f64 / lengths.len() as f64
}
