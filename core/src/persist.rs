//! Flat JSON snapshot of an [`InvertedIndex`].
//!
//! Four artifacts: postings + docmap, term frequencies, document lengths and
//! the average document length. They are written one after another and read
//! back in parallel, each read owning exactly one slot of the result.

use crate::cache::CacheManager;
use crate::config::{CachePaths, LOAD_WORKERS};
use crate::document::{DocId, Document};
use crate::error::{Result, SearchError};
use crate::index::InvertedIndex;
use crate::tokenizer::Tokenizer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{create_dir_all, remove_file, rename, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Serialize)]
struct IndexFileRef<'a> {
    index: &'a HashMap<String, BTreeSet<DocId>>,
    docmap: &'a BTreeMap<DocId, Document>,
    order: &'a [DocId],
}

#[derive(Deserialize)]
struct IndexFile {
    index: HashMap<String, BTreeSet<DocId>>,
    docmap: BTreeMap<DocId, Document>,
    /// Corpus insertion order; snapshots without it fall back to id order.
    #[serde(default)]
    order: Option<Vec<DocId>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvgDocLength {
    pub value: f64,
}

type TermFrequencies = HashMap<DocId, HashMap<String, u32>>;
type DocLengths = BTreeMap<DocId, usize>;

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| SearchError::data_access(path, e.into()))?;
    write_atomic(path, &json)
}

/// Write next to `path` and rename into place, so readers see either the old
/// file or the complete new one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = stage(path, bytes)?;
    commit(&tmp, path)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let tmp = temp_path(path);
    let mut f = File::create(&tmp).map_err(|e| SearchError::data_access(&tmp, e))?;
    f.write_all(bytes).and_then(|_| f.sync_all()).map_err(|e| SearchError::data_access(&tmp, e))?;
    Ok(tmp)
}

fn commit(tmp: &Path, path: &Path) -> Result<()> {
    rename(tmp, path).map_err(|e| SearchError::data_access(path, e))
}

fn stage_json<T: Serialize + ?Sized>(path: PathBuf, value: &T) -> Result<(PathBuf, PathBuf)> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| SearchError::data_access(&path, e.into()))?;
    Ok((stage(&path, &json)?, path))
}

/// Read a cache artifact. Anything short of a clean parse is corruption.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut buf = String::new();
    File::open(path)
        .and_then(|mut f| f.read_to_string(&mut buf))
        .map_err(|e| SearchError::corrupt(path, e))?;
    serde_json::from_str(&buf).map_err(|e| SearchError::corrupt(path, e))
}

impl InvertedIndex {
    /// Write all four artifacts, creating the cache directory if needed, and
    /// mark the cache built.
    pub fn save(&self, cache: &mut CacheManager) -> Result<()> {
        let paths = cache.paths().clone();
        tracing::info!(root = %paths.root.display(), "saving index");
        create_dir_all(&paths.root).map_err(|e| SearchError::data_access(&paths.root, e))?;

        // stage all four before replacing any, a failed write leaves the old snapshot whole
        let staged = [
            stage_json(paths.index(), &IndexFileRef { index: &self.postings, docmap: &self.docmap, order: &self.order }),
            stage_json(paths.term_frequencies(), &self.term_frequencies),
            stage_json(paths.doc_lengths(), &self.doc_lengths),
            stage_json(paths.avg_doc_length(), &AvgDocLength { value: self.avg_doc_length }),
        ];
        if staged.iter().any(|s| s.is_err()) {
            for (tmp, _) in staged.iter().flatten() {
                let _ = remove_file(tmp);
            }
        }
        let staged: Vec<(PathBuf, PathBuf)> = staged.into_iter().collect::<Result<_>>()?;
        for (tmp, path) in &staged {
            commit(tmp, path)?;
        }

        cache.mark_built();
        tracing::info!(num_docs = self.num_docs(), "index saved");
        Ok(())
    }

    /// Read a snapshot the cache manager judged `Built`.
    ///
    /// A file that disappeared or fails to parse since that check is fatal.
    pub fn load(cache: &CacheManager, tokenizer: Arc<Tokenizer>) -> Result<Self> {
        cache.ensure_built()?;
        let paths = cache.paths();
        tracing::info!(root = %paths.root.display(), "loading index from cache");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(LOAD_WORKERS)
            .build()
            .map_err(|e| SearchError::Configuration(format!("cache loader pool: {e}")))?;

        let mut index_file: Option<Result<IndexFile>> = None;
        let mut term_frequencies: Option<Result<TermFrequencies>> = None;
        let mut doc_lengths: Option<Result<DocLengths>> = None;
        let mut avg: Option<Result<AvgDocLength>> = None;
        pool.scope(|s| {
            s.spawn(|_| index_file = Some(read_json(&paths.index())));
            s.spawn(|_| term_frequencies = Some(read_json(&paths.term_frequencies())));
            s.spawn(|_| doc_lengths = Some(read_json(&paths.doc_lengths())));
            s.spawn(|_| avg = Some(read_json(&paths.avg_doc_length())));
        });

        let index_file = finished(index_file, paths.index())?;
        let mut index = InvertedIndex::empty(tokenizer);
        index.postings = index_file.index;
        index.order = index_file.order.unwrap_or_else(|| index_file.docmap.keys().copied().collect());
        index.docmap = index_file.docmap;
        index.term_frequencies = finished(term_frequencies, paths.term_frequencies())?;
        index.doc_lengths = finished(doc_lengths, paths.doc_lengths())?;
        index.avg_doc_length = finished(avg, paths.avg_doc_length())?.value;

        index.check_consistency().map_err(|reason| SearchError::corrupt(&paths.root, reason))?;
        tracing::info!(num_docs = index.num_docs(), num_terms = index.num_terms(), "index loaded");
        Ok(index)
    }
}

fn finished<T>(slot: Option<Result<T>>, path: PathBuf) -> Result<T> {
    slot.unwrap_or_else(|| Err(SearchError::corrupt(path, "read task did not complete")))
}

/// Convenience for callers that only hold a path.
pub fn load_index(paths: &CachePaths, tokenizer: Arc<Tokenizer>) -> Result<InvertedIndex> {
    InvertedIndex::load(&CacheManager::open(paths.clone()), tokenizer)
}
