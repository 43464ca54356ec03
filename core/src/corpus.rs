//! Loading of the movie corpus and the stopword list.

use crate::document::RawDocument;
use crate::error::{Result, SearchError};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Deserialize)]
struct CorpusFile {
    movies: Vec<RawDocument>,
}

/// Read `{"movies": [...]}`. Ids are validated later, by the index build.
pub fn load_corpus<P: AsRef<Path>>(path: P) -> Result<Vec<RawDocument>> {
    let path = path.as_ref();
    let f = File::open(path).map_err(|e| SearchError::data_access(path, e))?;
    let corpus: CorpusFile = serde_json::from_reader(BufReader::new(f))
        .map_err(|e| SearchError::data_access(path, e.into()))?;
    tracing::debug!(path = %path.display(), movies = corpus.movies.len(), "loaded corpus");
    Ok(corpus.movies)
}

/// Read a newline-delimited stopword list.
pub fn load_stopwords<P: AsRef<Path>>(path: P) -> Result<HashSet<String>> {
    let path = path.as_ref();
    let mut buf = String::new();
    File::open(path)
        .and_then(|mut f| f.read_to_string(&mut buf))
        .map_err(|e| SearchError::data_access(path, e))?;
    Ok(parse_stopwords(&buf))
}

pub fn parse_stopwords(text: &str) -> HashSet<String> {
    text.lines()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_movies_array() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"movies": [{{"id": 7, "title": "Paddington", "description": "A bear in London."}}, {{"title": "No id"}}]}}"#).unwrap();
        let docs = load_corpus(f.path()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, Some(7));
        assert_eq!(docs[1].id, None);
        assert_eq!(docs[1].description, "");
    }

    #[test]
    fn malformed_corpus_is_data_access_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{not json").unwrap();
        assert!(matches!(load_corpus(f.path()), Err(SearchError::DataAccess { .. })));
        assert!(matches!(load_corpus("/definitely/not/here.json"), Err(SearchError::DataAccess { .. })));
    }

    #[test]
    fn stopwords_skip_blank_lines() {
        let words = parse_stopwords("the\n\n  And \nof\n");
        assert_eq!(words.len(), 3);
        assert!(words.contains("and"));
    }
}
