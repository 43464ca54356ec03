use crate::corpus::load_stopwords;
use crate::error::{Result, SearchError};
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref PUNCT: Regex = Regex::new(r"[[:punct:]]").expect("valid regex");
    static ref ENGLISH_STOPWORDS: HashSet<String> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","cannot","could",
            "did","do","does","doing","down","during",
            "each","few","for","from","further",
            "had","has","have","having","he","her","here","hers","herself","him","himself","his","how",
            "i","if","in","into","is","it","its","itself",
            "me","more","most","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","should","so","some","such",
            "than","that","the","their","theirs","them","themselves","then","there","these","they","this","those","through","to","too",
            "under","until","up","very",
            "was","we","were","what","when","where","which","while","who","whom","why","with","would",
            "you","your","yours","yourself","yourselves"
        ];
        words.iter().map(|w| w.to_string()).collect()
    };
}

/// Turns free text into index terms.
///
/// The stopword set is fixed at construction; share one instance per process
/// behind an `Arc`.
pub struct Tokenizer {
    stopwords: HashSet<String>,
    stemmer: Stemmer,
}

impl Default for Tokenizer {
    fn default() -> Self { Self::new(ENGLISH_STOPWORDS.clone()) }
}

impl Tokenizer {
    pub fn new(stopwords: HashSet<String>) -> Self {
        Self { stopwords, stemmer: Stemmer::create(Algorithm::English) }
    }

    pub fn from_stopword_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let stopwords = load_stopwords(path)?;
        tracing::debug!(count = stopwords.len(), "loaded stopwords");
        Ok(Self::new(stopwords))
    }

    pub fn is_stopword(&self, token: &str) -> bool { self.stopwords.contains(token) }

    /// NFKC normalize, strip punctuation, lowercase, split on whitespace, drop
    /// stopwords and stem what is left.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let normalized = text.nfkc().collect::<String>();
        let cleaned = PUNCT.replace_all(&normalized, "").to_lowercase();
        cleaned
            .split_whitespace()
            .filter(|t| !self.is_stopword(t))
            .map(|t| self.stemmer.stem(t).into_owned())
            .collect()
    }

    /// Tokenize `term` and require exactly one token.
    pub fn single_token(&self, term: &str) -> Result<String> {
        let mut tokens = self.tokenize(term);
        if tokens.len() != 1 {
            return Err(SearchError::InvalidQuery { input: term.to_string(), tokens: tokens.len() });
        }
        Ok(tokens.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = Tokenizer::default().tokenize("Running, runner's run!");
        assert_eq!(t[0], "run");
        assert!(t.iter().all(|w| !w.contains('\'')));
    }

    #[test]
    fn empty_and_noise_only_inputs() {
        let t = Tokenizer::default();
        assert!(t.tokenize("").is_empty());
        assert!(t.tokenize("  ...!?  ").is_empty());
        assert!(t.tokenize("The and of, the!").is_empty());
    }

    #[test]
    fn single_token_rejects_phrases() {
        let t = Tokenizer::default();
        assert_eq!(t.single_token("Bears").unwrap(), "bear");
        assert!(matches!(t.single_token("grizzly bears"), Err(SearchError::InvalidQuery { tokens: 2, .. })));
        assert!(matches!(t.single_token("the"), Err(SearchError::InvalidQuery { tokens: 0, .. })));
    }

    #[test]
    fn custom_stopwords_replace_defaults() {
        let t = Tokenizer::new(["bear".to_string()].into_iter().collect());
        assert_eq!(t.tokenize("the bear"), vec!["the".to_string()]);
    }
}
