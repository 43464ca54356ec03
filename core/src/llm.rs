//! Text-generation adapter and the two steps built on it: query enhancement
//! before search and reranking after fusion.
//!
//! Neither step can fail a search. On any adapter error enhancement returns
//! the trimmed original query and reranking returns the input order.

use crate::document::{DocId, Document};
use crate::error::{AdapterError, Result};
use crate::retry::RetryPolicy;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

lazy_static! {
    static ref INTEGER: Regex = Regex::new(r"\d+").expect("valid regex");
}

pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_LLM_MODEL: &str = "gemini-2.5-flash";

/// A prompt-in, text-out service.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> std::result::Result<String, AdapterError>;
}

pub fn generate_with_retry(generator: &dyn TextGenerator, prompt: &str, policy: &RetryPolicy) -> std::result::Result<String, AdapterError> {
    policy.run(|| generator.generate(prompt))
}

pub struct GeminiClient {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AdapterError::from)?;
        Ok(Self { client, api_key: api_key.into(), model: model.into() })
    }
}

impl TextGenerator for GeminiClient {
    fn generate(&self, prompt: &str) -> std::result::Result<String, AdapterError> {
        let url = format!("{GEMINI_ENDPOINT}/{}:generateContent", self.model);
        let body = GenerateRequest { contents: [Content { parts: [Part { text: prompt }] }] };
        let resp: GenerateResponse = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;
        let text: String = resp
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        Ok(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhanceMethod {
    Spell,
    Rewrite,
    Expand,
}

impl FromStr for EnhanceMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spell" => Ok(Self::Spell),
            "rewrite" => Ok(Self::Rewrite),
            "expand" => Ok(Self::Expand),
            other => Err(format!("unknown enhance method '{other}', expected spell, rewrite or expand")),
        }
    }
}

impl fmt::Display for EnhanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Spell => "spell",
            Self::Rewrite => "rewrite",
            Self::Expand => "expand",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankMethod {
    /// One 0-10 relevance prompt per result.
    Individual,
    /// One prompt asking for the whole list reordered.
    Batch,
}

impl FromStr for RerankMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "individual" => Ok(Self::Individual),
            "batch" => Ok(Self::Batch),
            other => Err(format!("unknown rerank method '{other}', expected individual or batch")),
        }
    }
}

impl fmt::Display for RerankMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Individual => "individual",
            Self::Batch => "batch",
        })
    }
}

pub fn enhance_prompt(query: &str, method: EnhanceMethod) -> String {
    match method {
        EnhanceMethod::Spell => format!(
            "Fix any spelling errors in this movie search query.\n\
             Only correct obvious typos and leave correctly spelled words alone.\n\n\
             Query: \"{query}\"\n\n\
             If there are no errors, return the query unchanged.\n\
             Corrected:"
        ),
        EnhanceMethod::Rewrite => format!(
            "Rewrite this movie search query so it is specific and easy to search for.\n\n\
             Original: \"{query}\"\n\n\
             Use common movie knowledge (well-known actors, famous films) and genre conventions.\n\
             Keep it under 10 words, in the style of a web search query, without boolean operators.\n\n\
             Example: \"that bear movie where leo gets attacked\" -> \"The Revenant Leonardo DiCaprio bear attack\"\n\n\
             Rewritten query:"
        ),
        EnhanceMethod::Expand => format!(
            "Expand this movie search query with related terms.\n\
             Add synonyms and related concepts likely to appear in movie descriptions, staying focused.\n\n\
             Example: \"scary bear movie\" -> \"scary horror grizzly bear movie terrifying film\"\n\n\
             Query: \"{query}\"\n\
             Expanded query:"
        ),
    }
}

/// Rewrite the query with the generator. Never fails.
pub fn enhance_query(generator: &dyn TextGenerator, query: &str, method: Option<EnhanceMethod>, policy: &RetryPolicy) -> String {
    let original = query.trim();
    let Some(method) = method else { return original.to_string() };
    match generate_with_retry(generator, &enhance_prompt(original, method), policy) {
        Ok(text) if !text.trim().is_empty() => {
            let enhanced = text.trim().to_string();
            tracing::info!(%method, original, enhanced = %enhanced, "enhanced query");
            enhanced
        }
        Ok(_) => {
            tracing::warn!(%method, "empty enhancement, keeping original query");
            original.to_string()
        }
        Err(e) => {
            tracing::warn!(%method, error = %e, "query enhancement failed, keeping original query");
            original.to_string()
        }
    }
}

/// Anything a reranker can reorder.
pub trait Rerankable {
    fn doc_id(&self) -> DocId;
    fn document(&self) -> &Document;
}

pub fn individual_rating_prompt(query: &str, doc: &Document) -> String {
    format!(
        "Rate how well this movie matches the search query.\n\n\
         Query: \"{query}\"\n\
         Movie: {} - {}\n\n\
         Consider direct relevance and what the user is looking for.\n\
         Rate 0-10 (10 = perfect match). Reply with ONLY the number.\n\n\
         Score:",
        doc.title, doc.description
    )
}

pub fn batch_rating_prompt<T: Rerankable>(query: &str, items: &[T]) -> String {
    let listing: Vec<String> = items
        .iter()
        .map(|i| format!("{}: {} - {}", i.doc_id(), i.document().title, i.document().description))
        .collect();
    format!(
        "Rank these movies by relevance to the search query.\n\n\
         Query: \"{query}\"\n\n\
         Movies:\n{}\n\n\
         Return ONLY the ids in order of relevance, best match first, as a JSON list of integers, e.g. [12, 34, 56].",
        listing.join("\n")
    )
}

/// A 0-10 rating; anything unparsable counts as 0.
pub fn parse_score(text: &str) -> f64 {
    text.trim().parse::<f64>().ok().filter(|s| s.is_finite()).unwrap_or(0.0)
}

/// A JSON list of ids, or failing that every integer in the text.
pub fn parse_id_list(text: &str) -> Vec<DocId> {
    if let Ok(ids) = serde_json::from_str::<Vec<DocId>>(text.trim()) {
        return ids;
    }
    INTEGER.find_iter(text).filter_map(|m| m.as_str().parse().ok()).collect()
}

/// Reorder `items` with the generator. Only ever reorders or drops items.
pub fn rerank_results<T: Rerankable>(
    generator: &dyn TextGenerator,
    query: &str,
    items: Vec<T>,
    method: RerankMethod,
    policy: &RetryPolicy,
) -> Vec<T> {
    if items.is_empty() { return items; }
    let query = query.trim();
    match method {
        RerankMethod::Individual => {
            let mut scores = Vec::with_capacity(items.len());
            for item in &items {
                match generate_with_retry(generator, &individual_rating_prompt(query, item.document()), policy) {
                    Ok(text) => scores.push(parse_score(&text)),
                    Err(e) => {
                        tracing::warn!(doc_id = item.doc_id(), error = %e, "rerank rating failed, keeping fused order");
                        return items;
                    }
                }
            }
            let mut scored: Vec<(f64, T)> = scores.into_iter().zip(items).collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            scored.into_iter().map(|(_, item)| item).collect()
        }
        RerankMethod::Batch => {
            let ids = match generate_with_retry(generator, &batch_rating_prompt(query, &items), policy) {
                Ok(text) => parse_id_list(&text),
                Err(e) => {
                    tracing::warn!(error = %e, "batch rerank failed, keeping fused order");
                    return items;
                }
            };
            tracing::debug!(?ids, "batch rerank order");
            let fused_order: Vec<DocId> = items.iter().map(|i| i.doc_id()).collect();
            let mut by_id: HashMap<DocId, T> = items.into_iter().map(|i| (i.doc_id(), i)).collect();
            let reordered: Vec<T> = ids.into_iter().filter_map(|id| by_id.remove(&id)).collect();
            if reordered.is_empty() {
                tracing::warn!("batch rerank named no known ids, keeping fused order");
                return fused_order.into_iter().filter_map(|id| by_id.remove(&id)).collect();
            }
            reordered
        }
    }
}
