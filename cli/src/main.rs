use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use reelfuse_core::config::{
    BM25_B, BM25_K1, DEFAULT_ALPHA, DEFAULT_EMBED_MODEL, DEFAULT_HYBRID_LIMIT, DEFAULT_SEARCH_LIMIT, LLM_TIMEOUT, RRF_K,
};
use reelfuse_core::corpus::load_corpus;
use reelfuse_core::llm::DEFAULT_LLM_MODEL;
use reelfuse_core::{
    build_cache, check_cache_integrity, select_embedder, CachePaths, CacheStatus, DocId, Embedder, EnhanceMethod, Engine,
    GeminiClient, RerankMethod, RetryPolicy, RrfOptions, SearchError, TextGenerator, Tokenizer,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "reelfuse")]
#[command(about = "Hybrid BM25 + semantic movie search", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Directory holding the index and embedding artifacts
    #[arg(long, global = true, env = "REELFUSE_CACHE_DIR", default_value = "./cache")]
    cache_dir: PathBuf,
    /// Movie corpus, a JSON object with a "movies" array
    #[arg(long, global = true, default_value = "./data/movies.json")]
    corpus: PathBuf,
    /// Newline-delimited stopword list; the built-in English list is used if absent
    #[arg(long, global = true, default_value = "./data/stopwords.txt")]
    stopwords: PathBuf,
    /// Embedding service base URL (Ollama-compatible). Offline hashing embedder when unset
    #[arg(long, global = true, env = "REELFUSE_EMBED_URL")]
    embed_url: Option<String>,
    #[arg(long, global = true, env = "REELFUSE_EMBED_MODEL", default_value = DEFAULT_EMBED_MODEL)]
    embed_model: String,
    /// Enables query enhancement and reranking
    #[arg(long, global = true, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,
    #[arg(long, global = true, default_value = DEFAULT_LLM_MODEL)]
    llm_model: String,
}

#[derive(Subcommand)]
enum Command {
    /// Build the index and chunk embeddings from the corpus
    Build,
    /// Keyword search, documents matching any query token
    Search {
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Raw term frequency of a term in a document
    Tf { doc_id: DocId, term: String },
    /// TF-IDF of a term in a document
    Tfidf { doc_id: DocId, term: String },
    /// Classic inverse document frequency of a term
    Idf { term: String },
    /// BM25 inverse document frequency of a term
    Bm25idf { term: String },
    /// Saturated, length-normalized BM25 term frequency
    Bm25tf {
        doc_id: DocId,
        term: String,
        #[arg(long, default_value_t = BM25_K1)]
        k1: f64,
        #[arg(long, default_value_t = BM25_B)]
        b: f64,
    },
    /// Full-corpus BM25 ranking
    Bm25search {
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Hybrid search blending normalized BM25 and semantic scores
    WeightedSearch {
        query: String,
        #[arg(long, default_value_t = DEFAULT_ALPHA)]
        alpha: f64,
        #[arg(long, default_value_t = DEFAULT_HYBRID_LIMIT)]
        limit: usize,
    },
    /// Hybrid search with Reciprocal Rank Fusion
    RrfSearch {
        query: String,
        #[arg(long, default_value_t = RRF_K)]
        k: f64,
        #[arg(long, default_value_t = DEFAULT_HYBRID_LIMIT)]
        limit: usize,
        /// spell, rewrite or expand
        #[arg(long)]
        enhance: Option<EnhanceMethod>,
        /// individual or batch
        #[arg(long)]
        rerank: Option<RerankMethod>,
    },
    /// Report the cache state
    Status,
    /// Check that the embedding service answers
    Verify,
}

fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match run(&cli.global, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<SearchError>() {
                Some(SearchError::CacheBlocked(status)) => {
                    eprintln!("Cache is {status}. {}", status.remedy());
                }
                _ => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(global: &GlobalArgs, command: Command) -> Result<()> {
    match command {
        Command::Build => cmd_build(global),
        Command::Search { query, limit } => cmd_search(global, &query, limit),
        Command::Tf { doc_id, term } => cmd_tf(global, doc_id, &term),
        Command::Tfidf { doc_id, term } => cmd_tfidf(global, doc_id, &term),
        Command::Idf { term } => cmd_idf(global, &term),
        Command::Bm25idf { term } => cmd_bm25idf(global, &term),
        Command::Bm25tf { doc_id, term, k1, b } => cmd_bm25tf(global, doc_id, &term, k1, b),
        Command::Bm25search { query, limit } => cmd_bm25search(global, &query, limit),
        Command::WeightedSearch { query, alpha, limit } => cmd_weighted_search(global, &query, alpha, limit),
        Command::RrfSearch { query, k, limit, enhance, rerank } => {
            cmd_rrf_search(global, &query, k, limit, enhance, rerank)
        }
        Command::Status => cmd_status(global),
        Command::Verify => cmd_verify(global),
    }
}

fn tokenizer(global: &GlobalArgs) -> Result<Arc<Tokenizer>> {
    if global.stopwords.exists() {
        return Ok(Arc::new(Tokenizer::from_stopword_file(&global.stopwords)?));
    }
    tracing::warn!(path = %global.stopwords.display(), "stopword file not found, using built-in list");
    Ok(Arc::new(Tokenizer::default()))
}

fn embedder(global: &GlobalArgs, tokenizer: Arc<Tokenizer>) -> Result<Arc<dyn Embedder>> {
    Ok(select_embedder(global.embed_url.as_deref(), &global.embed_model, tokenizer)?)
}

fn open_engine(global: &GlobalArgs) -> Result<Engine> {
    Ok(Engine::open(CachePaths::new(&global.cache_dir), tokenizer(global)?)?)
}

fn open_hybrid_engine(global: &GlobalArgs) -> Result<Engine> {
    let tokenizer = tokenizer(global)?;
    let embedder = embedder(global, tokenizer.clone())?;
    Ok(Engine::open(CachePaths::new(&global.cache_dir), tokenizer)?.with_semantic(embedder)?)
}

fn cmd_build(global: &GlobalArgs) -> Result<()> {
    println!("Building cache in {} ....", global.cache_dir.display());
    let tokenizer = tokenizer(global)?;
    let corpus = load_corpus(&global.corpus)?;
    let embedder = embedder(global, tokenizer.clone())?;
    let start = std::time::Instant::now();
    let status = build_cache(&CachePaths::new(&global.cache_dir), corpus, tokenizer, Some(embedder))?;
    tracing::info!(elapsed_s = start.elapsed().as_secs_f64(), "build finished");
    println!("Cache status: {status}");
    Ok(())
}

fn cmd_search(global: &GlobalArgs, query: &str, limit: usize) -> Result<()> {
    println!("Searching For: {query} ....");
    let results = open_engine(global)?.search(query, limit);
    if results.is_empty() {
        println!("No results found.");
    }
    for (i, doc) in results.iter().enumerate() {
        println!("{}. {}", i + 1, doc.title);
    }
    Ok(())
}

fn cmd_tf(global: &GlobalArgs, doc_id: DocId, term: &str) -> Result<()> {
    println!("Finding term frequency for: {term} ....");
    let tf = open_engine(global)?.term_frequency(doc_id, term);
    println!("Term Frequency of '{term}' in Document ID {doc_id}: {tf}");
    Ok(())
}

fn cmd_tfidf(global: &GlobalArgs, doc_id: DocId, term: &str) -> Result<()> {
    println!("Finding tfidf for: {term} ....");
    let score = open_engine(global)?.tf_idf(doc_id, term);
    println!("TF-IDF score of '{term}' in document '{doc_id}': {score:.2}");
    Ok(())
}

fn cmd_idf(global: &GlobalArgs, term: &str) -> Result<()> {
    println!("Calculating the idf value for term {term} ....");
    let idf = open_engine(global)?.idf(term);
    println!("Inverse document frequency of '{term}': {idf:.2}");
    Ok(())
}

fn cmd_bm25idf(global: &GlobalArgs, term: &str) -> Result<()> {
    println!("Calculating the bm25_idf value for term {term} ....");
    let idf = open_engine(global)?.bm25_idf(term);
    println!("BM25 Inverse document frequency of '{term}': {idf:.2}");
    Ok(())
}

fn cmd_bm25tf(global: &GlobalArgs, doc_id: DocId, term: &str, k1: f64, b: f64) -> Result<()> {
    println!("Calculating the bm25_tf value for term {term} ....");
    let tf = open_engine(global)?.bm25_tf(doc_id, term, k1, b)?;
    println!("BM25 TF score of '{term}' in document '{doc_id}': {tf:.2}");
    Ok(())
}

fn cmd_bm25search(global: &GlobalArgs, query: &str, limit: usize) -> Result<()> {
    println!("searching results for term {query} ....");
    let hits = open_engine(global)?.bm25_search(query, limit);
    if hits.is_empty() {
        println!("No results found.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. ({}) {} - Score: {:.2}", i + 1, hit.doc_id, hit.title, hit.score);
    }
    Ok(())
}

fn cmd_weighted_search(global: &GlobalArgs, query: &str, alpha: f64, limit: usize) -> Result<()> {
    println!("Weighted search for: {query} (alpha {alpha:.2}) ....");
    let hits = open_hybrid_engine(global)?.weighted_search(query, alpha, limit)?;
    if hits.is_empty() {
        println!("No results found.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. ({}) {} - Score: {:.2}", i + 1, hit.document.id, hit.document.title, hit.score.hybrid_score);
        println!("   BM25: {:.2}, Semantic: {:.2}", hit.score.keyword_score, hit.score.semantic_score);
    }
    Ok(())
}

fn cmd_rrf_search(
    global: &GlobalArgs,
    query: &str,
    k: f64,
    limit: usize,
    enhance: Option<EnhanceMethod>,
    rerank: Option<RerankMethod>,
) -> Result<()> {
    println!("RRF search for: {query} (k {k}) ....");
    let engine = open_hybrid_engine(global)?;
    let generator = match &global.gemini_api_key {
        Some(key) => Some(GeminiClient::new(key.as_str(), global.llm_model.as_str(), LLM_TIMEOUT)?),
        None => {
            if enhance.is_some() || rerank.is_some() {
                tracing::warn!("GEMINI_API_KEY is not set, skipping enhancement and reranking");
            }
            None
        }
    };
    let opts = RrfOptions {
        generator: generator.as_ref().map(|g| g as &dyn TextGenerator),
        enhance,
        rerank,
        retry: RetryPolicy::default(),
    };
    let hits = engine.rrf_search_with(query, k, limit, opts)?;
    if hits.is_empty() {
        println!("No results found.");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. ({}) {} - Score: {:.4}", i + 1, hit.document.id, hit.document.title, hit.score.rrf_score);
        let rank = |r: Option<usize>| r.map_or_else(|| "-".to_string(), |r| r.to_string());
        println!("   BM25 rank: {}, Semantic rank: {}", rank(hit.score.keyword_rank), rank(hit.score.semantic_rank));
    }
    Ok(())
}

fn cmd_status(global: &GlobalArgs) -> Result<()> {
    let paths = CachePaths::new(&global.cache_dir);
    let status = check_cache_integrity(&paths);
    println!("Cache at {}: {status}", global.cache_dir.display());
    if status != CacheStatus::Built {
        return Err(SearchError::CacheBlocked(status).into());
    }
    let engine = open_engine(global)?;
    let index = engine.index();
    println!("Documents: {}", index.num_docs());
    println!("Terms: {}", index.num_terms());
    println!("Average document length: {:.2}", index.avg_doc_length());
    Ok(())
}

fn cmd_verify(global: &GlobalArgs) -> Result<()> {
    println!("verifying model.....");
    let embedder = embedder(global, tokenizer(global)?)?;
    let vector = embedder.embed("verification sample")?;
    match &global.embed_url {
        Some(url) => println!("Model loaded: {} at {url}", global.embed_model),
        None => println!("Model loaded: offline hashing embedder"),
    }
    println!("Embedding dimension: {}", vector.len());
    Ok(())
}
