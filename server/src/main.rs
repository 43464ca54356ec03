use anyhow::Result;
use axum::Router;
use clap::Parser;
use reelfuse_core::config::DEFAULT_EMBED_MODEL;
use reelfuse_core::{select_embedder, CachePaths, SearchError, Tokenizer};
use reelfuse_server::{build_app, open_engine, AppState, RebuildSource};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Cache directory path
    #[arg(long, env = "REELFUSE_CACHE_DIR", default_value = "./cache")]
    cache_dir: PathBuf,
    /// Corpus used by /admin/rebuild
    #[arg(long, default_value = "./data/movies.json")]
    corpus: PathBuf,
    #[arg(long, default_value = "./data/stopwords.txt")]
    stopwords: PathBuf,
    #[arg(long, env = "REELFUSE_EMBED_URL")]
    embed_url: Option<String>,
    #[arg(long, env = "REELFUSE_EMBED_MODEL", default_value = DEFAULT_EMBED_MODEL)]
    embed_model: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

// The embedding client is blocking, so it is created (and finally dropped)
// outside the async runtime.
fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let tokenizer = if args.stopwords.exists() {
        Arc::new(Tokenizer::from_stopword_file(&args.stopwords)?)
    } else {
        tracing::warn!(path = %args.stopwords.display(), "stopword file not found, using built-in list");
        Arc::new(Tokenizer::default())
    };
    let embedder = select_embedder(args.embed_url.as_deref(), &args.embed_model, tokenizer.clone())?;
    let source = RebuildSource { corpus: args.corpus.clone(), tokenizer, embedder: embedder.clone() };
    let paths = CachePaths::new(&args.cache_dir);
    let engine = match open_engine(&paths, &source) {
        Ok(engine) => engine,
        Err(SearchError::CacheBlocked(status)) => {
            anyhow::bail!("cache at {} is {status}. {}", args.cache_dir.display(), status.remedy())
        }
        Err(e) => return Err(e.into()),
    };
    let state = AppState::new(engine, paths, source, std::env::var("ADMIN_TOKEN").ok());
    let app: Router = build_app(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async move {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "server listening");
        axum::serve(listener, app).await?;
        Ok::<_, anyhow::Error>(())
    })?;
    drop(runtime);
    drop(embedder);
    Ok(())
}
