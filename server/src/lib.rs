use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use parking_lot::{Mutex, RwLock};
use reelfuse_core::config::{DEFAULT_ALPHA, DEFAULT_HYBRID_LIMIT, RRF_K};
use reelfuse_core::corpus::load_corpus;
use reelfuse_core::{
    build_cache, check_cache_integrity, CachePaths, CacheStatus, DocId, Document, Embedder, Engine, LexicalHit, RrfHit,
    SearchError, Tokenizer, WeightedHit,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const MAX_K: usize = 100;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { DEFAULT_HYBRID_LIMIT }

#[derive(Deserialize)]
pub struct WeightedParams {
    pub q: String,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_alpha() -> f64 { DEFAULT_ALPHA }

#[derive(Deserialize)]
pub struct RrfParams {
    pub q: String,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_rrf_k() -> f64 { RRF_K }

#[derive(Serialize)]
pub struct SearchResponse<T> {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<T>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: CacheStatus,
    pub num_docs: usize,
    pub num_terms: usize,
    pub avg_doc_length: f64,
    pub chunks: Option<usize>,
}

/// Everything needed to rebuild the cache from scratch.
pub struct RebuildSource {
    pub corpus: PathBuf,
    pub tokenizer: Arc<Tokenizer>,
    pub embedder: Arc<dyn Embedder>,
}

/// Readers clone the current `Arc<Engine>` and release the lock at once; a
/// rebuild prepares a complete engine before swapping it in.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<RwLock<Arc<Engine>>>,
    paths: CachePaths,
    source: Arc<RebuildSource>,
    rebuilding: Arc<Mutex<()>>,
    admin_token: Option<String>,
}

impl AppState {
    pub fn new(engine: Engine, paths: CachePaths, source: RebuildSource, admin_token: Option<String>) -> Self {
        Self {
            engine: Arc::new(RwLock::new(Arc::new(engine))),
            paths,
            source: Arc::new(source),
            rebuilding: Arc::new(Mutex::new(())),
            admin_token,
        }
    }

    pub fn engine(&self) -> Arc<Engine> { self.engine.read().clone() }
}

/// Open the built cache with the semantic ranker attached.
pub fn open_engine(paths: &CachePaths, source: &RebuildSource) -> reelfuse_core::Result<Engine> {
    Engine::open(paths.clone(), source.tokenizer.clone())?.with_semantic(source.embedder.clone())
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/bm25/search", get(bm25_handler))
        .route("/hybrid/weighted", get(weighted_handler))
        .route("/hybrid/rrf", get(rrf_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/status", get(status_handler))
        .route("/admin/rebuild", post(rebuild_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

type ApiError = (StatusCode, String);

fn api_error(e: SearchError) -> ApiError {
    let code = match &e {
        SearchError::InvalidQuery { .. } | SearchError::Configuration(_) => StatusCode::BAD_REQUEST,
        SearchError::UnknownDocument(_) => StatusCode::NOT_FOUND,
        SearchError::CacheBlocked(_) | SearchError::CacheCorrupt { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SearchError::Adapter(_) => StatusCode::BAD_GATEWAY,
        SearchError::DataAccess { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if code.is_server_error() {
        tracing::error!(error = %e, "request failed");
    }
    (code, e.to_string())
}

/// Engine calls may block on the embedding service, so they run off the
/// async workers.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Engine) -> reelfuse_core::Result<T> + Send + 'static,
{
    let engine = state.engine();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(api_error)
}

fn respond<T>(query: String, start: std::time::Instant, results: Vec<T>) -> Json<SearchResponse<T>> {
    Json(SearchResponse { query, took_s: start.elapsed().as_secs_f64(), total_hits: results.len(), results })
}

fn clamp_k(k: usize) -> usize { k.clamp(1, MAX_K) }

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse<Document>>, ApiError> {
    let start = std::time::Instant::now();
    let k = clamp_k(params.k);
    let q = params.q.clone();
    let results = blocking(&state, move |e| Ok(e.search(&q, k))).await?;
    Ok(respond(params.q, start, results))
}

pub async fn bm25_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse<LexicalHit>>, ApiError> {
    let start = std::time::Instant::now();
    let k = clamp_k(params.k);
    let q = params.q.clone();
    let results = blocking(&state, move |e| Ok(e.bm25_search(&q, k))).await?;
    Ok(respond(params.q, start, results))
}

pub async fn weighted_handler(
    State(state): State<AppState>,
    Query(params): Query<WeightedParams>,
) -> Result<Json<SearchResponse<WeightedHit>>, ApiError> {
    let start = std::time::Instant::now();
    let (k, alpha) = (clamp_k(params.k), params.alpha);
    let q = params.q.clone();
    let results = blocking(&state, move |e| e.weighted_search(&q, alpha, k)).await?;
    Ok(respond(params.q, start, results))
}

pub async fn rrf_handler(
    State(state): State<AppState>,
    Query(params): Query<RrfParams>,
) -> Result<Json<SearchResponse<RrfHit>>, ApiError> {
    let start = std::time::Instant::now();
    let (k, rrf_k) = (clamp_k(params.k), params.rrf_k);
    let q = params.q.clone();
    let results = blocking(&state, move |e| e.rrf_search(&q, rrf_k, k)).await?;
    Ok(respond(params.q, start, results))
}

pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<DocId>) -> Result<Json<Document>, ApiError> {
    state
        .engine()
        .document(doc_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(SearchError::UnknownDocument(doc_id)))
}

pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let engine = state.engine();
    let index = engine.index();
    Json(StatusResponse {
        // on-disk state; the served engine stays up even if the files break
        status: check_cache_integrity(&state.paths),
        num_docs: index.num_docs(),
        num_terms: index.num_terms(),
        avg_doc_length: index.avg_doc_length(),
        chunks: engine.semantic().map(|s| s.total_chunks()),
    })
}

async fn rebuild_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<StatusResponse>, ApiError> {
    authorize(&state, &headers)?;
    let worker = state.clone();
    let fresh = tokio::task::spawn_blocking(move || -> Result<Option<Engine>, SearchError> {
        let Some(_guard) = worker.rebuilding.try_lock() else { return Ok(None) };
        let source = &worker.source;
        let corpus = load_corpus(&source.corpus)?;
        build_cache(&worker.paths, corpus, source.tokenizer.clone(), Some(source.embedder.clone()))?;
        open_engine(&worker.paths, source).map(Some)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
    .map_err(api_error)?;

    let Some(fresh) = fresh else {
        return Err((StatusCode::CONFLICT, "a rebuild is already running".into()));
    };
    tracing::info!(num_docs = fresh.index().num_docs(), "swapping in rebuilt index");
    *state.engine.write() = Arc::new(fresh);
    Ok(status_handler(State(state)).await)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
