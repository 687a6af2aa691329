//! HTTP server for proxy endpoints
//!
//! Provides /health and /resolve?src=<url>.

use crate::fetcher::DataUriFetcher;
use crate::types::{HealthResponse, ResolveQuery, StateBody};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use basement::{Basement, BasementError, BoundedCache, FsStore, Options, ResultState};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use url::Url;

/// Bounded tier over the on-disk store
pub type ImageCache = BoundedCache<String, FsStore<String>>;

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: Arc<ImageCache>,
    pub basement: Basement<String, String>,
    pub fetcher: DataUriFetcher,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: ImageCache, fetcher: DataUriFetcher) -> Self {
        let cache = Arc::new(cache);
        let basement = Basement::new(Options::new(Arc::clone(&cache)));
        Self {
            cache,
            basement,
            fetcher,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/resolve", get(resolve))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.cache.stats(),
    })
}

/// Resolve a remote URL to a cached data URI
async fn resolve(
    State(state): State<SharedState>,
    Query(query): Query<ResolveQuery>,
) -> Response {
    if let Some(src) = &query.src {
        if let Err(err) = validate_src(src) {
            return error_response(&query, err);
        }
    }

    let fetched = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fetched);
    let fetcher = state.fetcher.clone();

    let outcome = state
        .basement
        .resolve(query.src.as_ref(), move |src| {
            flag.store(true, Ordering::Relaxed);
            async move { fetcher.fetch(&src).await }
        })
        .await;

    match outcome {
        Ok(result) => {
            let cache_header = if fetched.load(Ordering::Relaxed) {
                "MISS"
            } else {
                "HIT"
            };
            let body = StateBody::from(&ResultState::Ready(result));
            ([("X-Cache", cache_header)], Json(body)).into_response()
        }
        Err(err) => error_response(&query, err),
    }
}

fn error_response(query: &ResolveQuery, err: BasementError) -> Response {
    warn!(src = ?query.src, error = %err, "Failed to resolve");

    let status = match err {
        BasementError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    let body = StateBody::from(&ResultState::<String>::Error(err));
    (status, Json(body)).into_response()
}

/// Only absolute http(s) URLs are fetched
fn validate_src(src: &str) -> basement::Result<()> {
    let url = Url::parse(src)
        .map_err(|e| BasementError::Validation(format!("Invalid src {src:?}: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(BasementError::Validation(format!(
            "Unsupported src scheme {other:?}"
        ))),
    }
}
