//! Route configuration and setup

use crate::constants::{API_PREFIX, BODY_LIMIT_SLACK_BYTES};
use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use stowage_core::Config;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_HTTP_CONCURRENCY_LIMIT: usize = 10_000;

/// Build the application router
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router, anyhow::Error> {
    let cors = setup_cors(config)?;

    let http_concurrency_limit = std::env::var("HTTP_CONCURRENCY_LIMIT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_HTTP_CONCURRENCY_LIMIT)
        .max(1);

    // Chunk bodies are the largest requests we accept
    let body_limit = usize::try_from(config.max_chunk_size_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(BODY_LIMIT_SLACK_BYTES);

    tracing::info!(http_concurrency_limit, body_limit, "HTTP limits configured");

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest(API_PREFIX, api_routes())
        .with_state(state)
        .route(
            "/api/openapi.json",
            get(|| async { Json(crate::api_doc::get_openapi_spec()) }),
        )
        .merge(utoipa_rapidoc::RapiDoc::new("/api/openapi.json").path("/docs"))
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

/// Upload protocol and artifact routes, mounted under the API prefix
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/uploads", post(handlers::uploads::declare_upload))
        .route("/uploads/{upload_id}", get(handlers::uploads::get_upload_status))
        .route(
            "/uploads/{upload_id}/chunks/{chunk_index}",
            put(handlers::uploads::upload_chunk),
        )
        .route("/uploads/{upload_id}/merge", post(handlers::uploads::merge_chunks))
        .route("/artifacts", get(handlers::artifacts::list_artifacts))
        .route(
            "/artifacts/{artifact_id}",
            get(handlers::artifacts::download_artifact),
        )
        .route(
            "/artifacts/{artifact_id}/thumbnail",
            get(handlers::artifacts::artifact_thumbnail),
        )
}

fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];

    let cors = if config.cors_origins().iter().any(|o| o == "*") {
        if config.is_production() {
            tracing::warn!("CORS configured to allow all origins in production");
        }
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
            .expose_headers(Any)
    } else {
        let origins = config
            .cors_origins()
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
            .expose_headers(Any)
    };
    Ok(cors)
}
