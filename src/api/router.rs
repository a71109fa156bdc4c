//! HTTP router and handlers

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, cors::CorsLayer,
    trace::TraceLayer,
};
use tracing::{debug, error, warn};

use crate::assemble::Assembler;
use crate::cache::SnapshotCache;
use crate::error::Error;
use crate::insights::{dominance, exclude_protocols, filter_protocols};
use crate::registry::normalize_list;
use crate::request::RequestCache;

/// Shared application state
pub struct AppState {
    /// Overview / detail assembler
    pub assembler: Arc<Assembler>,
    /// Response snapshots, `None` when caching is disabled
    pub snapshots: Option<SnapshotCache>,
    /// Process start, for `/health`
    pub started_at: Instant,
}

impl AppState {
    /// Create state around an assembler
    #[must_use]
    pub fn new(assembler: Arc<Assembler>, snapshots: Option<SnapshotCache>) -> Self {
        Self {
            assembler,
            snapshots,
            started_at: Instant::now(),
        }
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/overview", get(overview_handler))
        .route("/protocols", get(protocols_handler))
        .route("/protocols/{id}", get(protocol_handler))
        .route("/dominance", get(dominance_handler))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error answered as `{ "error": ... }`
#[derive(Debug)]
pub enum ApiError {
    /// Core failure, status from [`Error::status_code`]
    Core(Error),
    /// Unknown resource
    NotFound(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Core(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Core(e) => {
                let status = e.status_code();
                if e.is_upstream() {
                    warn!(error = %e, "Upstream failure");
                } else {
                    error!(error = %e, "Request failed");
                }
                (status, e.to_string())
            }
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult = std::result::Result<Json<Value>, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct OverviewQuery {
    exclude: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolsQuery {
    category: Option<String>,
    sub_category: Option<String>,
}

fn list_param(raw: Option<&str>) -> Vec<String> {
    raw.map(normalize_list).unwrap_or_default()
}

/// Serve `key` from the snapshot cache or compute and store it
async fn cached<T, F, Fut>(state: &AppState, key: &str, compute: F) -> ApiResult
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    if let Some(hit) = state.snapshots.as_ref().and_then(|c| c.get(key)) {
        debug!(key, "Snapshot cache hit");
        return Ok(Json(hit));
    }

    let value = serde_json::to_value(compute().await?).map_err(Error::from)?;
    if let Some(snapshots) = &state.snapshots {
        snapshots.set(key, value.clone());
    }
    Ok(Json(value))
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.assembler.sources().health();
    let healthy = health.all_healthy();

    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "upstreams": health.snapshot(),
        "cache": state.snapshots.as_ref().map(SnapshotCache::stats),
    }))
}

/// GET /overview?exclude=A,B
async fn overview_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OverviewQuery>,
) -> ApiResult {
    let excluded = list_param(query.exclude.as_deref());
    let key = SnapshotCache::build_key("overview", &[("exclude", excluded.as_slice())]);

    let assembler = &state.assembler;
    let excluded = &excluded;
    cached(&state, &key, move || async move {
        let overview = assembler.assemble_overview(&RequestCache::new()).await?;
        Ok::<_, Error>(if excluded.is_empty() {
            overview
        } else {
            exclude_protocols(&overview, excluded)
        })
    })
    .await
}

/// GET /protocols?category=..&subCategory=..
async fn protocols_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProtocolsQuery>,
) -> ApiResult {
    let categories = list_param(query.category.as_deref());
    let sub_categories = list_param(query.sub_category.as_deref());
    let key = SnapshotCache::build_key(
        "protocols",
        &[
            ("category", categories.as_slice()),
            ("subCategory", sub_categories.as_slice()),
        ],
    );

    let assembler = &state.assembler;
    let (categories, sub_categories) = (&categories, &sub_categories);
    cached(&state, &key, move || async move {
        let overview = assembler.assemble_overview(&RequestCache::new()).await?;
        Ok::<_, Error>(filter_protocols(
            &overview.protocols,
            categories,
            sub_categories,
        ))
    })
    .await
}

/// GET /protocols/{id}
async fn protocol_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let key = format!("protocols/{id}");
    if let Some(hit) = state.snapshots.as_ref().and_then(|c| c.get(&key)) {
        return Ok(Json(hit));
    }

    let detail = state
        .assembler
        .assemble_detail(&RequestCache::new(), &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Protocol not found: {id}")))?;
    let value = serde_json::to_value(detail).map_err(Error::from)?;
    if let Some(snapshots) = &state.snapshots {
        snapshots.set(&key, value.clone());
    }
    Ok(Json(value))
}

/// GET /dominance
async fn dominance_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let assembler = &state.assembler;
    cached(&state, "dominance", move || async move {
        let overview = assembler.assemble_overview(&RequestCache::new()).await?;
        Ok::<_, Error>(dominance(&overview))
    })
    .await
}
