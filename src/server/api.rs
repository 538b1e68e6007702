//! HTTP API over the cached data source.
//!
//! Query routes:
//! - GET /v1/databases/{db}/tables
//! - GET /v1/databases/{db}/tables/{table}/metadata
//! - POST /v1/databases/{db}/tables/{table}/data
//! - GET /v1/databases/{db}/files/{*path}
//!
//! Administrative routes:
//! - GET /health
//! - GET /metrics
//! - GET /v1/cache/stats
//! - DELETE /v1/cache/databases/{db}
//! - DELETE /v1/cache/databases/{db}/tables/{table}

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::data_source::{CachedDataSource, DataOutcome};
use crate::cache::database_cache::CacheStats;
use crate::error::{CacheError, SourceError};
use crate::table::ids::{DatabaseId, FileRef};
use crate::table::map::TableMap;
use crate::table::metadata::{DataValue, DimensionSelection, Metadata};

/// Application state shared across handlers.
pub struct AppState {
    pub source: Arc<CachedDataSource>,
    pub request_timeout: Duration,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(source: Arc<CachedDataSource>, request_timeout: Duration) -> Self {
        Self {
            source,
            request_timeout,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache/databases/{db}", delete(clear_database))
        .route("/v1/cache/databases/{db}/tables/{table}", delete(clear_table))
        .route("/v1/databases/{db}/tables", get(list_tables))
        .route("/v1/databases/{db}/tables/{table}/metadata", get(table_metadata))
        .route("/v1/databases/{db}/tables/{table}/data", post(table_data))
        .route("/v1/databases/{db}/files/{*path}", get(auxiliary_file))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─── Errors ────────────────────────────────────────────────────────────────

/// Error returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    Cache(CacheError),
    Timeout,
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Cache(err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            ApiError::Cache(err) => match err {
                CacheError::InvalidIdentifier(_) => (StatusCode::BAD_REQUEST, "invalid_identifier"),
                CacheError::InvalidSelection(_) => (StatusCode::BAD_REQUEST, "invalid_selection"),
                CacheError::Source(source) => match source.as_ref() {
                    SourceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    SourceError::UnknownDatabase(_) => (StatusCode::NOT_FOUND, "unknown_database"),
                    SourceError::Parse(_) => (StatusCode::UNPROCESSABLE_ENTITY, "parse_error"),
                    SourceError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
                },
                CacheError::InvalidState(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_state"),
                CacheError::TaskFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "task_failed"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = match &self {
            ApiError::Cache(err) => err.to_string(),
            ApiError::Timeout => "request timed out".to_string(),
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), kind, error = %message, "Request failed");
        }
        let body = ErrorBody {
            error: message,
            kind: kind.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ─── Request/Response Types ────────────────────────────────────────────────

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub databases: Vec<String>,
    pub cached_entries: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TableListResponse {
    pub database: String,
    pub tables: Vec<String>,
}

/// Data query body. Omitted dimensions select all of their values.
#[derive(Debug, Default, Deserialize)]
pub struct DataQuery {
    #[serde(default)]
    pub selection: Vec<DimensionSelection>,
}

#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub request_id: String,
    pub table: String,
    pub outcome: DataOutcome,
    pub map: TableMap,
    pub values: Vec<DataValue>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub removed: usize,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        databases: state
            .source
            .databases()
            .into_iter()
            .map(String::from)
            .collect(),
        cached_entries: state.source.cache().stats().store.entry_count,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.source.cache().metrics().encode() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.source.cache().stats())
}

async fn clear_database(
    State(state): State<Arc<AppState>>,
    Path(db): Path<String>,
) -> ApiResult<Json<ClearResponse>> {
    let db = DatabaseId::new(db)?;
    let removed = state.source.cache().clear_database(&db);
    Ok(Json(ClearResponse { removed }))
}

async fn clear_table(
    State(state): State<Arc<AppState>>,
    Path((db, table)): Path<(String, String)>,
) -> ApiResult<Json<ClearResponse>> {
    let file = FileRef::parse(&db, &table)?;
    let cache = state.source.cache();
    // Data entries go with their metadata.
    let removed = cache.clear_last_modified(file.clone()) + cache.clear_metadata(file.clone());
    info!(file = %file, removed, "Cleared table cache");
    Ok(Json(ClearResponse { removed }))
}

async fn list_tables(
    State(state): State<Arc<AppState>>,
    Path(db): Path<String>,
) -> ApiResult<Json<TableListResponse>> {
    let db = DatabaseId::new(db)?;
    let files = with_timeout(&state, state.source.get_file_list(&db)).await?;
    Ok(Json(TableListResponse {
        database: db.to_string(),
        tables: files.iter().map(ToString::to_string).collect(),
    }))
}

async fn table_metadata(
    State(state): State<Arc<AppState>>,
    Path((db, table)): Path<(String, String)>,
) -> ApiResult<Json<Metadata>> {
    let file = FileRef::parse(&db, &table)?;
    let metadata = with_timeout(&state, state.source.get_metadata(&file)).await?;
    Ok(Json(metadata.as_ref().clone()))
}

async fn table_data(
    State(state): State<Arc<AppState>>,
    Path((db, table)): Path<(String, String)>,
    Json(query): Json<DataQuery>,
) -> ApiResult<Json<DataResponse>> {
    let request_id = Uuid::new_v4().to_string();
    let file = FileRef::parse(&db, &table)?;

    let metadata = with_timeout(&state, state.source.get_metadata(&file)).await?;
    let map = metadata.resolve_selection(&query.selection)?;

    info!(
        request_id = request_id,
        file = %file,
        cells = map.size(),
        "Data request"
    );

    let (values, outcome) = with_timeout(&state, state.source.get_data_traced(&file, &map)).await?;
    Ok(Json(DataResponse {
        request_id,
        table: file.to_string(),
        outcome,
        map,
        values: values.as_ref().clone(),
    }))
}

async fn auxiliary_file(
    State(state): State<Arc<AppState>>,
    Path((db, path)): Path<(String, String)>,
) -> ApiResult<Bytes> {
    let db = DatabaseId::new(db)?;
    let bytes = with_timeout(&state, state.source.read_auxiliary_file(&db, &path)).await?;
    Ok(bytes)
}

async fn with_timeout<T>(
    state: &AppState,
    fut: impl std::future::Future<Output = Result<T, CacheError>>,
) -> ApiResult<T> {
    match tokio::time::timeout(state.request_timeout, fut).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => {
            warn!(timeout_secs = state.request_timeout.as_secs(), "Request timed out");
            Err(ApiError::Timeout)
        }
    }
}
