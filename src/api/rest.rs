// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::core::schema::CollectionSchema;
use crate::core::storage::{BackendError, PointBatch, QueryRequest, VectorBackend};
use crate::core::types::{ScoredPoint, UpdateResult};
use crate::storage::InMemoryBackend;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size: usize,
    /// Upper bound for a single backend call made by a handler.
    pub timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_request_size: 64 * 1024 * 1024, // full-token pages are large
            timeout: Duration::from_secs(60),
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("PAGE_INDEX_HOST").unwrap_or(defaults.host),
            port: env::var("PAGE_INDEX_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            max_request_size: env::var("PAGE_INDEX_MAX_REQUEST_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_request_size),
            timeout: env::var("PAGE_INDEX_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            cors_origins: env::var("PAGE_INDEX_CORS_ORIGINS")
                .ok()
                .map(|origins| origins.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn VectorBackend>,
    pub timeout: Duration,
}

// Request/Response types
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub collections: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionsResponse {
    pub collections: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UpsertParams {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub points: Vec<ScoredPoint>,
    pub search_time_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Machine-readable error class carried next to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    Timeout,
    Unavailable,
    Internal,
}

// Error handling
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(skip, default = "internal_status")]
    pub status_code: StatusCode,
}

fn internal_status() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

impl ErrorResponse {
    pub fn new(error: String) -> Self {
        Self {
            error,
            kind: ErrorKind::Internal,
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(error: String) -> Self {
        Self {
            error,
            kind: ErrorKind::BadRequest,
            status_code: StatusCode::BAD_REQUEST,
        }
    }

    fn timeout(timeout: Duration) -> Self {
        Self {
            error: format!("backend call exceeded {:?}", timeout),
            kind: ErrorKind::Timeout,
            status_code: StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<BackendError> for ErrorResponse {
    fn from(e: BackendError) -> Self {
        let (kind, status_code) = match &e {
            BackendError::CollectionNotFound(_) => (ErrorKind::NotFound, StatusCode::NOT_FOUND),
            BackendError::CollectionExists(_) => (ErrorKind::Conflict, StatusCode::CONFLICT),
            BackendError::DimensionMismatch { .. }
            | BackendError::InvalidPayload { .. }
            | BackendError::Rejected(_)
            | BackendError::Serialization(_) => (ErrorKind::BadRequest, StatusCode::BAD_REQUEST),
            BackendError::Timeout => (ErrorKind::Timeout, StatusCode::GATEWAY_TIMEOUT),
            BackendError::Connection(_) => (ErrorKind::Unavailable, StatusCode::SERVICE_UNAVAILABLE),
        };
        if status_code.is_server_error() {
            error!(error = %e, "backend failure");
        }
        Self {
            error: e.to_string(),
            kind,
            status_code,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status_code, Json(self)).into_response()
    }
}

/// Serve an empty in-process backend.
pub async fn create_app(config: ApiConfig) -> Result<Router, anyhow::Error> {
    let backend: Arc<dyn VectorBackend> = Arc::new(InMemoryBackend::new());
    info!(timeout = ?config.timeout, "serving in-memory backend");
    Ok(router(backend, &config))
}

pub fn router(backend: Arc<dyn VectorBackend>, config: &ApiConfig) -> Router {
    let state = AppState {
        backend,
        timeout: config.timeout,
    };

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&config.cors_origins))
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        .route("/health", get(health_handler))
        .route("/collections", get(list_collections))
        .route(
            "/collections/:name",
            get(get_collection).put(create_collection).delete(delete_collection),
        )
        .route("/collections/:name/points", put(upsert_points))
        .route("/collections/:name/points/query", post(query_points))
        .route("/collections/:name/points/count", get(count_points));

    Router::new()
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(config.max_request_size))
        .with_state(state)
}

/// Any origin when the list is empty or holds `*`, otherwise exactly the
/// listed ones. Entries that are not valid header values are skipped.
fn allowed_origins(origins: &[String]) -> AllowOrigin {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return AllowOrigin::any();
    }
    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    AllowOrigin::list(values)
}

async fn bounded<T, F>(state: &AppState, call: F) -> Result<T, ErrorResponse>
where
    F: std::future::Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(state.timeout, call).await {
        Ok(result) => result.map_err(ErrorResponse::from),
        Err(_) => Err(ErrorResponse::timeout(state.timeout)),
    }
}

// Handler implementations
async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, ErrorResponse> {
    let collections = bounded(&state, state.backend.list_collections()).await?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        collections: collections.len(),
    }))
}

async fn list_collections(State(state): State<AppState>) -> Result<Json<CollectionsResponse>, ErrorResponse> {
    let collections = bounded(&state, state.backend.list_collections()).await?;
    Ok(Json(CollectionsResponse { collections }))
}

async fn get_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CollectionSchema>, ErrorResponse> {
    bounded(&state, state.backend.get_collection(&name))
        .await?
        .map(Json)
        .ok_or_else(|| BackendError::CollectionNotFound(name).into())
}

async fn create_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(schema): Json<CollectionSchema>,
) -> Result<StatusCode, ErrorResponse> {
    bounded(&state, state.backend.create_collection(&name, schema)).await?;
    Ok(StatusCode::CREATED)
}

async fn delete_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeleteResponse>, ErrorResponse> {
    let deleted = bounded(&state, state.backend.delete_collection(&name)).await?;
    Ok(Json(DeleteResponse { deleted }))
}

async fn upsert_points(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<UpsertParams>,
    Json(batch): Json<PointBatch>,
) -> Result<Json<UpdateResult>, ErrorResponse> {
    batch
        .check_lengths()
        .map_err(|e| ErrorResponse::bad_request(e.to_string()))?;
    debug!(collection = %name, points = batch.len(), wait = params.wait, "upsert request");
    let result = bounded(&state, state.backend.upsert(&name, batch, params.wait)).await?;
    Ok(Json(result))
}

async fn query_points(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ErrorResponse> {
    let start = Instant::now();
    let points = bounded(&state, state.backend.query(&name, &request)).await?;
    Ok(Json(QueryResponse {
        points,
        search_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    }))
}

async fn count_points(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CountResponse>, ErrorResponse> {
    let count = bounded(&state, state.backend.count(&name)).await?;
    Ok(Json(CountResponse { count }))
}
