//! # HTTP Server Implementation
//!
//! REST API for TansuDB.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use tansu_core::{DatabaseConfig, DistanceKind, Error, Vector};
use tansu_storage::Database;

// ========== API Types ==========

#[derive(Debug, Deserialize)]
pub struct ApiRecord {
    pub key: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: String,
}

#[derive(Debug, Serialize)]
pub struct ApiMutationResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiRecordResponse {
    pub key: String,
    pub vector: Vec<f32>,
    pub metadata: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    #[serde(default = "default_top_k")]
    pub k: usize,
    #[serde(default)]
    pub include_metadata: bool,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub key: String,
    pub distance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
pub struct BatchSearchRequest {
    pub vectors: Vec<Vec<f32>>,
    #[serde(default = "default_top_k")]
    pub k: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchSearchResponse {
    pub results: Vec<Vec<SearchHit>>,
}

#[derive(Debug, Deserialize)]
pub struct BatchMutationRequest {
    pub keys: Vec<String>,
    #[serde(default)]
    pub vectors: Vec<Vec<f32>>,
    #[serde(default)]
    pub metadata: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ApiBatchResponse {
    pub success: bool,
    pub operations_committed: usize,
    pub transaction_id: String,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlgorithmRequest {
    pub algorithm: String,
    #[serde(default)]
    pub p1: usize,
    #[serde(default)]
    pub p2: usize,
}

#[derive(Debug, Deserialize)]
pub struct MetricRequest {
    pub metric: String,
}

// ========== Server State ==========

pub struct AppState {
    pub db: Arc<Database>,
}

impl AppState {
    pub fn open(config: DatabaseConfig) -> anyhow::Result<Self> {
        let db = Database::new(config)?;
        db.initialize()?;
        Ok(Self { db: Arc::new(db) })
    }
}

type ApiError = (StatusCode, String);

fn map_error(err: Error) -> ApiError {
    let status = match &err {
        Error::DimensionMismatch { .. }
        | Error::InvalidIndex { .. }
        | Error::EmptyKey
        | Error::BatchValidation { .. }
        | Error::Configuration { .. } => StatusCode::BAD_REQUEST,
        Error::KeyAbsent { .. } => StatusCode::NOT_FOUND,
        Error::KeyDuplicate { .. } => StatusCode::CONFLICT,
        Error::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, format!("{}: {}", err.error_code(), err))
}

fn parse_vector(raw: Vec<f32>) -> Result<Vector, ApiError> {
    Vector::new(raw).map_err(map_error)
}

// ========== Routes ==========

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/vectors", post(insert_vector))
        .route(
            "/vectors/:key",
            get(get_vector).put(update_vector).delete(delete_vector),
        )
        .route("/search", post(search))
        .route("/search/batch", post(batch_search))
        .route("/batch/insert", post(batch_insert))
        .route("/batch/update", post(batch_update))
        .route("/batch/delete", post(batch_delete))
        .route("/admin/checkpoint", post(checkpoint))
        .route("/admin/flush", post(flush))
        .route("/admin/algorithm", post(set_algorithm))
        .route("/admin/metric", post(set_metric))
        .route("/stats", get(stats))
        .route("/recovery", get(recovery))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: &str, config: DatabaseConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::open(config)?);
    let app = create_router(state);

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn insert_vector(
    State(state): State<Arc<AppState>>,
    Json(record): Json<ApiRecord>,
) -> Result<Json<ApiMutationResponse>, ApiError> {
    let vector = parse_vector(record.vector)?;
    let success = state
        .db
        .insert(&record.key, vector, &record.metadata)
        .map_err(map_error)?;
    Ok(Json(ApiMutationResponse { success }))
}

async fn update_vector(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(record): Json<ApiRecord>,
) -> Result<Json<ApiMutationResponse>, ApiError> {
    let vector = parse_vector(record.vector)?;
    let success = state
        .db
        .update(&key, vector, &record.metadata)
        .map_err(map_error)?;
    Ok(Json(ApiMutationResponse { success }))
}

async fn delete_vector(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ApiMutationResponse>, ApiError> {
    let success = state.db.remove(&key).map_err(map_error)?;
    Ok(Json(ApiMutationResponse { success }))
}

async fn get_vector(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ApiRecordResponse>, ApiError> {
    match state.db.get(&key) {
        Some((vector, metadata)) => Ok(Json(ApiRecordResponse {
            key,
            vector: vector.into(),
            metadata,
        })),
        None => Err((StatusCode::NOT_FOUND, format!("KEY_ABSENT: {}", key))),
    }
}

async fn search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = parse_vector(request.vector)?;
    let results = if request.include_metadata {
        state
            .db
            .similarity_search_with_metadata(&query, request.k)
            .map_err(map_error)?
            .into_iter()
            .map(|hit| SearchHit {
                key: hit.key,
                distance: hit.distance,
                metadata: Some(hit.metadata),
            })
            .collect()
    } else {
        state
            .db
            .similarity_search(&query, request.k)
            .map_err(map_error)?
            .into_iter()
            .map(|(key, distance)| SearchHit {
                key,
                distance,
                metadata: None,
            })
            .collect()
    };
    Ok(Json(SearchResponse { results }))
}

async fn batch_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchSearchRequest>,
) -> Result<Json<BatchSearchResponse>, ApiError> {
    let queries = request
        .vectors
        .into_iter()
        .map(parse_vector)
        .collect::<Result<Vec<_>, _>>()?;
    let results = state
        .db
        .batch_similarity_search(&queries, request.k)
        .map_err(map_error)?;
    Ok(Json(BatchSearchResponse {
        results: results
            .into_iter()
            .map(|hits| {
                hits.into_iter()
                    .map(|(key, distance)| SearchHit {
                        key,
                        distance,
                        metadata: None,
                    })
                    .collect()
            })
            .collect(),
    }))
}

fn batch_response(result: tansu_storage::BatchResult) -> ApiBatchResponse {
    ApiBatchResponse {
        success: result.success,
        operations_committed: result.operations_committed,
        transaction_id: result.transaction_id,
        duration_ms: result.duration.as_secs_f64() * 1000.0,
        error_message: result.error_message,
    }
}

async fn batch_insert(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchMutationRequest>,
) -> Result<Json<ApiBatchResponse>, ApiError> {
    let vectors = request
        .vectors
        .into_iter()
        .map(parse_vector)
        .collect::<Result<Vec<_>, _>>()?;
    let result = state
        .db
        .batch_insert(&request.keys, &vectors, request.metadata.as_deref())
        .map_err(map_error)?;
    Ok(Json(batch_response(result)))
}

async fn batch_update(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchMutationRequest>,
) -> Result<Json<ApiBatchResponse>, ApiError> {
    let vectors = request
        .vectors
        .into_iter()
        .map(parse_vector)
        .collect::<Result<Vec<_>, _>>()?;
    let result = state
        .db
        .batch_update(&request.keys, &vectors, request.metadata.as_deref())
        .map_err(map_error)?;
    Ok(Json(batch_response(result)))
}

async fn batch_delete(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchMutationRequest>,
) -> Result<Json<ApiBatchResponse>, ApiError> {
    let result = state.db.batch_delete(&request.keys).map_err(map_error)?;
    Ok(Json(batch_response(result)))
}

async fn checkpoint(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sequence = state.db.checkpoint().map_err(map_error)?;
    Ok(Json(serde_json::json!({ "snapshot_sequence": sequence })))
}

async fn flush(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let pending = state.db.flush().map_err(map_error)?;
    Ok(Json(serde_json::json!({ "pending_operations": pending })))
}

async fn set_algorithm(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AlgorithmRequest>,
) -> Result<Json<ApiMutationResponse>, ApiError> {
    state
        .db
        .set_approximate_algorithm(&request.algorithm, request.p1, request.p2)
        .map_err(map_error)?;
    Ok(Json(ApiMutationResponse { success: true }))
}

async fn set_metric(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MetricRequest>,
) -> Result<Json<ApiMutationResponse>, ApiError> {
    let metric = DistanceKind::parse(&request.metric).map_err(map_error)?;
    state.db.set_distance_metric(metric).map_err(map_error)?;
    Ok(Json(ApiMutationResponse { success: true }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats = state.db.statistics();
    Json(serde_json::json!({
        "vector_count": stats.vector_count,
        "dimensions": stats.dimensions,
        "algorithm": stats.algorithm.name(),
        "metric": stats.metric.name(),
        "ready": stats.ready,
        "recovering": stats.recovering,
        "recovery_state": stats.recovery_state,
        "stale_index_entries": stats.stale_index_entries,
        "metrics": stats.metrics,
        "persistence": stats.persistence.map(|p| serde_json::json!({
            "total_logged_inserts": p.total_logged_inserts,
            "total_logged_updates": p.total_logged_updates,
            "total_logged_deletes": p.total_logged_deletes,
            "total_checkpoints": p.total_checkpoints,
            "total_flushes": p.total_flushes,
            "last_replayed_sequence": p.last_replayed_sequence,
            "ops_since_last_checkpoint": p.ops_since_last_checkpoint,
            "wal": {
                "total_records": p.wal.total_records,
                "total_bytes": p.wal.total_bytes,
                "next_sequence": p.wal.next_sequence,
                "current_segment_size": p.wal.current_segment_size,
            },
        })),
    }))
}

async fn recovery(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let info = state.db.recovery_info();
    Json(serde_json::json!({
        "snapshot_file": info.snapshot_file,
        "snapshot_sequence": info.snapshot_sequence,
        "log_files": info.log_files,
        "last_replayed_sequence": info.last_replayed_sequence,
        "error_message": info.error_message,
    }))
}
