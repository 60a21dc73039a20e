//! API Module
//!
//! HTTP surface of the conversion service: package upload, result polling,
//! metrics, and live reconfiguration.

pub mod error;

use crate::service::{build_engine, AppState, Store};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use error::{ApiError, ApiResult};
use portage_core::{zipio, ConversionRequest};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Upload size cap: 50 MiB
const MAX_UPLOAD_BYTES: usize = 50 << 20;

/// Create the service router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(upload_package))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/reconfigure", post(reconfigure))
        .route("/{uuid}", get(fetch_result).head(poll_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /
/// Accepts a multipart upload with a `file` field holding the package zip
/// and enqueues a conversion request.
pub async fn upload_package(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if !filename.ends_with(".zip") {
            return Err(ApiError::UnsupportedMediaType(
                "only .zip files are allowed".to_string(),
            ));
        }

        let data = field.bytes().await?;
        let package = zipio::read_package(&data)
            .map_err(|err| ApiError::BadRequest(format!("error reading file: {err}")))?;

        let request = ConversionRequest::new(package);
        let id = request.id;
        state
            .queue
            .send(request)
            .await
            .map_err(|err| ApiError::InternalError(format!("queue unavailable: {err}")))?;

        tracing::info!("got new conversion request for {}", id);
        return Ok((
            StatusCode::CREATED,
            [(header::LOCATION, format!("/{id}"))],
        ));
    }

    Err(ApiError::BadRequest("file not found in request".to_string()))
}

/// GET /{uuid}
/// Returns the converted package as a zip. A successful fetch removes the
/// job from the store; a failed job surfaces its error message.
pub async fn fetch_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let mut store = state.store.write().await;
    let job = store.results.get(&id).ok_or(ApiError::NotFound)?;

    if let Some(message) = &job.error {
        return Err(ApiError::JobFailed(message.clone()));
    }

    let package = job.package.as_ref().ok_or(ApiError::NotFound)?;
    let data = zipio::write_package(package)
        .map_err(|err| ApiError::InternalError(format!("error writing package: {err}")))?;

    store.results.remove(&id);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/zip")],
        data,
    ))
}

/// HEAD /{uuid}
/// 200 when the job is complete, 404 otherwise. Never removes the job.
pub async fn poll_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let store = state.store.read().await;
    if store.results.contains_key(&id) {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound)
    }
}

/// GET /metrics
/// Metrics of every completed job, keyed by request id.
pub async fn get_metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let store = state.store.read().await;
    Ok(Json(store.metrics.clone()))
}

/// POST /reconfigure
/// Compiles the posted pipeline document, swaps it in for subsequent
/// conversions, and clears completed results and metrics.
pub async fn reconfigure(
    State(state): State<AppState>,
    body: String,
) -> ApiResult<StatusCode> {
    let engine = build_engine(&body, &state.env_options)
        .map_err(|err| ApiError::BadRequest(format!("error compiling pipeline: {err}")))?;

    tracing::info!("applying new conversion pipeline");
    *state.engine.write().await = Arc::new(engine);
    *state.store.write().await = Store::default();

    Ok(StatusCode::CREATED)
}
