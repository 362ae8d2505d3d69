use crate::circuit_breaker::ResilienceGuard;
use crate::classifier::classify;
use crate::config::Config;
use crate::errors::AppError;
use crate::export::ExportFormat;
use crate::ingestion::UploadedFile;
use crate::models::*;
use crate::pipeline::ReconciliationService;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Job runner and in-memory job store.
    pub service: Arc<ReconciliationService>,
    /// Circuit breaker shared with the scoring orchestrator.
    pub guard: Arc<ResilienceGuard>,
}

/// Reconciliation and scoring routes, without rate limiting.
///
/// `max_body_bytes` bounds multipart uploads; it should cover every file of a job.
pub fn api_routes(max_body_bytes: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/scoring/health", get(scoring_health))
        .route("/api/v1/reconciliation/upload", post(upload))
        .route("/api/v1/reconciliation/status/:job_id", get(job_status))
        .route("/api/v1/reconciliation/review", post(submit_review))
        .route("/api/v1/reconciliation/reviews/:job_id", get(list_reviews))
        .route("/api/v1/reconciliation/export/:job_id", get(export_results))
        .route("/api/v1/reconciliation/retry/:job_id", post(retry_failed))
        .route("/api/v1/reconciliation/cancel/:job_id", post(cancel_job))
        .route("/api/v1/test/predict", post(test_predict))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

/// Health check endpoint.
///
/// Liveness of this service only; scorer health lives under `/api/v1/scoring/health`.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-recon-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/scoring/health
///
/// Health-monitor result and circuit state, reported separately.
pub async fn scoring_health(State(state): State<Arc<AppState>>) -> Json<CircuitBreakerState> {
    Json(state.guard.snapshot())
}

/// POST /api/v1/reconciliation/upload
///
/// Multipart fields `pos`, `alle` and `aspire`, one file each. The job runs in the
/// background; poll the status endpoint for the outcome.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let Some(field_name) = field.name().map(str::to_string) else {
            continue;
        };
        let source_system = match field_name.parse::<SourceSystem>() {
            Ok(source) => source,
            Err(_) => {
                tracing::warn!("Ignoring unexpected upload field '{}'", field_name);
                continue;
            }
        };
        let file_name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.csv", field_name));
        let bytes = field.bytes().await.map_err(|e| {
            AppError::BadRequest(format!("Failed to read upload '{}': {}", field_name, e))
        })?;
        if bytes.len() > state.config.max_upload_bytes {
            return Err(AppError::FileFormatError(format!(
                "{}: file is {} bytes, limit is {}",
                file_name,
                bytes.len(),
                state.config.max_upload_bytes
            )));
        }

        tracing::info!(
            "Received {} file {} ({} bytes)",
            source_system,
            file_name,
            bytes.len()
        );
        files.push(UploadedFile::new(file_name, source_system, bytes.to_vec()));
    }

    let job_id = state.service.create_job(files)?;

    let service = state.service.clone();
    tokio::spawn(async move {
        if let Err(e) = service.run_job(job_id).await {
            tracing::error!("Job {} could not run: {}", job_id, e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": job_id,
            "status": JobStatus::Uploaded,
        })),
    ))
}

/// GET /api/v1/reconciliation/status/:job_id
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = state.service.job(&job_id)?;

    Ok(Json(json!({
        "job_id": job.job_id,
        "status": job.status,
        "input_files": job.input_files,
        "summary": job.summary,
        "errors": job.errors,
        "warnings": job.warnings,
        "created_at": job.created_at,
        "completed_at": job.completed_at,
    })))
}

/// POST /api/v1/reconciliation/review
///
/// Body: `{ "matchId", "decision": "approve" | "reject", "notes"?, "reviewer"? }`.
pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<ReviewSubmission>,
) -> Result<Json<ReviewItem>, AppError> {
    let item = state.service.decide_review(submission)?;
    Ok(Json(item))
}

/// GET /api/v1/reconciliation/reviews/:job_id
pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Vec<ReviewItem>>, AppError> {
    Ok(Json(state.service.reviews_for_job(&job_id)?))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

/// GET /api/v1/reconciliation/export/:job_id?format=csv|excel
///
/// Defaults to CSV.
pub async fn export_results(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let format = match query.format.as_deref() {
        Some(raw) => raw.parse::<ExportFormat>()?,
        None => ExportFormat::Csv,
    };
    let file = state.service.export(&job_id, format)?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.file_name),
            ),
        ],
        file.bytes,
    )
        .into_response())
}

/// POST /api/v1/reconciliation/retry/:job_id
///
/// Re-scores the pairs that failed; returns the refreshed summary.
pub async fn retry_failed(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = state.service.retry_failed(job_id).await?;

    Ok(Json(json!({
        "job_id": job.job_id,
        "status": job.status,
        "summary": job.summary,
    })))
}

/// POST /api/v1/reconciliation/cancel/:job_id
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = state.service.cancel(&job_id)?;

    Ok(Json(json!({
        "job_id": job_id,
        "status": status,
        "cancel_requested": true,
    })))
}

/// POST /api/v1/test/predict
///
/// Scores one pair through the circuit breaker, bypassing jobs.
pub async fn test_predict(
    State(state): State<Arc<AppState>>,
    Json(pair): Json<ScorerPair>,
) -> Result<Json<serde_json::Value>, AppError> {
    let score = state.service.orchestrator().score_one(&pair).await?;
    let (recommendation, confidence_level) = classify(score.match_probability);

    Ok(Json(json!({
        "success": true,
        "result": score,
        "recommendation": recommendation,
        "confidence_level": confidence_level,
    })))
}
