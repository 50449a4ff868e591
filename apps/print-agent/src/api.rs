//! # Submission API
//!
//! JSON routes the terminals use to queue print jobs and poll their status,
//! plus two operator actions that go straight to the printer.
//!
//! ```text
//! POST   /print-jobs                     submit a job          201 / 400
//! GET    /print-jobs/stats               queue counters
//! GET    /print-jobs/{id}                job status            200 / 404
//! DELETE /print-jobs?olderThanDays=N     purge finished jobs
//! POST   /printer/x-report               operator X-report
//! POST   /printer/force-close            operator recovery ladder
//! GET    /health                         liveness
//! ```

use std::sync::Arc;

use arka_core::{NewPrintJob, DEFAULT_RETENTION_DAYS};
use arka_db::{Database, DbError};
use arka_fiscal::{ErrorCategory, FiscalError, FiscalService};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

// =============================================================================
// State
// =============================================================================

/// Shared by every handler.
pub struct AppState {
    pub db: Database,
    pub service: Arc<FiscalService>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/print-jobs", post(submit_job).delete(cleanup_jobs))
        .route("/print-jobs/stats", get(queue_stats))
        .route("/print-jobs/{id}", get(get_job))
        .route("/printer/x-report", post(x_report))
        .route("/printer/force-close", post(force_close))
        .route("/health", get(health))
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// Error body sent to terminals: `{success:false, error:{code, message}}`.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "INVALID_BODY", rejection.body_text())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Validation(e) => {
                ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
            }
            not_found @ DbError::NotFound { .. } => ApiError::not_found(not_found.to_string()),
            other => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "QUEUE_ERROR",
                other.to_string(),
            ),
        }
    }
}

impl From<FiscalError> for ApiError {
    fn from(err: FiscalError) -> Self {
        let (status, code) = match err.category() {
            ErrorCategory::Transport => (StatusCode::SERVICE_UNAVAILABLE, "PRINTER_UNAVAILABLE"),
            ErrorCategory::Blocking => (StatusCode::CONFLICT, "PRINTER_BLOCKED"),
            ErrorCategory::Terminal => (StatusCode::CONFLICT, "PRINTER_STUCK"),
            ErrorCategory::ProtocolState | ErrorCategory::Credential => {
                (StatusCode::CONFLICT, "PRINTER_REJECTED")
            }
            ErrorCategory::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        ApiError::new(status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": { "code": self.code, "message": self.message },
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmittedJob {
    id: String,
}

async fn submit_job(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewPrintJob>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(new_job) = body?;
    let job = state.db.print_jobs().submit(new_job).await?;

    info!(job_id = %job.id, job_type = %job.job_type, device_id = %job.device_id, "Print job queued");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "job": SubmittedJob { id: job.id } })),
    ))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    match state.db.print_jobs().get(&id).await? {
        Some(job) => Ok(Json(json!({ "success": true, "job": job }))),
        None => Err(ApiError::not_found(format!("Print job not found: {id}"))),
    }
}

async fn queue_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let stats = state.db.print_jobs().stats().await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupParams {
    older_than_days: Option<u32>,
}

async fn cleanup_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CleanupParams>,
) -> ApiResult<Json<Value>> {
    let days = params.older_than_days.unwrap_or(DEFAULT_RETENTION_DAYS);
    let deleted = state.db.print_jobs().cleanup(days).await?;
    info!(days, deleted, "Print queue cleanup requested");
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

async fn x_report(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.service.print_x_report().await.map_err(|e| {
        warn!(error = %e, "X-report failed");
        ApiError::from(e)
    })?;
    Ok(Json(json!({ "success": true })))
}

async fn force_close(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let outcome = state.service.force_close().await.map_err(|e| {
        warn!(error = %e, "Force close failed");
        ApiError::from(e)
    })?;
    Ok(Json(json!({ "success": true, "outcome": outcome })))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arka_core::{CompanySettings, JobPayload, LineItem, PaymentMethod, Quantity};
    use arka_db::DbConfig;
    use arka_fiscal::{
        FiscalConfig, RecoveryOutcome, SimulatedPrinter, SimulatorFactory, StaticCompanySource,
    };

    async fn state_with(printer: Arc<SimulatedPrinter>) -> Arc<AppState> {
        let mut config = FiscalConfig::default();
        config.recovery.settle_delay_ms = 1;
        let service = FiscalService::new(
            Arc::new(SimulatorFactory::new(printer)),
            config,
            Arc::new(StaticCompanySource::new(CompanySettings {
                name: "Arka Market".to_string(),
                ..CompanySettings::default()
            })),
        );
        Arc::new(AppState {
            db: Database::new(DbConfig::in_memory()).await.unwrap(),
            service: Arc::new(service),
        })
    }

    async fn state() -> Arc<AppState> {
        state_with(Arc::new(SimulatedPrinter::new())).await
    }

    fn receipt() -> NewPrintJob {
        NewPrintJob::receipt(
            "pos-1",
            JobPayload::with_items(
                vec![LineItem::new("Kafe", 100, Quantity::from_units(2))],
                PaymentMethod::Cash,
            ),
        )
    }

    #[tokio::test]
    async fn test_submit_and_fetch() {
        let state = state().await;

        let (status, Json(body)) = submit_job(State(state.clone()), Ok(Json(receipt())))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        let id = body["job"]["id"].as_str().unwrap().to_string();

        let Json(body) = get_job(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(body["job"]["id"], id.as_str());
        assert_eq!(body["job"]["status"], "pending");
        assert_eq!(body["job"]["type"], "receipt");
    }

    #[tokio::test]
    async fn test_invalid_job_is_rejected() {
        let state = state().await;
        let empty = NewPrintJob::receipt("pos-1", JobPayload::default());

        let err = submit_job(State(state.clone()), Ok(Json(empty)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "VALIDATION_ERROR");

        let stats = state.db.print_jobs().stats().await.unwrap();
        assert_eq!(stats.total(), 0);
    }

    #[tokio::test]
    async fn test_missing_job_is_404() {
        let state = state().await;
        let err = get_job(State(state), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_and_cleanup() {
        let state = state().await;
        let job = state.db.print_jobs().submit(receipt()).await.unwrap();
        state.db.print_jobs().claim_next("w").await.unwrap();
        state.db.print_jobs().mark_complete(&job.id).await.unwrap();

        let Json(body) = queue_stats(State(state.clone())).await.unwrap();
        assert_eq!(body["stats"]["completed"], 1);

        // Finished just now, so a zero-day cutoff is required to delete it.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let Json(body) = cleanup_jobs(
            State(state.clone()),
            Query(CleanupParams {
                older_than_days: Some(0),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body["deleted"], 1);

        let stored = state.db.print_jobs().get(&job.id).await.unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_operator_actions() {
        let printer = Arc::new(SimulatedPrinter::new());
        let state = state_with(printer.clone()).await;

        x_report(State(state.clone())).await.unwrap();
        assert_eq!(printer.report_counts(), (1, 0));

        let Json(body) = force_close(State(state)).await.unwrap();
        assert_eq!(
            body["outcome"],
            serde_json::to_value(RecoveryOutcome::AlreadyClosed).unwrap()
        );
    }

    #[tokio::test]
    async fn test_unreachable_printer_maps_to_503() {
        let state = state_with(Arc::new(SimulatedPrinter::new().without_device())).await;
        let err = x_report(State(state)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code, "PRINTER_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
