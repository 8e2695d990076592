use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, MethodRouter},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::core::{JobOptions, JobStatus};
use crate::dashboard::service::{
    CancelResult, DashboardService, JobDetails, JobStatistics, ServerStatistics,
};
use crate::error::QmlError;
use crate::processing::JobQueue;

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Body accepted by submission routes
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub options: Option<JobOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub job_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
        }
    }
}

/// Error response carrying an HTTP status and an `ApiResponse` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<QmlError> for ApiError {
    fn from(error: QmlError) -> Self {
        let status = match &error {
            QmlError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            QmlError::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            QmlError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            QmlError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!("Request failed: {}", error);
        }
        Self::new(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(&self.message))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub type AppState = Arc<DashboardService>;

/// Create the main router for the queue API
pub fn create_router(queue: JobQueue) -> Router {
    Router::new()
        .route("/api/statistics", get(get_server_statistics))
        .route("/api/jobs/stats", get(get_job_statistics))
        .route("/api/jobs", get(get_jobs))
        .route("/api/jobs/:id", get(get_job_details).delete(cancel_job))
        .route("/api/health", get(health_check))
        .with_state(Arc::new(DashboardService::new(queue)))
}

/// Build a `POST` route that submits jobs of one fixed type.
///
/// ```rust
/// use axum::Router;
/// use qml_queue::dashboard::{create_router, submission_route};
/// use qml_queue::{JobQueue, QueueConfig};
///
/// let queue = JobQueue::new(QueueConfig::default()).unwrap();
/// let app: Router = create_router(queue.clone())
///     .route("/api/orders/process", submission_route(queue.clone(), "order:process"))
///     .route("/api/notifications/email", submission_route(queue, "email:send"));
/// ```
pub fn submission_route(queue: JobQueue, job_type: impl Into<String>) -> MethodRouter {
    let service = DashboardService::new(queue);
    let job_type: Arc<str> = Arc::from(job_type.into());

    post(move |Json(request): Json<SubmitJobRequest>| {
        let service = service.clone();
        let job_type = Arc::clone(&job_type);
        async move { submit_job(&service, &job_type, request) }
    })
}

fn submit_job(
    service: &DashboardService,
    job_type: &str,
    request: SubmitJobRequest,
) -> Result<(StatusCode, Json<ApiResponse<SubmitJobResponse>>), ApiError> {
    let job_id = service.submit(job_type, request.payload, request.options)?;
    tracing::debug!("Accepted {} job {} over HTTP", job_type, job_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(SubmitJobResponse {
            job_id,
            job_type: job_type.to_string(),
        })),
    ))
}

/// Get queue overview with recent jobs
async fn get_server_statistics(State(service): State<AppState>) -> ApiResult<ServerStatistics> {
    Ok(Json(ApiResponse::success(service.get_server_statistics())))
}

/// Get live job counts
async fn get_job_statistics(State(service): State<AppState>) -> ApiResult<JobStatistics> {
    Ok(Json(ApiResponse::success(service.get_job_statistics())))
}

/// Get jobs with optional filtering
async fn get_jobs(
    Query(params): Query<JobsQuery>,
    State(service): State<AppState>,
) -> ApiResult<Vec<JobDetails>> {
    let status = match params.status.as_deref() {
        Some(name) => Some(JobStatus::parse(name).ok_or_else(|| {
            ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("Invalid job status: {}", name),
            )
        })?),
        None => None,
    };

    Ok(Json(ApiResponse::success(service.get_jobs(
        status,
        params.limit,
        params.offset,
    ))))
}

/// Get job details by ID
async fn get_job_details(
    Path(job_id): Path<String>,
    State(service): State<AppState>,
) -> ApiResult<JobDetails> {
    service
        .get_job_details(&job_id)
        .map(|job| Json(ApiResponse::success(job)))
        .ok_or_else(|| QmlError::JobNotFound { job_id }.into())
}

/// Cancel a job
async fn cancel_job(
    Path(job_id): Path<String>,
    State(service): State<AppState>,
) -> ApiResult<CancelResult> {
    let result = service.cancel_job(&job_id)?;
    Ok(Json(ApiResponse::success(result)))
}

/// Health check endpoint
async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("Queue service is running"))
}
