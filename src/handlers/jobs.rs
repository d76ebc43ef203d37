//! # Jobs API Handlers
//!
//! Operator endpoints for enqueueing, listing, and retrying sync jobs,
//! plus the run-log CSV export.

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, SellerExtension};
use crate::error::{ApiError, validation_error};
use crate::models::sync_job::{self, job_type, status};
use crate::repositories::job_run_log::RunExportFilter;
use crate::repositories::sync_job::{EnqueueOutcome, JobFilters, NewJob};
use crate::repositories::{ConnectionRepository, JobRunLogRepository, SyncJobRepository};
use crate::server::AppState;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;
const MAX_RETRY_BATCH: usize = 100;
const DEFAULT_EXPORT_ROWS: u64 = 1000;
const MAX_EXPORT_ROWS: u64 = 10_000;

/// Request body for enqueueing a sync job
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnqueueJobRequest {
    /// Connection the job should run against
    pub connection_id: Uuid,
    /// Job type (one of: orders_sync, products_sync, inventory_sync, webhook_event)
    pub job_type: String,
    /// Optional opaque payload handed to the executor
    #[serde(default)]
    pub payload: Option<JsonValue>,
    /// When the job becomes claimable (defaults to now)
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Claim priority, higher first (defaults to 0)
    #[serde(default)]
    pub priority: Option<i16>,
}

/// Response for a job enqueue request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnqueueJobResponse {
    /// Identifier of the created (or already open) job
    pub id: Uuid,
    /// True when an open job for the same connection and type already
    /// existed and no new row was created
    pub duplicate: bool,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by job status (one of: pending, processing, completed, failed)
    pub status: Option<String>,
    /// Filter by job type
    pub job_type: Option<String>,
    /// Filter by channel slug
    pub channel_type: Option<String>,
    /// Filter by connection ID
    pub connection_id: Option<Uuid>,
    /// Jobs that started after this RFC3339 timestamp
    pub started_after: Option<String>,
    /// Jobs that finished after this RFC3339 timestamp
    pub finished_after: Option<String>,
    /// Maximum number of jobs to return (default 50, max 200)
    pub limit: Option<u32>,
    /// Opaque cursor for pagination
    pub cursor: Option<String>,
}

/// Job information response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    pub connection_id: Uuid,
    #[schema(example = "shopify")]
    pub channel_type: String,
    #[schema(example = "orders_sync")]
    pub job_type: String,
    #[schema(example = "pending")]
    pub status: String,
    pub priority: i16,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_for: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    /// Structured error recorded by the last failed attempt
    pub last_error: Option<JsonValue>,
}

impl From<sync_job::Model> for JobInfo {
    fn from(model: sync_job::Model) -> Self {
        Self {
            id: model.id,
            connection_id: model.connection_id,
            channel_type: model.channel_type,
            job_type: model.job_type,
            status: model.status,
            priority: model.priority,
            attempts: model.attempts,
            max_attempts: model.max_attempts,
            scheduled_for: model.scheduled_for.to_rfc3339(),
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            finished_at: model.finished_at.map(|dt| dt.to_rfc3339()),
            last_error: model.last_error,
        }
    }
}

/// Response payload for the jobs listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobsResponse {
    pub jobs: Vec<JobInfo>,
    /// Opaque cursor for fetching the next page (null if no more pages)
    pub next_cursor: Option<String>,
}

/// Request body for retrying failed jobs
#[derive(Debug, Deserialize, ToSchema)]
pub struct RetryJobsRequest {
    /// Jobs to requeue (at most 100 per request)
    pub job_ids: Vec<Uuid>,
    /// Restart the attempt counter from zero
    #[serde(default)]
    pub reset_attempts: bool,
}

/// Per-job outcome of a retry request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryOutcome {
    pub job_id: Uuid,
    /// One of: requeued, skipped, not_found
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response for a retry request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RetryJobsResponse {
    pub results: Vec<RetryOutcome>,
}

/// Enqueue a sync job for a connection
#[utoipa::path(
    post,
    path = "/jobs",
    security(("bearer_auth" = [])),
    request_body = EnqueueJobRequest,
    responses(
        (status = 201, description = "Job created or already open", body = EnqueueJobResponse),
        (status = 400, description = "Invalid job type", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Connection not found for seller", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn enqueue_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(seller): SellerExtension,
    Json(request): Json<EnqueueJobRequest>,
) -> Result<(StatusCode, Json<EnqueueJobResponse>), ApiError> {
    if !job_type::ALL.contains(&request.job_type.as_str()) {
        return Err(validation_error(
            "Unknown job type",
            serde_json::json!({ "job_type": request.job_type }),
        ));
    }

    let connections = ConnectionRepository::new(state.db.clone(), state.crypto_key.clone());
    let connection = connections
        .find_by_id(&seller.0, &request.connection_id)
        .await?
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Connection not found for seller",
            )
        })?;

    let jobs = SyncJobRepository::new(state.db.clone());
    let outcome = jobs
        .enqueue(NewJob {
            seller_id: seller.0,
            connection_id: connection.id,
            channel_type: connection.channel_type,
            job_type: request.job_type,
            priority: request.priority.unwrap_or(0),
            max_attempts: state.config.retry_policy.max_attempts as i32,
            payload: request.payload,
            scheduled_for: request.scheduled_for.unwrap_or_else(Utc::now),
        })
        .await?;

    let duplicate = !outcome.is_created();
    if let EnqueueOutcome::Duplicate(job) = &outcome {
        tracing::debug!(job_id = %job.id, "Enqueue matched an already open job");
    }

    Ok((
        StatusCode::CREATED,
        Json(EnqueueJobResponse {
            id: outcome.job().id,
            duplicate,
        }),
    ))
}

/// List jobs for the seller with optional filters
#[utoipa::path(
    get,
    path = "/jobs",
    security(("bearer_auth" = [])),
    params(
        ("status" = Option<String>, Query, description = "Filter by job status"),
        ("job_type" = Option<String>, Query, description = "Filter by job type"),
        ("channel_type" = Option<String>, Query, description = "Filter by channel slug"),
        ("connection_id" = Option<Uuid>, Query, description = "Filter by connection ID"),
        ("started_after" = Option<String>, Query, description = "Jobs started after this RFC3339 timestamp"),
        ("finished_after" = Option<String>, Query, description = "Jobs finished after this RFC3339 timestamp"),
        ("limit" = Option<u32>, Query, description = "Maximum number of jobs to return (default 50, max 200)"),
        ("cursor" = Option<String>, Query, description = "Pagination cursor")
    ),
    responses(
        (status = 200, description = "Jobs matching the filters", body = JobsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(seller): SellerExtension,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let limit = validate_limit(params.limit)?;

    if let Some(job_status) = &params.status
        && !status::ALL.contains(&job_status.as_str())
    {
        return Err(validation_error(
            "Unknown job status",
            serde_json::json!({ "status": job_status }),
        ));
    }

    let filters = JobFilters {
        channel_type: params.channel_type,
        status: params.status,
        job_type: params.job_type,
        connection_id: params.connection_id,
        started_after: parse_timestamp_param(params.started_after.as_deref(), "started_after")?,
        finished_after: parse_timestamp_param(params.finished_after.as_deref(), "finished_after")?,
    };

    let jobs = SyncJobRepository::new(state.db.clone());
    let (rows, next_cursor) = jobs
        .list_by_seller(seller.0, filters, limit as u64, params.cursor)
        .await?;

    Ok(Json(JobsResponse {
        jobs: rows.into_iter().map(JobInfo::from).collect(),
        next_cursor,
    }))
}

/// Fetch a single job by ID
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job details", body = JobInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Job not found for seller", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(seller): SellerExtension,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    let jobs = SyncJobRepository::new(state.db.clone());
    let job = jobs
        .find_by_seller(seller.0, job_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Job not found"))?;

    Ok(Json(JobInfo::from(job)))
}

/// Requeue terminally failed jobs
#[utoipa::path(
    post,
    path = "/jobs/retry",
    security(("bearer_auth" = [])),
    request_body = RetryJobsRequest,
    responses(
        (status = 200, description = "Per-job retry outcomes", body = RetryJobsResponse),
        (status = 400, description = "Invalid request body", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn retry_jobs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(seller): SellerExtension,
    Json(request): Json<RetryJobsRequest>,
) -> Result<Json<RetryJobsResponse>, ApiError> {
    if request.job_ids.is_empty() {
        return Err(validation_error(
            "No jobs to retry",
            serde_json::json!({ "job_ids": "Must contain at least one job ID" }),
        ));
    }
    if request.job_ids.len() > MAX_RETRY_BATCH {
        return Err(validation_error(
            "Too many jobs in one retry request",
            serde_json::json!({ "job_ids": format!("At most {} per request", MAX_RETRY_BATCH) }),
        ));
    }

    let jobs = SyncJobRepository::new(state.db.clone());
    let mut results = Vec::with_capacity(request.job_ids.len());

    for job_id in request.job_ids {
        let outcome = match jobs.retry(seller.0, job_id, request.reset_attempts).await {
            Ok(_) => RetryOutcome {
                job_id,
                outcome: "requeued".to_string(),
                message: None,
            },
            Err(err) if err.status == StatusCode::NOT_FOUND => RetryOutcome {
                job_id,
                outcome: "not_found".to_string(),
                message: None,
            },
            Err(err) if err.status == StatusCode::BAD_REQUEST => RetryOutcome {
                job_id,
                outcome: "skipped".to_string(),
                message: Some(err.message.to_string()),
            },
            Err(err) => return Err(err),
        };
        results.push(outcome);
    }

    Ok(Json(RetryJobsResponse { results }))
}

/// Query parameters for the run-log export
#[derive(Debug, Deserialize)]
pub struct ExportRunsQuery {
    /// Restrict the export to one job name
    pub job_name: Option<String>,
    /// Only runs started at or after this RFC3339 timestamp
    pub started_after: Option<String>,
    /// Only runs started before this RFC3339 timestamp
    pub started_before: Option<String>,
    /// Maximum number of rows (default 1000, max 10000)
    pub limit: Option<u64>,
}

/// Export recent job run logs as CSV
#[utoipa::path(
    get,
    path = "/runs/export",
    security(("bearer_auth" = [])),
    params(
        ("job_name" = Option<String>, Query, description = "Restrict to one job name"),
        ("started_after" = Option<String>, Query, description = "Only runs started at or after this RFC3339 timestamp"),
        ("started_before" = Option<String>, Query, description = "Only runs started before this RFC3339 timestamp"),
        ("limit" = Option<u64>, Query, description = "Maximum number of rows (default 1000, max 10000)")
    ),
    responses(
        (status = 200, description = "CSV export of job run logs", content_type = "text/csv"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn export_runs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(_seller): SellerExtension,
    Query(params): Query<ExportRunsQuery>,
) -> Result<Response, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_EXPORT_ROWS)
        .min(MAX_EXPORT_ROWS);
    let filter = RunExportFilter {
        job_name: params.job_name,
        started_after: parse_timestamp_param(params.started_after.as_deref(), "started_after")?,
        started_before: parse_timestamp_param(params.started_before.as_deref(), "started_before")?,
    };

    let run_logs = JobRunLogRepository::new(state.db.clone());
    let csv = run_logs.export_csv(&filter, limit).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"job_runs.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

fn validate_limit(limit: Option<u32>) -> Result<u32, ApiError> {
    match limit {
        None => Ok(DEFAULT_PAGE_SIZE),
        Some(0) => Err(validation_error(
            "Invalid limit",
            serde_json::json!({ "limit": "Minimum allowed limit is 1" }),
        )),
        Some(value) if value > MAX_PAGE_SIZE => Err(validation_error(
            "Invalid limit",
            serde_json::json!({ "limit": format!("Maximum allowed limit is {}", MAX_PAGE_SIZE) }),
        )),
        Some(value) => Ok(value),
    }
}

fn parse_timestamp_param(
    value: Option<&str>,
    field: &str,
) -> Result<Option<DateTime<Utc>>, ApiError> {
    let Some(raw) = value else {
        return Ok(None);
    };

    DateTime::parse_from_rfc3339(raw)
        .map(|ts| Some(ts.with_timezone(&Utc)))
        .map_err(|_| {
            validation_error(
                "Invalid timestamp",
                serde_json::json!({ field: "Must be a valid RFC3339 timestamp" }),
            )
        })
}
