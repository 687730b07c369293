//! Generation job handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use lumera_core::{Job, ProviderKind};
use lumera_store::Store;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Default page size for job listings.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Maximum page size for job listings.
const MAX_LIST_LIMIT: usize = 200;

/// Job submission request.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    /// The account paying for the job.
    pub account_id: String,
    /// Provider class: "image", "video", or "training".
    pub kind: String,
    /// Credits to reserve for the job.
    pub cost: i64,
    /// Opaque generation parameters forwarded to the provider.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Caller-supplied idempotency key; a retried request with the same
    /// key returns the original job.
    pub idempotency_key: String,
}

/// Job representation in API responses.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    /// Job ID.
    pub job_id: String,
    /// Owning account.
    pub account_id: String,
    /// Provider class.
    pub kind: String,
    /// Lifecycle state.
    pub state: String,
    /// Credits reserved.
    pub cost: i64,
    /// Permanent output URL, once succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    /// Failure cause for failed/expired jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Terminal timestamp, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl JobResponse {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            account_id: job.account_id.to_string(),
            kind: job.kind.as_str().to_string(),
            state: job.state.as_str().to_string(),
            cost: job.cost,
            output_url: job.durable_output.clone(),
            error: job.last_error.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// Job submission response: the created job plus the balance left after
/// the reservation.
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    /// The created (or replayed) job.
    #[serde(flatten)]
    pub job: JobResponse,
    /// Account balance after the reservation.
    pub balance_after: i64,
}

/// Submit a generation job: reserve credits, then hand off to the provider.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let account_id = body
        .account_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))?;

    let kind = parse_kind(&body.kind)?;

    if body.cost <= 0 {
        return Err(ApiError::BadRequest(format!(
            "cost must be positive, got {}",
            body.cost
        )));
    }
    if body.idempotency_key.is_empty() {
        return Err(ApiError::BadRequest("idempotency_key is required".into()));
    }

    tracing::debug!(
        service = %auth.service_name,
        account_id = %account_id,
        kind = %kind.as_str(),
        cost = body.cost,
        "Processing job submission"
    );

    let job = state
        .reconciler
        .reserve_and_submit(account_id, kind, body.cost, body.payload, &body.idempotency_key)
        .await?;

    let balance_after = state.store.balance(&account_id)?;

    Ok(Json(SubmitJobResponse {
        job: JobResponse::from_job(&job),
        balance_after,
    }))
}

/// Get a job by ID.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job_id = job_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid job ID".into()))?;

    let job = state
        .store
        .get_job(&job_id)?
        .ok_or_else(|| ApiError::NotFound("Job not found".into()))?;

    Ok(Json(JobResponse::from_job(&job)))
}

/// Query parameters for job listing.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// The account whose jobs to list.
    pub account_id: String,
    /// Page size (default 50, max 200).
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

/// Job listing response.
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    /// Jobs, newest first.
    pub jobs: Vec<JobResponse>,
}

/// List an account's jobs, newest first.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let account_id = query
        .account_id
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))?;

    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let jobs = state
        .store
        .list_jobs_by_account(&account_id, limit, offset)?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.iter().map(JobResponse::from_job).collect(),
    }))
}

fn parse_kind(kind: &str) -> Result<ProviderKind, ApiError> {
    match kind {
        "image" => Ok(ProviderKind::Image),
        "video" => Ok(ProviderKind::Video),
        "training" => Ok(ProviderKind::Training),
        other => Err(ApiError::BadRequest(format!("Unknown job kind: {other}"))),
    }
}
