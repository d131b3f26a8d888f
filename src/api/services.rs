use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use http_body_util::BodyExt;
use tracing::{error, info};

use super::{
    models::{ActiveImports, HealthResponse, ImportAccepted, ImportQuery, JobStatusResponse},
    state::AppState,
    utils,
    validation,
};
use crate::api::error::ApiError;
use crate::auth::InternalUser;
use crate::jobs::JobStatus;
use crate::queue::{ImportUpload, JobFilter, SubmitOutcome};

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<InternalUser, ApiError> {
    Ok(state.authenticator.authenticate(utils::bearer_token(headers)).await?)
}

/// Import submission endpoint (POST /import)
///
/// ## Flow:
/// 1. Authenticate the caller (bearer token)
/// 2. Validate query options, Content-Type and file name header
/// 3. Read the body (gzip already decoded by middleware), enforce size limits
/// 4. Hand the upload to the producer: an in-flight job with the same file
///    name is returned as is, otherwise a new job is enqueued
///
/// Every rejection happens before any queue or status state is written.
pub async fn submit_import(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &headers).await?;

    let options =
        validation::validate_options(&query).map_err(|e| ApiError::InvalidOptions(e.to_string()))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::UnsupportedMediaType("missing Content-Type header".into()))?;
    utils::parse_content_type(content_type)?;

    let file_name = utils::file_name(&headers)?;
    let content = read_body(body, state.config.server.max_upload_bytes.as_usize()).await?;

    let outcome = state
        .producer
        .submit(ImportUpload {
            user_id: user.id.clone(),
            file_name,
            content,
            options,
        })
        .await
        .map_err(|e| {
            error!(user_id = %user.id, error = %e, "Import error");
            ApiError::from(e)
        })?;

    let response = match outcome {
        SubmitOutcome::Enqueued { job_id, file_name } => {
            info!(%job_id, user_id = %user.id, %file_name, "Import queued");
            ImportAccepted {
                success: true,
                job_id,
                file_name,
                status: JobStatus::Queued,
                message: None,
            }
        }
        SubmitOutcome::Existing {
            job_id,
            file_name,
            status,
        } => ImportAccepted {
            success: true,
            job_id,
            file_name,
            status,
            message: Some("File is already being processed".to_string()),
        },
    };

    Ok((StatusCode::OK, Json(response)))
}

/// Reads the request body and validates its size
///
/// Decompression is handled by `RequestDecompressionLayer`, so the limit
/// applies to the decoded CSV.
async fn read_body(body: axum::body::Body, max_size: usize) -> Result<Vec<u8>, ApiError> {
    let limited = http_body_util::Limited::new(body, max_size.saturating_add(1));
    let data = match limited.collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(err) if err.is::<http_body_util::LengthLimitError>() => {
            return Err(ApiError::PayloadTooLarge(max_size.saturating_add(1)));
        }
        Err(err) => return Err(ApiError::InvalidPayload(err.to_string())),
    };

    utils::validate_body_size(&data, max_size)?;
    Ok(data)
}

/// Active imports endpoint (GET /import/active)
///
/// Waiting, active and delayed jobs of the caller.
pub async fn active_imports(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &headers).await?;

    let jobs = state
        .queue
        .list_jobs(&JobFilter::in_flight(&user.id))
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(Json(ActiveImports { jobs }))
}

/// Import status endpoint (GET /import/{job_id})
///
/// Reads the queue entry first; once the entry has been removed the status
/// store still answers until its record expires. Jobs of other users are
/// reported as missing.
pub async fn import_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &headers).await?;
    let not_found = || ApiError::NotFound("Import job not found".to_string());

    if let Some(view) = state.queue.get_job(&job_id).await? {
        if view.user_id.as_deref() != Some(user.id.as_str()) {
            return Err(not_found());
        }
        return Ok(Json(JobStatusResponse::from(view)));
    }

    let record = state.status.get_status(&job_id)?.ok_or_else(not_found)?;
    if record.user_id.as_deref() != Some(user.id.as_str()) {
        return Err(not_found());
    }
    Ok(Json(JobStatusResponse::from(record)))
}

/// Health check endpoint (GET /health)
///
/// Probes the queue, the status store and the object store. Returns 503
/// Service Unavailable if any component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = BTreeMap::new();

    let mark = |ok: bool| if ok { "healthy" } else { "unhealthy" }.to_string();

    components.insert("api".to_string(), mark(true));
    components.insert(
        "queue".to_string(),
        mark(matches!(state.queue.health_check().await, Ok(true))),
    );
    components.insert("status_store".to_string(), mark(state.status.health_check().is_ok()));
    components.insert(
        "storage".to_string(),
        mark(state.storage.exists("health/probe").await.is_ok()),
    );
    components.insert("gateway".to_string(), mark(!state.gateway.is_closed()));

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        metrics: state.metrics.snapshot(),
    };

    (status_code, Json(response))
}
