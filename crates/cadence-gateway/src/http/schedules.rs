//! Schedule management endpoints.
//!
//! Each handler runs its operation against the [`ScheduleHost`] directly, so
//! a rejected operation is reported to the caller instead of being dropped.
//!
//! [`ScheduleHost`]: cadence_runtime::ScheduleHost

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cadence_runtime::{RuntimeError, ScheduleRecord};
use cadence_schedule::{ScheduleError, ScheduleRequest};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;

/// Error returned by the schedule endpoints.
#[derive(Debug)]
pub enum ApiError {
    /// The request itself was malformed.
    BadRequest(String),
    /// The host rejected or failed the operation.
    Runtime(RuntimeError),
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        ApiError::Runtime(err)
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        ApiError::Runtime(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Runtime(err) => {
                let status = match &err {
                    RuntimeError::Schedule(ScheduleError::Validation(_)) => StatusCode::BAD_REQUEST,
                    RuntimeError::Schedule(ScheduleError::InvalidState(_)) => StatusCode::CONFLICT,
                    RuntimeError::NotFound { .. } => StatusCode::NOT_FOUND,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.code(), err.to_string())
            }
        };

        if status.is_server_error() {
            warn!(%code, "schedule request failed: {message}");
        }
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleIdQuery {
    #[serde(rename = "scheduleId")]
    pub schedule_id: Option<String>,
}

impl ScheduleIdQuery {
    fn require(self) -> Result<String, ApiError> {
        self.schedule_id.filter(|id| !id.is_empty()).ok_or_else(|| {
            ApiError::BadRequest("Please provide scheduleId in query parameters".to_string())
        })
    }
}

fn parse_request(body: &Bytes) -> Result<ScheduleRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("Request body is required".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid schedule configuration: {e}")))
}

fn accepted(schedule_id: &str, message: String) -> Json<Value> {
    Json(json!({ "ok": true, "scheduleId": schedule_id, "message": message }))
}

/// POST /schedules
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let config = parse_request(&body)?.into_configuration()?;
    let schedule_id = config.schedule_id().to_string();

    if state.workloads.get(config.orchestration_name()).is_none() {
        warn!(
            %schedule_id,
            orchestration = %config.orchestration_name(),
            "schedule targets an unregistered workload"
        );
    }

    state.host.create(config)?;
    info!(%schedule_id, "schedule created via api");
    Ok(accepted(
        &schedule_id,
        format!("Schedule created for ID: {schedule_id}"),
    ))
}

/// PUT /schedules
pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = parse_request(&body)?;
    let schedule_id = request
        .schedule_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("scheduleId is required".to_string()))?;

    state.host.update(request)?;
    Ok(accepted(
        &schedule_id,
        format!("Schedule updated for ID: {schedule_id}"),
    ))
}

/// POST /schedules/pause?scheduleId=
pub async fn pause_schedule(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScheduleIdQuery>,
) -> Result<Json<Value>, ApiError> {
    let schedule_id = query.require()?;
    state.host.pause(&schedule_id)?;
    Ok(accepted(
        &schedule_id,
        format!("Schedule paused for ID: {schedule_id}"),
    ))
}

/// POST /schedules/resume?scheduleId=
pub async fn resume_schedule(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScheduleIdQuery>,
) -> Result<Json<Value>, ApiError> {
    let schedule_id = query.require()?;
    state.host.resume(&schedule_id)?;
    Ok(accepted(
        &schedule_id,
        format!("Schedule resumed for ID: {schedule_id}"),
    ))
}

/// DELETE /schedules?scheduleId=
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScheduleIdQuery>,
) -> Result<Json<Value>, ApiError> {
    let schedule_id = query.require()?;
    state.host.delete(&schedule_id)?;
    Ok(accepted(
        &schedule_id,
        format!("Schedule deleted for ID: {schedule_id}"),
    ))
}

/// GET /schedules/{id}
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    Path(schedule_id): Path<String>,
) -> Result<Json<ScheduleRecord>, ApiError> {
    Ok(Json(state.host.get(&schedule_id)?))
}

/// GET /schedules
pub async fn list_schedules(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let schedules = state.host.list()?;
    Ok(Json(json!({ "schedules": schedules })))
}
