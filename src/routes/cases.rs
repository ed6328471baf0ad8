//! Case routes: intake, listing, detail, updates, assignment, calendar and
//! JSONL export.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::ApiError;
use super::auth::AuthUser;
use super::groups::member_error_to_api;
use crate::services::calendar::{self, CalendarError, CalendarEvent, CaseEventRequest};
use crate::services::case::{
    self, CaseCreated, CaseDetail, CaseError, CaseFilter, CaseForm, CasePage, CasePatch, CaseRow, CaseStatus,
};
use crate::services::validation;
use crate::state::AppState;

/// Map a case failure to HTTP. Step wrappers are unwrapped; client-facing
/// messages keep the step name so the intake form can point at it.
pub(crate) fn case_error_to_api(err: CaseError) -> ApiError {
    match err {
        CaseError::Step { step, source } => {
            let mut api = case_error_to_api(*source);
            if api.status.is_server_error() {
                tracing::error!(%step, "case step failed");
            } else {
                api.message = format!("{step}: {}", api.message);
            }
            api
        }
        CaseError::Invalid(e) => e.into(),
        CaseError::NotFound(_) => ApiError::not_found(err.to_string()),
        CaseError::UnknownDistrict(_) => ApiError::bad_request("unknown_district", err.to_string()),
        CaseError::UnknownMember(_) => ApiError::bad_request("unknown_member", err.to_string()),
        CaseError::Forbidden(reason) => ApiError::forbidden(reason),
        CaseError::Access(e) => member_error_to_api(e),
        CaseError::Database(e) => ApiError::internal(&e),
    }
}

pub(crate) fn calendar_error_to_api(err: CalendarError) -> ApiError {
    match err {
        CalendarError::NotConfigured => {
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "calendar_not_configured", err.to_string())
        }
        CalendarError::InvalidTime { .. } | CalendarError::EndBeforeStart => {
            ApiError::bad_request("validation", err.to_string())
        }
        CalendarError::HttpClientBuild(_)
        | CalendarError::Request(_)
        | CalendarError::Response { .. }
        | CalendarError::Parse(_) => {
            tracing::error!(error = %err, "calendar call failed");
            ApiError::new(StatusCode::BAD_GATEWAY, "calendar_failed", "calendar service request failed")
        }
        CalendarError::Case(e) => case_error_to_api(e),
    }
}

/// `GET /api/groups/{id}/cases`
pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
    Query(filter): Query<CaseFilter>,
) -> Result<Json<CasePage>, ApiError> {
    case::list_cases(&state.pool, group_id, auth.user.id, &filter)
        .await
        .map(Json)
        .map_err(case_error_to_api)
}

/// `POST /api/groups/{id}/cases`: intake a case with its voter, category,
/// district and people in one transaction.
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
    Json(form): Json<CaseForm>,
) -> Result<(StatusCode, Json<CaseCreated>), ApiError> {
    let created = case::create_case(&state.pool, group_id, auth.user.id, form)
        .await
        .map_err(case_error_to_api)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/groups/{id}/cases/{case_id}`
pub async fn get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, case_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CaseDetail>, ApiError> {
    case::get_case(&state.pool, group_id, case_id, auth.user.id)
        .await
        .map(Json)
        .map_err(case_error_to_api)
}

/// `PATCH /api/groups/{id}/cases/{case_id}`
pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, case_id)): Path<(Uuid, Uuid)>,
    Json(patch): Json<CasePatch>,
) -> Result<Json<CaseDetail>, ApiError> {
    let update = patch.validate()?;
    case::update_case(&state.pool, group_id, case_id, auth.user.id, update)
        .await
        .map(Json)
        .map_err(case_error_to_api)
}

/// `DELETE /api/groups/{id}/cases/{case_id}`
pub async fn delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, case_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    case::delete_case(&state.pool, group_id, case_id, auth.user.id)
        .await
        .map_err(case_error_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: String,
}

/// `POST /api/groups/{id}/cases/{case_id}/status`
pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, case_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<StatusBody>,
) -> Result<Json<CaseRow>, ApiError> {
    let status = validation::one_of("status", &body.status, CaseStatus::from_str, &CaseStatus::ALL)?;
    case::update_status(&state.pool, group_id, case_id, auth.user.id, status)
        .await
        .map(Json)
        .map_err(case_error_to_api)
}

#[derive(Deserialize)]
pub struct AssignBody {
    pub member_id: Uuid,
}

/// `POST /api/groups/{id}/cases/{case_id}/assign`
pub async fn assign(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, case_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<AssignBody>,
) -> Result<Json<CaseDetail>, ApiError> {
    case::assign_case(&state.pool, group_id, case_id, auth.user.id, body.member_id)
        .await
        .map(Json)
        .map_err(case_error_to_api)
}

/// `POST /api/groups/{id}/cases/{case_id}/calendar`
pub async fn calendar_event(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, case_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<CaseEventRequest>,
) -> Result<(StatusCode, Json<CalendarEvent>), ApiError> {
    let event = calendar::create_case_event(
        &state.pool,
        state.calendar.as_deref(),
        group_id,
        case_id,
        auth.user.id,
        &body,
    )
    .await
    .map_err(calendar_error_to_api)?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// `GET /api/groups/{id}/cases/export.jsonl`
pub async fn export_jsonl(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let rows = case::list_export_cases(&state.pool, group_id, auth.user.id)
        .await
        .map_err(case_error_to_api)?;
    let lines = case::export_lines(group_id, &rows, OffsetDateTime::now_utc()).map_err(|e| ApiError::internal(&e))?;
    tracing::info!(%group_id, case_count = rows.len(), "cases exported");

    let stream = futures::stream::iter(
        lines
            .into_iter()
            .map(|line| Ok::<axum::body::Bytes, std::convert::Infallible>(axum::body::Bytes::from(line))),
    );
    let body = axum::body::Body::from_stream(stream);
    let filename = format!("cases-{group_id}.jsonl");

    Ok((
        [
            (CONTENT_TYPE, "application/x-ndjson; charset=utf-8"),
            (CONTENT_DISPOSITION, &format!("attachment; filename=\"{filename}\"")),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
#[path = "cases_test.rs"]
mod tests;
