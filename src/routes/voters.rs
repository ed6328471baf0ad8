//! Voter routes: search, detail with case history, contact edits.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiError;
use super::auth::AuthUser;
use super::groups::member_error_to_api;
use crate::services::voter::{self, VoterContact, VoterDetail, VoterError, VoterRow};
use crate::state::AppState;

pub(crate) fn voter_error_to_api(err: VoterError) -> ApiError {
    match err {
        VoterError::Invalid(e) => e.into(),
        VoterError::NotFound(_) => ApiError::not_found(err.to_string()),
        VoterError::Duplicate => ApiError::new(StatusCode::CONFLICT, "duplicate_voter", err.to_string()),
        VoterError::Access(e) => member_error_to_api(e),
        VoterError::Database(e) => ApiError::internal(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
}

/// `GET /api/groups/{id}/voters?q=&limit=`: name or phone lookup used by the
/// intake form to reuse an existing voter.
pub async fn search(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<VoterRow>>, ApiError> {
    voter::search_voters(&state.pool, group_id, auth.user.id, query.q.as_deref(), query.limit)
        .await
        .map(Json)
        .map_err(voter_error_to_api)
}

/// `GET /api/groups/{id}/voters/{voter_id}`
pub async fn get(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, voter_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<VoterDetail>, ApiError> {
    voter::get_voter(&state.pool, group_id, auth.user.id, voter_id)
        .await
        .map(Json)
        .map_err(voter_error_to_api)
}

/// Full replacement of a voter's contact fields; same names as case intake.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateVoterBody {
    pub contact_name: String,
    pub contact_phone: String,
    pub contact_email: Option<String>,
    pub contact_address: Option<String>,
    pub contact_line_id: Option<String>,
}

/// `PATCH /api/groups/{id}/voters/{voter_id}`
pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, voter_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateVoterBody>,
) -> Result<Json<VoterRow>, ApiError> {
    let contact = VoterContact::parse(
        &body.contact_name,
        &body.contact_phone,
        body.contact_email.as_deref(),
        body.contact_address.as_deref(),
        body.contact_line_id.as_deref(),
    )?;
    voter::update_voter(&state.pool, group_id, auth.user.id, voter_id, contact)
        .await
        .map(Json)
        .map_err(voter_error_to_api)
}
