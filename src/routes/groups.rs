//! Group routes: registration, membership status, team management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiError;
use super::auth::AuthUser;
use crate::services::group::{self, GroupCreated, GroupError, GroupRow, NewGroup};
use crate::services::member::{self, MemberError, MemberRow, MemberUpdate, MembershipView, Role};
use crate::services::validation;
use crate::state::AppState;

pub(crate) fn member_error_to_api(err: MemberError) -> ApiError {
    match err {
        MemberError::NotMember(_) => ApiError::new(StatusCode::FORBIDDEN, "not_member", err.to_string()),
        MemberError::NotFound(_) => ApiError::not_found(err.to_string()),
        MemberError::Forbidden(reason) => ApiError::forbidden(reason),
        MemberError::LastPolitician => ApiError::new(StatusCode::CONFLICT, "last_politician", err.to_string()),
        MemberError::InvalidRole(_) => ApiError::internal(&err),
        MemberError::Database(e) => ApiError::internal(&e),
    }
}

pub(crate) fn group_error_to_api(err: GroupError) -> ApiError {
    match err {
        GroupError::Invalid(e) => e.into(),
        GroupError::NotFound(_) => ApiError::not_found(err.to_string()),
        GroupError::UnknownCounty(_) => ApiError::bad_request("unknown_county", err.to_string()),
        GroupError::AlreadyMember => ApiError::new(StatusCode::CONFLICT, "already_member", err.to_string()),
        GroupError::Access(e) => member_error_to_api(e),
        GroupError::Database(e) => ApiError::internal(&e),
    }
}

#[derive(Deserialize)]
pub struct CreateGroupBody {
    pub name: String,
    pub politician_name: String,
    #[serde(default)]
    pub county_id: Option<i32>,
}

/// `POST /api/groups`: register a group; the caller becomes its politician.
pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateGroupBody>,
) -> Result<(StatusCode, Json<GroupCreated>), ApiError> {
    let input = NewGroup { name: body.name, politician_name: body.politician_name, county_id: body.county_id };
    let created = group::create_group(&state.pool, auth.user.id, input)
        .await
        .map_err(group_error_to_api)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/groups/{id}`
pub async fn get_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupRow>, ApiError> {
    group::get_group(&state.pool, group_id, auth.user.id)
        .await
        .map(Json)
        .map_err(group_error_to_api)
}

/// `GET /api/membership`: the caller's active membership, or `null`.
/// Clients call this after registering or joining instead of polling.
pub async fn membership(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Option<MembershipView>>, ApiError> {
    member::membership_for_user(&state.pool, auth.user.id)
        .await
        .map(Json)
        .map_err(member_error_to_api)
}

/// `GET /api/groups/{id}/members`
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Vec<MemberRow>>, ApiError> {
    member::list_members(&state.pool, group_id, auth.user.id)
        .await
        .map(Json)
        .map_err(member_error_to_api)
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMemberBody {
    pub role: Option<String>,
    #[serde(default, deserialize_with = "validation::nullable")]
    pub title: Option<Option<String>>,
}

pub(crate) fn parse_member_update(body: UpdateMemberBody) -> Result<MemberUpdate, ApiError> {
    let role = body
        .role
        .as_deref()
        .map(|raw| validation::one_of("role", raw, Role::from_str, &Role::ALL))
        .transpose()?;
    let title = match body.title {
        Some(raw) => Some(validation::optional("title", raw.as_deref(), validation::MAX_NAME_LEN)?),
        None => None,
    };
    Ok(MemberUpdate { role, title })
}

/// `PATCH /api/groups/{id}/members/{member_id}`: change role or title.
pub async fn update_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, member_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateMemberBody>,
) -> Result<Json<MemberRow>, ApiError> {
    let update = parse_member_update(body)?;
    member::update_member(&state.pool, group_id, auth.user.id, member_id, update)
        .await
        .map(Json)
        .map_err(member_error_to_api)
}

/// `DELETE /api/groups/{id}/members/{member_id}`: remove a member or leave.
pub async fn deactivate_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    member::deactivate_member(&state.pool, group_id, auth.user.id, member_id)
        .await
        .map_err(member_error_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "groups_test.rs"]
mod tests;
