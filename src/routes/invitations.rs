//! Invitation routes: issue, list, revoke, preview and join.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiError;
use super::auth::AuthUser;
use super::groups::member_error_to_api;
use crate::services::invitation::{self, InvitationError, InvitationPreview, InvitationRow, NewInvitation};
use crate::services::member::{MemberRow, Role};
use crate::services::validation;
use crate::state::AppState;

pub(crate) fn invitation_error_to_api(err: InvitationError) -> ApiError {
    match err {
        InvitationError::InvalidCode => ApiError::new(StatusCode::NOT_FOUND, "invalid_code", err.to_string()),
        InvitationError::NotFound(_) => ApiError::not_found(err.to_string()),
        InvitationError::PoliticianRole | InvitationError::InvalidTtl | InvitationError::InvalidMaxUses => {
            ApiError::bad_request("validation", err.to_string())
        }
        InvitationError::AlreadyMember => ApiError::new(StatusCode::CONFLICT, "already_member", err.to_string()),
        InvitationError::Access(e) => member_error_to_api(e),
        InvitationError::Database(e) => ApiError::internal(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateInvitationBody {
    pub role: Option<String>,
    pub ttl_hours: Option<i32>,
    pub max_uses: Option<i32>,
}

/// Apply defaults (staff, 72 hours, one use) to missing fields.
pub(crate) fn parse_new_invitation(body: &CreateInvitationBody) -> Result<NewInvitation, ApiError> {
    let defaults = NewInvitation::default();
    let role = match body.role.as_deref() {
        Some(raw) => validation::one_of("role", raw, Role::from_str, &Role::ALL)?,
        None => defaults.role,
    };
    Ok(NewInvitation {
        role,
        ttl_hours: body.ttl_hours.unwrap_or(defaults.ttl_hours),
        max_uses: body.max_uses.unwrap_or(defaults.max_uses),
    })
}

/// `POST /api/groups/{id}/invitations`
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
    Json(body): Json<CreateInvitationBody>,
) -> Result<(StatusCode, Json<InvitationRow>), ApiError> {
    let input = parse_new_invitation(&body)?;
    let row = invitation::create_invitation(&state.pool, group_id, auth.user.id, input)
        .await
        .map_err(invitation_error_to_api)?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// `GET /api/groups/{id}/invitations`
pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Vec<InvitationRow>>, ApiError> {
    invitation::list_invitations(&state.pool, group_id, auth.user.id)
        .await
        .map(Json)
        .map_err(invitation_error_to_api)
}

/// `DELETE /api/groups/{id}/invitations/{invitation_id}`
pub async fn revoke(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((group_id, invitation_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    invitation::revoke_invitation(&state.pool, group_id, auth.user.id, invitation_id)
        .await
        .map_err(invitation_error_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/invitations/{code}`: group and role behind a code, without
/// consuming it.
pub async fn preview(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(code): Path<String>,
) -> Result<Json<InvitationPreview>, ApiError> {
    invitation::preview_invitation(&state.pool, &code)
        .await
        .map(Json)
        .map_err(invitation_error_to_api)
}

/// `POST /api/invitations/{code}/join`
pub async fn join(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
) -> Result<Json<MemberRow>, ApiError> {
    invitation::join_with_code(&state.pool, auth.user.id, &code)
        .await
        .map(Json)
        .map_err(invitation_error_to_api)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::member::MemberError;

    #[test]
    fn invitation_errors_map_to_status() {
        let invalid = invitation_error_to_api(InvitationError::InvalidCode);
        assert_eq!(invalid.status, StatusCode::NOT_FOUND);
        assert_eq!(invalid.code, "invalid_code");

        for err in [InvitationError::PoliticianRole, InvitationError::InvalidTtl, InvitationError::InvalidMaxUses] {
            assert_eq!(invitation_error_to_api(err).status, StatusCode::BAD_REQUEST);
        }
        assert_eq!(invitation_error_to_api(InvitationError::AlreadyMember).status, StatusCode::CONFLICT);
        assert_eq!(
            invitation_error_to_api(InvitationError::Access(MemberError::Forbidden("only politicians and managers can invite")))
                .status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            invitation_error_to_api(InvitationError::NotFound(Uuid::nil())).status,
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn empty_body_uses_defaults() {
        let body: CreateInvitationBody = serde_json::from_str("{}").unwrap();
        let input = parse_new_invitation(&body).unwrap();
        assert_eq!(input.role, Role::Staff);
        assert_eq!(input.ttl_hours, invitation::DEFAULT_TTL_HOURS);
        assert_eq!(input.max_uses, invitation::DEFAULT_MAX_USES);
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let body = CreateInvitationBody { role: Some("manager".into()), ttl_hours: Some(24), max_uses: Some(5) };
        let input = parse_new_invitation(&body).unwrap();
        assert_eq!(input.role, Role::Manager);
        assert_eq!(input.ttl_hours, 24);
        assert_eq!(input.max_uses, 5);
    }

    #[test]
    fn unknown_role_is_rejected_before_service_checks() {
        let body = CreateInvitationBody { role: Some("owner".into()), ..Default::default() };
        assert_eq!(parse_new_invitation(&body).unwrap_err().code, "validation");
    }

    #[tokio::test]
    async fn create_rejects_politician_role_without_db() {
        let state = crate::state::test_helpers::test_app_state();
        let body = CreateInvitationBody { role: Some("politician".into()), ..Default::default() };
        let input = parse_new_invitation(&body).unwrap();
        let err = invitation::create_invitation(&state.pool, Uuid::new_v4(), Uuid::new_v4(), input)
            .await
            .unwrap_err();
        assert_eq!(invitation_error_to_api(err).status, StatusCode::BAD_REQUEST);
    }
}
