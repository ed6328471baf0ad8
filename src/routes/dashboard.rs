//! Dashboard route.

use axum::extract::{Path, State};
use axum::response::Json;
use uuid::Uuid;

use super::ApiError;
use super::auth::AuthUser;
use super::groups::member_error_to_api;
use crate::services::dashboard::{self, DashboardError, GroupStats};
use crate::state::AppState;

fn dashboard_error_to_api(err: DashboardError) -> ApiError {
    match err {
        DashboardError::Access(e) => member_error_to_api(e),
        DashboardError::Database(e) => ApiError::internal(&e),
    }
}

/// `GET /api/groups/{id}/dashboard`
pub async fn stats(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupStats>, ApiError> {
    dashboard::group_stats(&state.pool, group_id, auth.user.id)
        .await
        .map(Json)
        .map_err(dashboard_error_to_api)
}
