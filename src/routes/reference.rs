//! Reference data routes: counties, districts, case categories.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiError;
use super::auth::AuthUser;
use super::groups::member_error_to_api;
use crate::services::reference::{self, Category, County, District, ReferenceError};
use crate::state::AppState;

pub(crate) fn reference_error_to_api(err: ReferenceError) -> ApiError {
    match err {
        ReferenceError::Invalid(e) => e.into(),
        ReferenceError::Access(e) => member_error_to_api(e),
        ReferenceError::Database(e) => ApiError::internal(&e),
    }
}

/// `GET /api/counties`: public; the registration form needs it.
pub async fn list_counties(State(state): State<AppState>) -> Result<Json<Vec<County>>, ApiError> {
    reference::list_counties(&state.pool)
        .await
        .map(Json)
        .map_err(reference_error_to_api)
}

#[derive(Debug, Default, Deserialize)]
pub struct DistrictQuery {
    pub county_id: Option<i32>,
}

/// `GET /api/districts?county_id=`
pub async fn list_districts(
    State(state): State<AppState>,
    Query(query): Query<DistrictQuery>,
) -> Result<Json<Vec<District>>, ApiError> {
    reference::list_districts(&state.pool, query.county_id)
        .await
        .map(Json)
        .map_err(reference_error_to_api)
}

/// `GET /api/groups/{id}/categories`
pub async fn list_categories(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Vec<Category>>, ApiError> {
    reference::list_categories(&state.pool, group_id, auth.user.id)
        .await
        .map(Json)
        .map_err(reference_error_to_api)
}

#[derive(Deserialize)]
pub struct CategoryBody {
    pub name: String,
}

/// `POST /api/groups/{id}/categories`: idempotent by name.
pub async fn create_category(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<Uuid>,
    Json(body): Json<CategoryBody>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    let category = reference::create_category(&state.pool, group_id, auth.user.id, &body.name)
        .await
        .map_err(reference_error_to_api)?;
    Ok((StatusCode::CREATED, Json(category)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::member::MemberError;
    use crate::services::validation::FieldError;

    #[test]
    fn reference_errors_map_to_status() {
        let invalid = reference_error_to_api(ReferenceError::Invalid(FieldError {
            field: "category",
            message: "is required".into(),
        }));
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            reference_error_to_api(ReferenceError::Access(MemberError::NotMember(Uuid::nil()))).status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            reference_error_to_api(ReferenceError::Database(sqlx::Error::PoolClosed)).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn district_query_parses_county() {
        let uri: axum::http::Uri = "/api/districts?county_id=12".parse().unwrap();
        let Query(query) = Query::<DistrictQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(query.county_id, Some(12));
    }
}
