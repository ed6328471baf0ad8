//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the JSON API under `/api` plus a liveness check. Every
//! handler returns `Result<_, ApiError>`; route modules translate their
//! service errors with explicit `*_error_to_api` functions so the HTTP
//! mapping for each failure is visible in one place.

pub mod auth;
pub mod cases;
pub mod dashboard;
pub mod groups;
pub mod invitations;
pub mod reference;
pub mod voters;

use axum::Router;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, patch, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowHeaders, AllowMethods, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::services::validation::FieldError;
use crate::state::AppState;

// =============================================================================
// ERRORS
// =============================================================================

/// JSON error body: `{ "error": code, "message": text }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "sign in required")
    }

    /// Log `err` and hide it behind a generic 500.
    pub fn internal(err: &dyn std::fmt::Display) -> Self {
        tracing::error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal server error")
    }
}

impl From<FieldError> for ApiError {
    fn from(err: FieldError) -> Self {
        Self::bad_request("validation", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_client_error() && self.status != StatusCode::UNAUTHORIZED {
            tracing::warn!(status = self.status.as_u16(), code = self.code, message = %self.message, "request rejected");
        }
        let body = serde_json::json!({ "error": self.code, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// CORS for the browser client. An explicit origin enables credentialed
/// requests so the session cookie is sent; otherwise any origin is allowed
/// without credentials.
fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let any = || CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let Some(origin) = origin else {
        return any();
    };
    match HeaderValue::from_str(origin) {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true),
        Err(e) => {
            tracing::warn!(%origin, error = %e, "invalid CORS_ALLOW_ORIGIN; allowing any origin");
            any()
        }
    }
}

/// Full API router.
pub fn app(state: AppState, cors_origin: Option<&str>) -> Router {
    Router::new()
        .route("/api/auth/request-code", post(auth::request_code))
        .route("/api/auth/verify-code", post(auth::verify_code))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/token", get(auth::token))
        .route("/api/auth/profile", patch(auth::update_profile))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/groups", post(groups::create_group))
        .route("/api/groups/{id}", get(groups::get_group))
        .route("/api/membership", get(groups::membership))
        .route("/api/invitations/{code}", get(invitations::preview))
        .route("/api/invitations/{code}/join", post(invitations::join))
        .route(
            "/api/groups/{id}/invitations",
            get(invitations::list).post(invitations::create),
        )
        .route(
            "/api/groups/{id}/invitations/{invitation_id}",
            delete(invitations::revoke),
        )
        .route("/api/groups/{id}/members", get(groups::list_members))
        .route(
            "/api/groups/{id}/members/{member_id}",
            patch(groups::update_member).delete(groups::deactivate_member),
        )
        .route("/api/groups/{id}/cases", get(cases::list).post(cases::create))
        .route("/api/groups/{id}/cases/export.jsonl", get(cases::export_jsonl))
        .route(
            "/api/groups/{id}/cases/{case_id}",
            get(cases::get).patch(cases::update).delete(cases::delete),
        )
        .route("/api/groups/{id}/cases/{case_id}/status", post(cases::update_status))
        .route("/api/groups/{id}/cases/{case_id}/assign", post(cases::assign))
        .route("/api/groups/{id}/cases/{case_id}/calendar", post(cases::calendar_event))
        .route("/api/groups/{id}/voters", get(voters::search))
        .route(
            "/api/groups/{id}/voters/{voter_id}",
            get(voters::get).patch(voters::update),
        )
        .route(
            "/api/groups/{id}/categories",
            get(reference::list_categories).post(reference::create_category),
        )
        .route("/api/counties", get(reference::list_counties))
        .route("/api/districts", get(reference::list_districts))
        .route("/api/groups/{id}/dashboard", get(dashboard::stats))
        .route("/healthz", get(healthz))
        .layer(cors_layer(cors_origin))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_error_becomes_validation_400() {
        let err = ApiError::from(FieldError { field: "title", message: "is required".into() });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "validation");
        assert_eq!(err.message, "title: is required");
    }

    #[tokio::test]
    async fn api_error_renders_json_body() {
        let response = ApiError::not_found("case not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"error": "not_found", "message": "case not found"}));
    }

    #[test]
    fn internal_hides_details() {
        let err = ApiError::internal(&"connection reset");
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "internal server error");
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        assert_eq!(healthz().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn router_builds_with_and_without_origin() {
        let state = crate::state::test_helpers::test_app_state();
        let _ = app(state.clone(), None);
        let _ = app(state, Some("https://polify.example"));
    }
}
