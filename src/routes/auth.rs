//! Auth routes: email access codes, session cookie, profile.

use axum::extract::{FromRef, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use time::Duration;

use super::ApiError;
use crate::rate_limit::RateLimitError;
use crate::services::access_code::{self, AccessCodeError};
use crate::services::member::{self, MembershipView};
use crate::services::session;
use crate::services::validation;
use crate::state::{AppState, AuthSettings};

pub(crate) const COOKIE_NAME: &str = "polify_session";

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user extracted from the session cookie or a bearer token.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: session::SessionUser,
    pub token: String,
}

/// Bearer token first, then the session cookie.
pub(crate) fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_owned());
    }
    let jar = CookieJar::from_headers(headers);
    jar.get(COOKIE_NAME)
        .map(Cookie::value)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers).ok_or_else(ApiError::unauthorized)?;

        let app_state = AppState::from_ref(state);
        let user = session::validate_session(&app_state.pool, &token)
            .await
            .map_err(|e| ApiError::internal(&e))?
            .ok_or_else(ApiError::unauthorized)?;

        Ok(Self { user, token })
    }
}

fn session_cookie(settings: AuthSettings, token: String) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(settings.cookie_secure)
        .max_age(Duration::days(settings.session_ttl_days))
        .build()
}

fn cleared_cookie(settings: AuthSettings) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(settings.cookie_secure)
        .max_age(Duration::ZERO)
        .build()
}

pub(crate) fn access_code_error_to_api(err: AccessCodeError) -> ApiError {
    match err {
        AccessCodeError::InvalidEmail => ApiError::bad_request("invalid_email", err.to_string()),
        AccessCodeError::InvalidCode => ApiError::bad_request("invalid_code", err.to_string()),
        AccessCodeError::VerificationFailed => {
            ApiError::new(StatusCode::UNAUTHORIZED, "verification_failed", err.to_string())
        }
        AccessCodeError::Delivery(e) => {
            tracing::error!(error = %e, "access code delivery failed");
            ApiError::new(StatusCode::BAD_GATEWAY, "delivery_failed", "could not send the sign-in email")
        }
        AccessCodeError::Db(e) => ApiError::internal(&e),
    }
}

pub(crate) fn rate_limit_error_to_api(err: &RateLimitError) -> ApiError {
    ApiError::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", err.to_string())
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Deserialize)]
pub struct RequestCodeBody {
    pub email: String,
}

/// `POST /api/auth/request-code`: email a one-time sign-in code.
pub async fn request_code(
    State(state): State<AppState>,
    Json(body): Json<RequestCodeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = access_code::normalize_email(&body.email)
        .ok_or_else(|| access_code_error_to_api(AccessCodeError::InvalidEmail))?;
    state
        .rate_limiter
        .check_and_record(&email)
        .map_err(|e| rate_limit_error_to_api(&e))?;

    let (email, code) = access_code::request_access_code(&state.pool, &email)
        .await
        .map_err(access_code_error_to_api)?;
    access_code::deliver_access_code(state.mailer.as_deref(), &email, &code)
        .await
        .map_err(access_code_error_to_api)?;

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct VerifyCodeBody {
    pub email: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct VerifyCodeResponse {
    pub token: String,
    pub user: session::SessionUser,
}

/// `POST /api/auth/verify-code`: exchange a code for a session.
pub async fn verify_code(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<VerifyCodeBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = access_code::verify_access_code(&state.pool, &body.email, &body.code)
        .await
        .map_err(access_code_error_to_api)?;

    let token = session::create_session(&state.pool, user_id, state.auth.session_ttl_days)
        .await
        .map_err(|e| ApiError::internal(&e))?;
    let user = session::validate_session(&state.pool, &token)
        .await
        .map_err(|e| ApiError::internal(&e))?
        .ok_or_else(ApiError::unauthorized)?;

    tracing::info!(%user_id, "signed in with access code");
    let jar = jar.add(session_cookie(state.auth, token.clone()));
    Ok((jar, Json(VerifyCodeResponse { token, user })))
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: session::SessionUser,
    pub membership: Option<MembershipView>,
}

/// `GET /api/auth/me`: current user and active membership.
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Json<MeResponse>, ApiError> {
    let membership = member::membership_for_user(&state.pool, auth.user.id)
        .await
        .map_err(super::groups::member_error_to_api)?;
    Ok(Json(MeResponse { user: auth.user, membership }))
}

/// `GET /api/auth/token`: describe the caller's session token.
pub async fn token(State(state): State<AppState>, auth: AuthUser) -> Result<Json<session::TokenInfo>, ApiError> {
    session::inspect_token(&state.pool, &auth.token)
        .await
        .map_err(|e| ApiError::internal(&e))?
        .map(Json)
        .ok_or_else(ApiError::unauthorized)
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileBody {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "validation::nullable")]
    pub phone: Option<Option<String>>,
}

/// Validated profile patch: `(name, phone)` with the same shapes as
/// [`session::update_profile`].
pub(crate) fn validate_profile(body: &ProfileBody) -> Result<(Option<String>, Option<Option<String>>), ApiError> {
    let name = body
        .name
        .as_deref()
        .map(|n| validation::required("name", n, validation::MAX_NAME_LEN))
        .transpose()?;
    let phone = match body.phone.as_ref() {
        Some(Some(raw)) if !raw.trim().is_empty() => Some(Some(validation::phone("phone", raw)?)),
        Some(_) => Some(None),
        None => None,
    };
    Ok((name, phone))
}

/// `PATCH /api/auth/profile`: update display name and phone.
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<ProfileBody>,
) -> Result<Json<session::SessionUser>, ApiError> {
    let (name, phone) = validate_profile(&body)?;
    session::update_profile(&state.pool, auth.user.id, name.as_deref(), phone.as_ref().map(Option::as_deref))
        .await
        .map_err(|e| ApiError::internal(&e))?;
    let user = session::validate_session(&state.pool, &auth.token)
        .await
        .map_err(|e| ApiError::internal(&e))?
        .ok_or_else(ApiError::unauthorized)?;
    Ok(Json(user))
}

/// `POST /api/auth/logout`: delete session, clear cookie.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    if let Err(e) = session::delete_session(&state.pool, &auth.token).await {
        tracing::warn!(error = %e, user_id = %auth.user.id, "session delete failed during logout");
    }
    let jar = CookieJar::new().add(cleared_cookie(state.auth));
    (jar, StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
