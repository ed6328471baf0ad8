use super::*;
use axum::http::HeaderValue;
use axum::http::header::COOKIE;

// =============================================================================
// token extraction
// =============================================================================

#[test]
fn token_from_bearer_header() {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
    assert_eq!(token_from_headers(&headers), Some("abc123".to_owned()));
}

#[test]
fn token_from_session_cookie() {
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_static("theme=dark; polify_session=tok42"));
    assert_eq!(token_from_headers(&headers), Some("tok42".to_owned()));
}

#[test]
fn bearer_wins_over_cookie() {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
    headers.insert(COOKIE, HeaderValue::from_static("polify_session=from-cookie"));
    assert_eq!(token_from_headers(&headers), Some("from-header".to_owned()));
}

#[test]
fn missing_or_empty_token_is_none() {
    assert_eq!(token_from_headers(&HeaderMap::new()), None);
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
    headers.insert(COOKIE, HeaderValue::from_static("polify_session="));
    assert_eq!(token_from_headers(&headers), None);
    let mut basic = HeaderMap::new();
    basic.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
    assert_eq!(token_from_headers(&basic), None);
}

// =============================================================================
// cookies
// =============================================================================

#[test]
fn session_cookie_attributes() {
    let settings = AuthSettings { cookie_secure: true, session_ttl_days: 7 };
    let cookie = session_cookie(settings, "tok".into());
    assert_eq!(cookie.name(), COOKIE_NAME);
    assert_eq!(cookie.value(), "tok");
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.secure(), Some(true));
    assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    assert_eq!(cookie.max_age(), Some(Duration::days(7)));
}

#[test]
fn cleared_cookie_expires_immediately() {
    let cookie = cleared_cookie(AuthSettings::default());
    assert_eq!(cookie.value(), "");
    assert_eq!(cookie.max_age(), Some(Duration::ZERO));
}

// =============================================================================
// error mapping
// =============================================================================

#[test]
fn access_code_errors_map_to_status() {
    assert_eq!(access_code_error_to_api(AccessCodeError::InvalidEmail).status, StatusCode::BAD_REQUEST);
    assert_eq!(access_code_error_to_api(AccessCodeError::InvalidCode).status, StatusCode::BAD_REQUEST);
    assert_eq!(
        access_code_error_to_api(AccessCodeError::VerificationFailed).status,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        access_code_error_to_api(AccessCodeError::Delivery(crate::services::mailer::MailError("down".into()))).status,
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        access_code_error_to_api(AccessCodeError::Db(sqlx::Error::RowNotFound)).status,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn rate_limit_maps_to_429() {
    let err = RateLimitError::PerEmailExceeded { limit: 3, window_secs: 600 };
    let api = rate_limit_error_to_api(&err);
    assert_eq!(api.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(api.code, "rate_limited");
}

// =============================================================================
// profile validation
// =============================================================================

#[test]
fn profile_validation_normalizes_phone_and_trims_name() {
    let body = ProfileBody { name: Some("  Lin Aide ".into()), phone: Some(Some("02-2345-6789".into())) };
    let (name, phone) = validate_profile(&body).unwrap();
    assert_eq!(name.as_deref(), Some("Lin Aide"));
    assert_eq!(phone, Some(Some("0223456789".to_owned())));
}

#[test]
fn profile_null_or_blank_phone_clears_it() {
    let body: ProfileBody = serde_json::from_str(r#"{"phone": null}"#).unwrap();
    assert_eq!(validate_profile(&body).unwrap().1, Some(None));
    let body = ProfileBody { name: None, phone: Some(Some("  ".into())) };
    assert_eq!(validate_profile(&body).unwrap().1, Some(None));
    let body = ProfileBody::default();
    assert_eq!(validate_profile(&body).unwrap(), (None, None));
}

#[test]
fn profile_rejects_blank_name_and_bad_phone() {
    let body = ProfileBody { name: Some(" ".into()), phone: None };
    assert_eq!(validate_profile(&body).unwrap_err().status, StatusCode::BAD_REQUEST);
    let body = ProfileBody { name: None, phone: Some(Some("12".into())) };
    assert_eq!(validate_profile(&body).unwrap_err().code, "validation");
}

// =============================================================================
// handlers
// =============================================================================

#[tokio::test]
async fn request_code_rejects_invalid_email_before_db() {
    let state = crate::state::test_helpers::test_app_state();
    let err = request_code(State(state), Json(RequestCodeBody { email: "not-an-email".into() }))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.code, "invalid_email");
}

#[tokio::test]
async fn request_code_is_rate_limited_per_email() {
    let state = crate::state::test_helpers::test_app_state();
    let email = format!("limited-{}@example.com", uuid::Uuid::new_v4());
    for _ in 0..3 {
        state.rate_limiter.check_and_record(&email).unwrap();
    }
    let err = request_code(State(state), Json(RequestCodeBody { email }))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn extractor_rejects_missing_token() {
    let state = crate::state::test_helpers::test_app_state();
    let request = axum::http::Request::builder().uri("/api/auth/me").body(()).unwrap();
    let (mut parts, ()) = request.into_parts();
    let err = <AuthUser as axum::extract::FromRequestParts<AppState>>::from_request_parts(&mut parts, &state)
        .await
        .err()
        .unwrap();
    assert_eq!(err.status, StatusCode::UNAUTHORIZED);
}
