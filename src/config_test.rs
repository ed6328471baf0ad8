use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn missing_database_url_is_an_error() {
    let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
    assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
}

#[test]
fn blank_database_url_is_an_error() {
    let err = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "  ")])).unwrap_err();
    assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
}

#[test]
fn defaults_apply_when_only_database_url_set() {
    let config = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/polify")])).unwrap();
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.db_max_connections, DEFAULT_DB_MAX_CONNECTIONS);
    assert_eq!(config.session_ttl_days, DEFAULT_SESSION_TTL_DAYS);
    assert_eq!(config.sweep_interval, Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS));
    assert!(!config.cookie_secure);
    assert!(config.cors_allow_origin.is_none());
    assert!(config.email.is_none());
    assert!(config.calendar.is_none());
}

#[test]
fn invalid_port_is_reported_with_value() {
    let err = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x"), ("PORT", "eighty")])).unwrap_err();
    assert_eq!(err, ConfigError::Invalid { var: "PORT", value: "eighty".into() });
}

#[test]
fn invalid_cookie_secure_is_rejected() {
    let err =
        AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x"), ("COOKIE_SECURE", "maybe")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { var: "COOKIE_SECURE", .. }));
}

#[test]
fn email_requires_both_key_and_sender() {
    let only_key =
        AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x"), ("RESEND_API_KEY", "re_123")])).unwrap();
    assert!(only_key.email.is_none());

    let both = AppConfig::from_lookup(lookup_from(&[
        ("DATABASE_URL", "postgres://x"),
        ("RESEND_API_KEY", "re_123"),
        ("RESEND_FROM", "Polify <noreply@polify.tw>"),
    ]))
    .unwrap();
    let email = both.email.expect("email configured");
    assert_eq!(email.api_key, "re_123");
    assert_eq!(email.from, "Polify <noreply@polify.tw>");
}

#[test]
fn calendar_base_url_trailing_slash_trimmed() {
    let config = AppConfig::from_lookup(lookup_from(&[
        ("DATABASE_URL", "postgres://x"),
        ("GOOGLE_CALENDAR_TOKEN", "ya29.token"),
        ("GOOGLE_CALENDAR_ID", "primary"),
        ("GOOGLE_CALENDAR_BASE_URL", "http://localhost:9999/calendar/v3/"),
    ]))
    .unwrap();
    let calendar = config.calendar.expect("calendar configured");
    assert_eq!(calendar.base_url, "http://localhost:9999/calendar/v3");
    assert_eq!(calendar.calendar_id, "primary");
}

#[test]
fn cors_wildcard_means_any_origin() {
    let config =
        AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x"), ("CORS_ALLOW_ORIGIN", "*")])).unwrap();
    assert!(config.cors_allow_origin.is_none());

    let config = AppConfig::from_lookup(lookup_from(&[
        ("DATABASE_URL", "postgres://x"),
        ("CORS_ALLOW_ORIGIN", "https://app.polify.tw"),
    ]))
    .unwrap();
    assert_eq!(config.cors_allow_origin.as_deref(), Some("https://app.polify.tw"));
}

#[test]
fn parse_bool_variants() {
    for val in ["1", "true", "YES", " on "] {
        assert_eq!(parse_bool(val), Some(true), "expected true for {val:?}");
    }
    for val in ["0", "False", "no", "OFF"] {
        assert_eq!(parse_bool(val), Some(false), "expected false for {val:?}");
    }
    assert_eq!(parse_bool(""), None);
    assert_eq!(parse_bool("maybe"), None);
}

#[test]
fn rate_limits_default_and_override() {
    let config = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x")])).unwrap();
    assert_eq!(config.rate_limit, RateLimitConfig::default());

    let config = AppConfig::from_lookup(lookup_from(&[
        ("DATABASE_URL", "postgres://x"),
        ("ACCESS_CODE_PER_EMAIL_LIMIT", "5"),
        ("ACCESS_CODE_PER_EMAIL_WINDOW_SECS", "120"),
        ("ACCESS_CODE_GLOBAL_LIMIT", "200"),
        ("ACCESS_CODE_GLOBAL_WINDOW_SECS", "30"),
    ]))
    .unwrap();
    assert_eq!(config.rate_limit.per_email_limit, 5);
    assert_eq!(config.rate_limit.per_email_window, Duration::from_secs(120));
    assert_eq!(config.rate_limit.global_limit, 200);
    assert_eq!(config.rate_limit.global_window, Duration::from_secs(30));
}

#[test]
fn invalid_rate_limit_is_reported() {
    let err = AppConfig::from_lookup(lookup_from(&[
        ("DATABASE_URL", "postgres://x"),
        ("ACCESS_CODE_GLOBAL_LIMIT", "lots"),
    ]))
    .unwrap_err();
    assert_eq!(err, ConfigError::Invalid { var: "ACCESS_CODE_GLOBAL_LIMIT", value: "lots".into() });
}
