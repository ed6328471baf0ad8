//! Process configuration parsed from environment variables.
//!
//! `.env` is loaded by `main` via `dotenvy` before `AppConfig::from_env` runs,
//! so local development and deployed environments share one code path.

use std::time::Duration;

use crate::rate_limit::{
    DEFAULT_GLOBAL_LIMIT, DEFAULT_GLOBAL_WINDOW_SECS, DEFAULT_PER_EMAIL_LIMIT, DEFAULT_PER_EMAIL_WINDOW_SECS,
    RateLimitConfig,
};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_GOOGLE_CALENDAR_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Resend email delivery settings. Both variables must be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub api_key: String,
    pub from: String,
}

/// Google Calendar settings. Both token and calendar id must be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarConfig {
    pub access_token: String,
    pub calendar_id: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub cookie_secure: bool,
    /// `None` means any origin.
    pub cors_allow_origin: Option<String>,
    pub session_ttl_days: i64,
    pub sweep_interval: Duration,
    pub email: Option<EmailConfig>,
    pub calendar: Option<CalendarConfig>,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Build typed config from the process environment.
    ///
    /// Required:
    /// - `DATABASE_URL`
    ///
    /// Optional:
    /// - `PORT` (default 3000), `DB_MAX_CONNECTIONS` (default 5)
    /// - `COOKIE_SECURE` (default false)
    /// - `CORS_ALLOW_ORIGIN` (default any)
    /// - `SESSION_TTL_DAYS` (default 30), `SWEEP_INTERVAL_SECS` (default 300)
    /// - `RESEND_API_KEY` + `RESEND_FROM`
    /// - `GOOGLE_CALENDAR_TOKEN` + `GOOGLE_CALENDAR_ID`, `GOOGLE_CALENDAR_BASE_URL`
    /// - `ACCESS_CODE_PER_EMAIL_LIMIT` (3) per `ACCESS_CODE_PER_EMAIL_WINDOW_SECS` (600)
    /// - `ACCESS_CODE_GLOBAL_LIMIT` (60) per `ACCESS_CODE_GLOBAL_WINDOW_SECS` (60)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `DATABASE_URL` is absent or a numeric
    /// variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Used by tests to avoid
    /// mutating process-wide environment.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let port = parse_or(&lookup, "PORT", DEFAULT_PORT)?;
        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?;
        let session_ttl_days = parse_or(&lookup, "SESSION_TTL_DAYS", DEFAULT_SESSION_TTL_DAYS)?;
        let sweep_interval_secs = parse_or(&lookup, "SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;

        let rate_limit = RateLimitConfig {
            per_email_limit: parse_or(&lookup, "ACCESS_CODE_PER_EMAIL_LIMIT", DEFAULT_PER_EMAIL_LIMIT)?,
            per_email_window: Duration::from_secs(parse_or(
                &lookup,
                "ACCESS_CODE_PER_EMAIL_WINDOW_SECS",
                DEFAULT_PER_EMAIL_WINDOW_SECS,
            )?),
            global_limit: parse_or(&lookup, "ACCESS_CODE_GLOBAL_LIMIT", DEFAULT_GLOBAL_LIMIT)?,
            global_window: Duration::from_secs(parse_or(&lookup, "ACCESS_CODE_GLOBAL_WINDOW_SECS", DEFAULT_GLOBAL_WINDOW_SECS)?),
        };

        let cookie_secure = match lookup("COOKIE_SECURE") {
            None => false,
            Some(raw) => {
                parse_bool(&raw).ok_or(ConfigError::Invalid { var: "COOKIE_SECURE", value: raw })?
            }
        };

        let cors_allow_origin = lookup("CORS_ALLOW_ORIGIN")
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty() && v != "*");

        let email = match (lookup("RESEND_API_KEY"), lookup("RESEND_FROM")) {
            (Some(api_key), Some(from)) => Some(EmailConfig { api_key, from }),
            _ => None,
        };

        let calendar = match (lookup("GOOGLE_CALENDAR_TOKEN"), lookup("GOOGLE_CALENDAR_ID")) {
            (Some(access_token), Some(calendar_id)) => Some(CalendarConfig {
                access_token,
                calendar_id,
                base_url: lookup("GOOGLE_CALENDAR_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_GOOGLE_CALENDAR_BASE_URL.to_owned())
                    .trim_end_matches('/')
                    .to_owned(),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            port,
            db_max_connections,
            cookie_secure,
            cors_allow_origin,
            session_ttl_days,
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            email,
            calendar,
            rate_limit,
        })
    }
}

/// Parse a boolean flag: `1/true/yes/on` or `0/false/no/off`, case-insensitive.
#[must_use]
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
