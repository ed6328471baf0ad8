//! Session management.
//!
//! ARCHITECTURE
//! ============
//! HTTP auth uses opaque session tokens stored server-side. The token travels
//! either in an HttpOnly cookie (browser) or an `Authorization: Bearer`
//! header (scripts, mobile). Expiry is enforced in SQL on every lookup, and
//! the sweeper deletes expired rows in the background.

use std::fmt::Write;

use rand::Rng;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// User row returned from session validation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionUser {
    /// Unique user identifier.
    pub id: Uuid,
    /// Login email (normalized lowercase).
    pub email: String,
    /// Display name.
    pub name: String,
    /// Contact phone, if the user provided one.
    pub phone: Option<String>,
}

/// Result of inspecting a session token.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenInfo {
    pub user_id: Uuid,
    pub auth_method: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Create a session for the given user, returning the token.
pub async fn create_session(pool: &PgPool, user_id: Uuid, ttl_days: i64) -> Result<String, sqlx::Error> {
    let token = generate_token();
    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, now() + make_interval(days => $3))")
        .bind(&token)
        .bind(user_id)
        .bind(i32::try_from(ttl_days).unwrap_or(i32::MAX))
        .execute(pool)
        .await?;
    Ok(token)
}

/// Validate a session token and return the associated user.
pub async fn validate_session(pool: &PgPool, token: &str) -> Result<Option<SessionUser>, sqlx::Error> {
    let row = sqlx::query(
        r"SELECT u.id, u.email, u.name, u.phone
          FROM sessions s
          JOIN users u ON u.id = s.user_id
          WHERE s.token = $1 AND s.expires_at > now()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| SessionUser {
        id: r.get("id"),
        email: r.get("email"),
        name: r.get("name"),
        phone: r.get("phone"),
    }))
}

/// Describe a live session token without touching it.
pub async fn inspect_token(pool: &PgPool, token: &str) -> Result<Option<TokenInfo>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Uuid, OffsetDateTime, OffsetDateTime)>(
        "SELECT user_id, created_at, expires_at FROM sessions WHERE token = $1 AND expires_at > now()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(user_id, issued_at, expires_at)| TokenInfo {
        user_id,
        auth_method: "email_code",
        issued_at,
        expires_at,
    }))
}

/// Delete a session by token.
pub async fn delete_session(pool: &PgPool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Update the caller's display name and phone.
pub async fn update_profile(
    pool: &PgPool,
    user_id: Uuid,
    name: Option<&str>,
    phone: Option<Option<&str>>,
) -> Result<(), sqlx::Error> {
    if let Some(name) = name {
        sqlx::query("UPDATE users SET name = $2 WHERE id = $1")
            .bind(user_id)
            .bind(name)
            .execute(pool)
            .await?;
    }
    if let Some(phone) = phone {
        sqlx::query("UPDATE users SET phone = $2 WHERE id = $1")
            .bind(user_id)
            .bind(phone)
            .execute(pool)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
