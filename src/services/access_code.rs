//! Email access-code auth service.
//!
//! Creates and verifies short-lived six-character codes linked to an email.
//! Only a SHA-256 hash of each code is stored.

use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::services::mailer::{MailError, Mailer};

const CODE_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const MAX_FAILED_ATTEMPTS: i32 = 5;
const ACCESS_CODE_TEMPLATE: &str = include_str!("../../templates/access_code.html");
const ACCESS_CODE_SUBJECT: &str = "Your Polify sign-in code";

#[derive(Debug, thiserror::Error)]
pub enum AccessCodeError {
    #[error("invalid email")]
    InvalidEmail,
    #[error("invalid code")]
    InvalidCode,
    #[error("expired or incorrect code")]
    VerificationFailed,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Delivery(#[from] MailError),
}

#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    if !crate::services::validation::is_valid_email(&normalized) {
        return None;
    }
    Some(normalized)
}

#[must_use]
pub fn normalize_code(code: &str) -> Option<String> {
    let normalized = code.trim().to_ascii_uppercase();
    if normalized.len() != CODE_LEN
        || !normalized
            .chars()
            .all(|c| CODE_ALPHABET.contains(&(c as u8)))
    {
        return None;
    }
    Some(normalized)
}

#[must_use]
pub fn generate_access_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

#[must_use]
pub fn hash_access_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    crate::services::session::bytes_to_hex(&hasher.finalize())
}

fn name_from_email(email: &str) -> String {
    email
        .split('@')
        .next()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or("user")
        .to_owned()
}

/// Upsert the user for `email`, replace any outstanding code, and return the
/// new plaintext code together with the normalized email.
///
/// # Errors
///
/// Returns [`AccessCodeError::InvalidEmail`] for malformed input, or a
/// database error.
pub async fn request_access_code(pool: &PgPool, email: &str) -> Result<(String, String), AccessCodeError> {
    let normalized = normalize_email(email).ok_or(AccessCodeError::InvalidEmail)?;
    let name = name_from_email(&normalized);

    let mut tx = pool.begin().await?;

    sqlx::query(
        r"INSERT INTO users (email, name)
          VALUES ($1, $2)
          ON CONFLICT (email) DO NOTHING",
    )
    .bind(&normalized)
    .bind(name)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM access_codes WHERE email = $1 AND consumed_at IS NULL")
        .bind(&normalized)
        .execute(&mut *tx)
        .await?;

    let code = generate_access_code();
    sqlx::query("INSERT INTO access_codes (email, code_hash) VALUES ($1, $2)")
        .bind(&normalized)
        .bind(hash_access_code(&code))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok((normalized, code))
}

/// Consume the newest live code for `email` if it matches, returning the user id.
///
/// A mismatch increments the attempt counter; the code is burned after
/// `MAX_FAILED_ATTEMPTS` misses.
///
/// # Errors
///
/// Returns [`AccessCodeError::VerificationFailed`] for wrong, expired or
/// exhausted codes.
pub async fn verify_access_code(pool: &PgPool, email: &str, code: &str) -> Result<Uuid, AccessCodeError> {
    let normalized_email = normalize_email(email).ok_or(AccessCodeError::InvalidEmail)?;
    let normalized_code = normalize_code(code).ok_or(AccessCodeError::InvalidCode)?;
    let code_hash = hash_access_code(&normalized_code);

    let update = sqlx::query(
        r"UPDATE access_codes
          SET consumed_at = now()
          WHERE id = (
              SELECT id
              FROM access_codes
              WHERE email = $1
                AND consumed_at IS NULL
                AND expires_at > now()
              ORDER BY created_at DESC
              LIMIT 1
          )
          AND code_hash = $2
          RETURNING id",
    )
    .bind(&normalized_email)
    .bind(&code_hash)
    .fetch_optional(pool)
    .await?;

    if update.is_none() {
        sqlx::query(
            r"UPDATE access_codes
              SET attempts = attempts + 1,
                  consumed_at = CASE WHEN attempts + 1 >= $2 THEN now() ELSE consumed_at END
              WHERE id = (
                  SELECT id
                  FROM access_codes
                  WHERE email = $1
                    AND consumed_at IS NULL
                    AND expires_at > now()
                  ORDER BY created_at DESC
                  LIMIT 1
              )",
        )
        .bind(&normalized_email)
        .bind(MAX_FAILED_ATTEMPTS)
        .execute(pool)
        .await?;
        return Err(AccessCodeError::VerificationFailed);
    }

    let user_row = sqlx::query("SELECT id FROM users WHERE email = $1")
        .bind(&normalized_email)
        .fetch_optional(pool)
        .await?;

    let Some(user_row) = user_row else {
        return Err(AccessCodeError::VerificationFailed);
    };

    Ok(user_row.get("id"))
}

/// Deliver `code` to `email`. Without a mailer the code is logged at debug
/// level so local development works without a provider account.
///
/// # Errors
///
/// Returns [`AccessCodeError::Delivery`] if the provider rejects the message.
pub async fn deliver_access_code(mailer: Option<&dyn Mailer>, email: &str, code: &str) -> Result<(), AccessCodeError> {
    let Some(mailer) = mailer else {
        tracing::debug!(%email, %code, "email delivery not configured; access code logged");
        return Ok(());
    };
    let html = render_access_code_template(email, code);
    mailer.send(email, ACCESS_CODE_SUBJECT, &html).await?;
    Ok(())
}

#[must_use]
pub fn render_access_code_template(email: &str, code: &str) -> String {
    ACCESS_CODE_TEMPLATE
        .replace("{{EMAIL}}", email)
        .replace("{{CODE}}", code)
}

#[cfg(test)]
#[path = "access_code_test.rs"]
mod tests;
