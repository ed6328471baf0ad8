//! Voter (constituent contact) service.
//!
//! Voter identity is `(group_id, name, phone)`, enforced by a unique
//! constraint. Case intake upserts against it, so the same constituent
//! filing twice lands on one voter row.

use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::services::member::{self, MemberError};
use crate::services::validation::{self, FieldError};

pub const DEFAULT_SEARCH_LIMIT: i64 = 20;
pub const MAX_SEARCH_LIMIT: i64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum VoterError {
    #[error("invalid input: {0}")]
    Invalid(#[from] FieldError),
    #[error("voter not found: {0}")]
    NotFound(Uuid),
    #[error("another voter already has this name and phone")]
    Duplicate,
    #[error(transparent)]
    Access(#[from] MemberError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct VoterRow {
    pub id: Uuid,
    pub group_id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub line_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Validated contact fields shared by case intake and voter edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterContact {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub line_id: Option<String>,
}

impl VoterContact {
    /// Validate raw form fields. Error field names use the `contact_` prefix
    /// of the case intake form.
    ///
    /// # Errors
    ///
    /// Returns the first [`FieldError`] found.
    pub fn parse(
        name: &str,
        phone: &str,
        email: Option<&str>,
        address: Option<&str>,
        line_id: Option<&str>,
    ) -> Result<Self, FieldError> {
        Ok(Self {
            name: validation::required("contact_name", name, validation::MAX_NAME_LEN)?,
            phone: validation::phone("contact_phone", phone)?,
            email: validation::optional_email("contact_email", email)?,
            address: validation::optional("contact_address", address, 300)?,
            line_id: validation::optional("contact_line_id", line_id, 100)?,
        })
    }
}

/// A case in a voter's history.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct VoterCaseSummary {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoterDetail {
    #[serde(flatten)]
    pub voter: VoterRow,
    pub cases: Vec<VoterCaseSummary>,
}

const VOTER_COLUMNS: &str = "id, group_id, name, phone, email, address, line_id, created_at";

/// Find the voter by `(group_id, name, phone)` or create it. Optional fields
/// only fill gaps on an existing row; they never erase stored data.
pub(crate) async fn upsert_voter<'e, E>(executor: E, group_id: Uuid, contact: &VoterContact) -> Result<VoterRow, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, VoterRow>(&format!(
        "INSERT INTO voters (group_id, name, phone, email, address, line_id)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (group_id, name, phone) DO UPDATE SET
             email = COALESCE(EXCLUDED.email, voters.email),
             address = COALESCE(EXCLUDED.address, voters.address),
             line_id = COALESCE(EXCLUDED.line_id, voters.line_id)
         RETURNING {VOTER_COLUMNS}"
    ))
    .bind(group_id)
    .bind(&contact.name)
    .bind(&contact.phone)
    .bind(&contact.email)
    .bind(&contact.address)
    .bind(&contact.line_id)
    .fetch_one(executor)
    .await
}

/// Public entry for creating a voter outside case intake.
///
/// # Errors
///
/// Returns [`VoterError::Access`] if the actor is not an active member.
pub async fn find_or_create_voter(
    pool: &PgPool,
    group_id: Uuid,
    actor_id: Uuid,
    contact: VoterContact,
) -> Result<VoterRow, VoterError> {
    member::require_active_member(pool, group_id, actor_id).await?;
    Ok(upsert_voter(pool, group_id, &contact).await?)
}

pub(crate) fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT)
}

/// Escape `LIKE` metacharacters so user input matches literally.
pub(crate) fn like_pattern(query: &str) -> String {
    let escaped = query
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Phone `LIKE` pattern for a search query, or `None` when the query holds
/// nothing but phone separators.
pub(crate) fn phone_pattern(query: &str) -> Option<String> {
    let digits = validation::strip_phone(query.trim());
    (!digits.is_empty()).then(|| like_pattern(&digits))
}

/// Search voters by name or phone substring.
///
/// # Errors
///
/// Returns [`VoterError::Access`] if the viewer is not an active member.
pub async fn search_voters(
    pool: &PgPool,
    group_id: Uuid,
    viewer_id: Uuid,
    query: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<VoterRow>, VoterError> {
    member::require_active_member(pool, group_id, viewer_id).await?;
    let query = query.map(str::trim).filter(|q| !q.is_empty());

    let rows = match query {
        Some(q) => {
            let name_pattern = like_pattern(q);
            let phone_pattern = phone_pattern(q);
            sqlx::query_as::<_, VoterRow>(&format!(
                "SELECT {VOTER_COLUMNS} FROM voters
                 WHERE group_id = $1 AND (name ILIKE $2 OR ($3::TEXT IS NOT NULL AND phone LIKE $3))
                 ORDER BY name, created_at DESC
                 LIMIT $4"
            ))
            .bind(group_id)
            .bind(name_pattern)
            .bind(phone_pattern)
            .bind(clamp_limit(limit))
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, VoterRow>(&format!(
                "SELECT {VOTER_COLUMNS} FROM voters WHERE group_id = $1 ORDER BY created_at DESC LIMIT $2"
            ))
            .bind(group_id)
            .bind(clamp_limit(limit))
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Voter with their case history, newest first.
///
/// # Errors
///
/// Returns [`VoterError::NotFound`] if the voter is not in the group.
pub async fn get_voter(pool: &PgPool, group_id: Uuid, viewer_id: Uuid, voter_id: Uuid) -> Result<VoterDetail, VoterError> {
    member::require_active_member(pool, group_id, viewer_id).await?;
    let voter = sqlx::query_as::<_, VoterRow>(&format!(
        "SELECT {VOTER_COLUMNS} FROM voters WHERE id = $1 AND group_id = $2"
    ))
    .bind(voter_id)
    .bind(group_id)
    .fetch_optional(pool)
    .await?
    .ok_or(VoterError::NotFound(voter_id))?;

    let cases = sqlx::query_as::<_, VoterCaseSummary>(
        "SELECT c.id, c.title, c.status, c.received_at
         FROM voter_cases vc
         JOIN cases c ON c.id = vc.case_id
         WHERE vc.voter_id = $1
         ORDER BY c.received_at DESC, c.id DESC",
    )
    .bind(voter_id)
    .fetch_all(pool)
    .await?;

    Ok(VoterDetail { voter, cases })
}

/// Replace a voter's contact fields.
///
/// # Errors
///
/// Returns [`VoterError::Duplicate`] if the new name + phone collide with
/// another voter in the group.
pub async fn update_voter(
    pool: &PgPool,
    group_id: Uuid,
    actor_id: Uuid,
    voter_id: Uuid,
    contact: VoterContact,
) -> Result<VoterRow, VoterError> {
    member::require_active_member(pool, group_id, actor_id).await?;
    let row = sqlx::query_as::<_, VoterRow>(&format!(
        "UPDATE voters SET name = $3, phone = $4, email = $5, address = $6, line_id = $7
         WHERE id = $1 AND group_id = $2
         RETURNING {VOTER_COLUMNS}"
    ))
    .bind(voter_id)
    .bind(group_id)
    .bind(&contact.name)
    .bind(&contact.phone)
    .bind(&contact.email)
    .bind(&contact.address)
    .bind(&contact.line_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
            VoterError::Duplicate
        } else {
            VoterError::Database(e)
        }
    })?
    .ok_or(VoterError::NotFound(voter_id))?;
    Ok(row)
}

#[cfg(test)]
#[path = "voter_test.rs"]
mod tests;
