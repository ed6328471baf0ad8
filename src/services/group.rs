//! Group service: politician registration and group lookup.
//!
//! A group is created together with its owner's `politician` membership in
//! one transaction, so a group never exists without a politician.

use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::services::member::{self, MemberError, Role};
use crate::services::validation::{self, FieldError};

#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("invalid input: {0}")]
    Invalid(#[from] FieldError),
    #[error("group not found: {0}")]
    NotFound(Uuid),
    #[error("county not found: {0}")]
    UnknownCounty(i32),
    #[error("user already belongs to an active group")]
    AlreadyMember,
    #[error(transparent)]
    Access(#[from] MemberError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct GroupRow {
    pub id: Uuid,
    pub name: String,
    pub politician_name: String,
    pub county_id: Option<i32>,
    pub owner_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub politician_name: String,
    pub county_id: Option<i32>,
}

impl NewGroup {
    /// Trim and check required fields.
    ///
    /// # Errors
    ///
    /// Returns the first [`FieldError`] found.
    pub fn validated(self) -> Result<Self, FieldError> {
        Ok(Self {
            name: validation::required("name", &self.name, validation::MAX_NAME_LEN)?,
            politician_name: validation::required("politician_name", &self.politician_name, validation::MAX_NAME_LEN)?,
            county_id: self.county_id,
        })
    }
}

/// Group plus the creator's membership id.
#[derive(Debug, Clone, Serialize)]
pub struct GroupCreated {
    pub group: GroupRow,
    pub member_id: Uuid,
}

/// Register a new group owned by `owner_id`, who becomes its politician.
///
/// # Errors
///
/// Returns [`GroupError::AlreadyMember`] if the owner already has an active
/// membership, [`GroupError::UnknownCounty`] for a bad county id, or a
/// validation error.
pub async fn create_group(pool: &PgPool, owner_id: Uuid, input: NewGroup) -> Result<GroupCreated, GroupError> {
    let input = input.validated()?;
    let mut tx = pool.begin().await?;

    let already_active: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM members WHERE user_id = $1 AND is_active)")
            .bind(owner_id)
            .fetch_one(&mut *tx)
            .await?;
    if already_active {
        return Err(GroupError::AlreadyMember);
    }

    if let Some(county_id) = input.county_id {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM counties WHERE id = $1)")
            .bind(county_id)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            return Err(GroupError::UnknownCounty(county_id));
        }
    }

    let group = sqlx::query_as::<_, GroupRow>(
        "INSERT INTO groups (name, politician_name, county_id, owner_id)
         VALUES ($1, $2, $3, $4)
         RETURNING id, name, politician_name, county_id, owner_id, created_at",
    )
    .bind(&input.name)
    .bind(&input.politician_name)
    .bind(input.county_id)
    .bind(owner_id)
    .fetch_one(&mut *tx)
    .await?;

    let member_id: Uuid = sqlx::query_scalar(
        "INSERT INTO members (group_id, user_id, role) VALUES ($1, $2, $3)
         ON CONFLICT (group_id, user_id) DO UPDATE SET is_active = TRUE, role = EXCLUDED.role
         RETURNING id",
    )
    .bind(group.id)
    .bind(owner_id)
    .bind(Role::Politician.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(map_unique_violation)?;

    tx.commit().await?;
    tracing::info!(group_id = %group.id, %owner_id, "group registered");
    Ok(GroupCreated { group, member_id })
}

/// Fetch a group the viewer belongs to.
///
/// # Errors
///
/// Returns [`GroupError::Access`] if the viewer is not an active member.
pub async fn get_group(pool: &PgPool, group_id: Uuid, viewer_id: Uuid) -> Result<GroupRow, GroupError> {
    member::require_active_member(pool, group_id, viewer_id).await?;
    sqlx::query_as::<_, GroupRow>(
        "SELECT id, name, politician_name, county_id, owner_id, created_at FROM groups WHERE id = $1",
    )
    .bind(group_id)
    .fetch_optional(pool)
    .await?
    .ok_or(GroupError::NotFound(group_id))
}

/// Translate the one-active-membership index violation into `AlreadyMember`.
pub(crate) fn map_unique_violation(err: sqlx::Error) -> GroupError {
    if err
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
    {
        GroupError::AlreadyMember
    } else {
        GroupError::Database(err)
    }
}

#[cfg(test)]
#[path = "group_test.rs"]
mod tests;
