//! Member service: roles, membership lookups and the access guard used by
//! every group-scoped operation.
//!
//! DESIGN
//! ======
//! A user has at most one membership row per group (`UNIQUE (group_id,
//! user_id)`) and at most one active membership overall (partial unique
//! index). Leaving a group flips `is_active` instead of deleting the row, so
//! case assignments that point at the member stay intact.

use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Politician,
    Manager,
    Staff,
}

impl Role {
    pub const ALL: [&'static str; 3] = ["politician", "manager", "staff"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Politician => "politician",
            Self::Manager => "manager",
            Self::Staff => "staff",
        }
    }

    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "politician" => Some(Self::Politician),
            "manager" => Some(Self::Manager),
            "staff" => Some(Self::Staff),
            _ => None,
        }
    }

    /// Create and revoke invitations, deactivate other members, delete cases.
    #[must_use]
    pub fn can_manage_team(self) -> bool {
        matches!(self, Self::Politician | Self::Manager)
    }

    /// Change another member's role.
    #[must_use]
    pub fn can_change_roles(self) -> bool {
        matches!(self, Self::Politician)
    }

    /// Reassign a case the member is not in charge of.
    #[must_use]
    pub fn can_reassign_any_case(self) -> bool {
        self.can_manage_team()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemberError {
    #[error("not an active member of group {0}")]
    NotMember(Uuid),
    #[error("member not found: {0}")]
    NotFound(Uuid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("group must keep at least one politician")]
    LastPolitician,
    #[error("unknown role: {0}")]
    InvalidRole(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, FromRow)]
struct MemberRecord {
    id: Uuid,
    group_id: Uuid,
    user_id: Uuid,
    role: String,
    title: Option<String>,
    is_active: bool,
    joined_at: OffsetDateTime,
    name: String,
    email: String,
    phone: Option<String>,
}

/// Member row joined with the user's contact details.
#[derive(Debug, Clone, Serialize)]
pub struct MemberRow {
    pub id: Uuid,
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub title: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl TryFrom<MemberRecord> for MemberRow {
    type Error = MemberError;

    fn try_from(r: MemberRecord) -> Result<Self, Self::Error> {
        let role = Role::from_str(&r.role).ok_or(MemberError::InvalidRole(r.role))?;
        Ok(Self {
            id: r.id,
            group_id: r.group_id,
            user_id: r.user_id,
            role,
            title: r.title,
            is_active: r.is_active,
            joined_at: r.joined_at,
            name: r.name,
            email: r.email,
            phone: r.phone,
        })
    }
}

/// The caller's active membership, as returned by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MembershipView {
    pub member_id: Uuid,
    pub group_id: Uuid,
    pub group_name: String,
    pub politician_name: String,
    pub role: Role,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemberUpdate {
    pub role: Option<Role>,
    /// `Some(None)` clears the title.
    pub title: Option<Option<String>>,
}

const MEMBER_SELECT: &str = "SELECT m.id, m.group_id, m.user_id, m.role, m.title, m.is_active, m.joined_at, \
                                    u.name, u.email, u.phone \
                             FROM members m JOIN users u ON u.id = m.user_id";

// =============================================================================
// GUARDS
// =============================================================================

/// Return the caller's active membership in `group_id`.
///
/// # Errors
///
/// Returns [`MemberError::NotMember`] if the user has no active membership
/// in the group.
pub async fn require_active_member<'e, E>(executor: E, group_id: Uuid, user_id: Uuid) -> Result<MemberRow, MemberError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let record = sqlx::query_as::<_, MemberRecord>(&format!(
        "{MEMBER_SELECT} WHERE m.group_id = $1 AND m.user_id = $2 AND m.is_active"
    ))
    .bind(group_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or(MemberError::NotMember(group_id))?;
    record.try_into()
}

/// Load an active member of `group_id` by member id.
///
/// # Errors
///
/// Returns [`MemberError::NotFound`] if no active member matches.
pub async fn find_active_member<'e, E>(executor: E, group_id: Uuid, member_id: Uuid) -> Result<MemberRow, MemberError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let record = sqlx::query_as::<_, MemberRecord>(&format!(
        "{MEMBER_SELECT} WHERE m.group_id = $1 AND m.id = $2 AND m.is_active"
    ))
    .bind(group_id)
    .bind(member_id)
    .fetch_optional(executor)
    .await?
    .ok_or(MemberError::NotFound(member_id))?;
    record.try_into()
}

// =============================================================================
// QUERIES
// =============================================================================

/// The user's single active membership, if any.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn membership_for_user(pool: &PgPool, user_id: Uuid) -> Result<Option<MembershipView>, MemberError> {
    let row = sqlx::query_as::<_, (Uuid, Uuid, String, String, String, Option<String>)>(
        "SELECT m.id, g.id, g.name, g.politician_name, m.role, m.title
         FROM members m
         JOIN groups g ON g.id = m.group_id
         WHERE m.user_id = $1 AND m.is_active",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some((member_id, group_id, group_name, politician_name, role, title)) = row else {
        return Ok(None);
    };
    let role = Role::from_str(&role).ok_or(MemberError::InvalidRole(role))?;
    Ok(Some(MembershipView { member_id, group_id, group_name, politician_name, role, title }))
}

/// List active members of a group. Caller must be an active member.
///
/// # Errors
///
/// Returns [`MemberError::NotMember`] or a database error.
pub async fn list_members(pool: &PgPool, group_id: Uuid, viewer_id: Uuid) -> Result<Vec<MemberRow>, MemberError> {
    require_active_member(pool, group_id, viewer_id).await?;

    let records = sqlx::query_as::<_, MemberRecord>(&format!(
        "{MEMBER_SELECT} WHERE m.group_id = $1 AND m.is_active \
         ORDER BY CASE m.role WHEN 'politician' THEN 0 WHEN 'manager' THEN 1 ELSE 2 END, u.name"
    ))
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    records.into_iter().map(MemberRow::try_from).collect()
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Check whether `actor` may apply `update` to `target`.
pub(crate) fn check_update_allowed(
    actor: &MemberRow,
    target: &MemberRow,
    update: &MemberUpdate,
    politician_count: i64,
) -> Result<(), MemberError> {
    if let Some(new_role) = update.role {
        if new_role != target.role {
            if !actor.role.can_change_roles() {
                return Err(MemberError::Forbidden("only the politician can change roles"));
            }
            if target.role == Role::Politician && politician_count <= 1 {
                return Err(MemberError::LastPolitician);
            }
        }
    }
    if update.title.is_some() && actor.id != target.id && !actor.role.can_manage_team() {
        return Err(MemberError::Forbidden("cannot edit another member's title"));
    }
    Ok(())
}

/// Change a member's role and/or title.
///
/// # Errors
///
/// Returns [`MemberError::Forbidden`] when the actor lacks permission and
/// [`MemberError::LastPolitician`] when the change would leave the group
/// without a politician.
pub async fn update_member(
    pool: &PgPool,
    group_id: Uuid,
    actor_id: Uuid,
    member_id: Uuid,
    update: MemberUpdate,
) -> Result<MemberRow, MemberError> {
    let mut tx = pool.begin().await?;
    let actor = require_active_member(&mut *tx, group_id, actor_id).await?;
    let target = find_active_member(&mut *tx, group_id, member_id).await?;

    let politician_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM members WHERE group_id = $1 AND role = 'politician' AND is_active",
    )
    .bind(group_id)
    .fetch_one(&mut *tx)
    .await?;

    check_update_allowed(&actor, &target, &update, politician_count)?;

    if let Some(role) = update.role {
        sqlx::query("UPDATE members SET role = $2 WHERE id = $1")
            .bind(member_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
    }
    if let Some(title) = &update.title {
        sqlx::query("UPDATE members SET title = $2 WHERE id = $1")
            .bind(member_id)
            .bind(title.as_deref())
            .execute(&mut *tx)
            .await?;
    }

    let updated = find_active_member(&mut *tx, group_id, member_id).await?;
    tx.commit().await?;
    tracing::info!(%group_id, %member_id, role = updated.role.as_str(), "member updated");
    Ok(updated)
}

pub(crate) fn check_deactivate_allowed(actor: &MemberRow, target: &MemberRow) -> Result<(), MemberError> {
    if target.role == Role::Politician {
        return Err(MemberError::LastPolitician);
    }
    if actor.id != target.id && !actor.role.can_manage_team() {
        return Err(MemberError::Forbidden("cannot remove other members"));
    }
    if actor.id != target.id && actor.role == Role::Manager && target.role == Role::Manager {
        return Err(MemberError::Forbidden("managers cannot remove other managers"));
    }
    Ok(())
}

/// Deactivate a member (remove from team, or leave).
///
/// # Errors
///
/// Returns [`MemberError::Forbidden`] or [`MemberError::LastPolitician`].
pub async fn deactivate_member(pool: &PgPool, group_id: Uuid, actor_id: Uuid, member_id: Uuid) -> Result<(), MemberError> {
    let actor = require_active_member(pool, group_id, actor_id).await?;
    let target = find_active_member(pool, group_id, member_id).await?;
    check_deactivate_allowed(&actor, &target)?;

    sqlx::query("UPDATE members SET is_active = FALSE WHERE id = $1")
        .bind(member_id)
        .execute(pool)
        .await?;
    tracing::info!(%group_id, %member_id, %actor_id, "member deactivated");
    Ok(())
}

#[cfg(test)]
#[path = "member_test.rs"]
mod tests;
