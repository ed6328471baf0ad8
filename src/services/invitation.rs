//! Team invitation service: code issuance, preview and join.
//!
//! DESIGN
//! ======
//! Joining claims one use of the code with a single conditional `UPDATE`
//! (`uses < max_uses AND expires_at > now() AND revoked_at IS NULL`) and
//! upserts the membership in the same transaction. Two concurrent joiners
//! racing for the last use serialize on the invitation row; the loser's
//! `UPDATE` matches nothing and the join fails cleanly.
//!
//! Unknown, expired, revoked and exhausted codes are all reported as
//! `InvalidCode` so callers cannot tell which codes exist.

use rand::Rng;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::services::group::{GroupError, map_unique_violation};
use crate::services::member::{self, MemberError, MemberRow, Role};

const CODE_LEN: usize = 8;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const DEFAULT_TTL_HOURS: i32 = 72;
pub const MAX_TTL_HOURS: i32 = 24 * 30;
pub const DEFAULT_MAX_USES: i32 = 1;
pub const MAX_MAX_USES: i32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum InvitationError {
    #[error("invalid or expired invitation code")]
    InvalidCode,
    #[error("invitation not found: {0}")]
    NotFound(Uuid),
    #[error("invitations cannot grant the politician role")]
    PoliticianRole,
    #[error("ttl_hours must be between 1 and {}", MAX_TTL_HOURS)]
    InvalidTtl,
    #[error("max_uses must be between 1 and {}", MAX_MAX_USES)]
    InvalidMaxUses,
    #[error("user already belongs to an active group")]
    AlreadyMember,
    #[error(transparent)]
    Access(#[from] MemberError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<GroupError> for InvitationError {
    fn from(err: GroupError) -> Self {
        match err {
            GroupError::AlreadyMember => Self::AlreadyMember,
            GroupError::Access(e) => Self::Access(e),
            GroupError::Database(e) => Self::Database(e),
            GroupError::Invalid(_) | GroupError::NotFound(_) | GroupError::UnknownCounty(_) => Self::InvalidCode,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InvitationRow {
    pub id: Uuid,
    pub group_id: Uuid,
    pub code: String,
    pub role: String,
    pub created_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub max_uses: i32,
    pub uses: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// What the role-selection screen shows before the user commits to joining.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationPreview {
    pub group_id: Uuid,
    pub group_name: String,
    pub politician_name: String,
    pub role: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct NewInvitation {
    pub role: Role,
    pub ttl_hours: i32,
    pub max_uses: i32,
}

impl Default for NewInvitation {
    fn default() -> Self {
        Self { role: Role::Staff, ttl_hours: DEFAULT_TTL_HOURS, max_uses: DEFAULT_MAX_USES }
    }
}

impl NewInvitation {
    pub(crate) fn check(&self) -> Result<(), InvitationError> {
        if self.role == Role::Politician {
            return Err(InvitationError::PoliticianRole);
        }
        if !(1..=MAX_TTL_HOURS).contains(&self.ttl_hours) {
            return Err(InvitationError::InvalidTtl);
        }
        if !(1..=MAX_MAX_USES).contains(&self.max_uses) {
            return Err(InvitationError::InvalidMaxUses);
        }
        Ok(())
    }
}

#[must_use]
pub fn generate_invitation_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Uppercase, strip separators, and check shape. `None` means the code
/// cannot possibly exist.
#[must_use]
pub fn normalize_invitation_code(raw: &str) -> Option<String> {
    let normalized: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '-' && *c != ' ')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.len() != CODE_LEN || !normalized.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
        return None;
    }
    Some(normalized)
}

const INVITATION_COLUMNS: &str = "id, group_id, code, role, created_by, expires_at, max_uses, uses, revoked_at, created_at";

/// Issue a new invitation code for `group_id`.
///
/// # Errors
///
/// Returns [`InvitationError::Access`] if the actor may not manage the team,
/// or a parameter error.
pub async fn create_invitation(
    pool: &PgPool,
    group_id: Uuid,
    actor_id: Uuid,
    input: NewInvitation,
) -> Result<InvitationRow, InvitationError> {
    input.check()?;
    let actor = member::require_active_member(pool, group_id, actor_id).await?;
    if !actor.role.can_manage_team() {
        return Err(MemberError::Forbidden("only politicians and managers can invite").into());
    }

    // Codes are random over 32^8; retry once on the rare collision.
    let mut attempts = 0;
    loop {
        let code = generate_invitation_code();
        let result = sqlx::query_as::<_, InvitationRow>(&format!(
            "INSERT INTO team_invitations (group_id, code, role, created_by, expires_at, max_uses)
             VALUES ($1, $2, $3, $4, now() + make_interval(hours => $5), $6)
             RETURNING {INVITATION_COLUMNS}"
        ))
        .bind(group_id)
        .bind(&code)
        .bind(input.role.as_str())
        .bind(actor_id)
        .bind(input.ttl_hours)
        .bind(input.max_uses)
        .fetch_one(pool)
        .await;

        match result {
            Ok(row) => {
                tracing::info!(%group_id, invitation_id = %row.id, role = %row.role, "invitation created");
                return Ok(row);
            }
            Err(e) if attempts < 1 && e.as_database_error().is_some_and(|d| d.is_unique_violation()) => {
                attempts += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// List the group's invitations, newest first.
///
/// # Errors
///
/// Returns [`InvitationError::Access`] if the viewer may not manage the team.
pub async fn list_invitations(pool: &PgPool, group_id: Uuid, viewer_id: Uuid) -> Result<Vec<InvitationRow>, InvitationError> {
    let viewer = member::require_active_member(pool, group_id, viewer_id).await?;
    if !viewer.role.can_manage_team() {
        return Err(MemberError::Forbidden("only politicians and managers can view invitations").into());
    }
    let rows = sqlx::query_as::<_, InvitationRow>(&format!(
        "SELECT {INVITATION_COLUMNS} FROM team_invitations WHERE group_id = $1 ORDER BY created_at DESC"
    ))
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Revoke an invitation. Revoking twice is a no-op.
///
/// # Errors
///
/// Returns [`InvitationError::NotFound`] if the invitation is not in the group.
pub async fn revoke_invitation(
    pool: &PgPool,
    group_id: Uuid,
    actor_id: Uuid,
    invitation_id: Uuid,
) -> Result<(), InvitationError> {
    let actor = member::require_active_member(pool, group_id, actor_id).await?;
    if !actor.role.can_manage_team() {
        return Err(MemberError::Forbidden("only politicians and managers can revoke invitations").into());
    }
    let result = sqlx::query(
        "UPDATE team_invitations SET revoked_at = COALESCE(revoked_at, now()) WHERE id = $1 AND group_id = $2",
    )
    .bind(invitation_id)
    .bind(group_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(InvitationError::NotFound(invitation_id));
    }
    tracing::info!(%group_id, %invitation_id, "invitation revoked");
    Ok(())
}

/// Look up a still-redeemable code without consuming it.
///
/// # Errors
///
/// Returns [`InvitationError::InvalidCode`] for anything not redeemable.
pub async fn preview_invitation(pool: &PgPool, raw_code: &str) -> Result<InvitationPreview, InvitationError> {
    let code = normalize_invitation_code(raw_code).ok_or(InvitationError::InvalidCode)?;
    let row = sqlx::query_as::<_, (Uuid, String, String, String, OffsetDateTime)>(
        "SELECT g.id, g.name, g.politician_name, i.role, i.expires_at
         FROM team_invitations i
         JOIN groups g ON g.id = i.group_id
         WHERE i.code = $1 AND i.revoked_at IS NULL AND i.expires_at > now() AND i.uses < i.max_uses",
    )
    .bind(&code)
    .fetch_optional(pool)
    .await?
    .ok_or(InvitationError::InvalidCode)?;

    let (group_id, group_name, politician_name, role, expires_at) = row;
    Ok(InvitationPreview { group_id, group_name, politician_name, role, expires_at })
}

/// Redeem `raw_code` for `user_id`, returning the new (or reactivated) membership.
/// A user already active in the code's group gets that membership back and
/// no use is consumed.
///
/// # Errors
///
/// Returns [`InvitationError::InvalidCode`] when the code cannot be claimed
/// and [`InvitationError::AlreadyMember`] when the user is active elsewhere.
pub async fn join_with_code(pool: &PgPool, user_id: Uuid, raw_code: &str) -> Result<MemberRow, InvitationError> {
    let code = normalize_invitation_code(raw_code).ok_or(InvitationError::InvalidCode)?;
    let mut tx = pool.begin().await?;

    // Already active in the code's group: hand back the membership without
    // spending a use.
    let existing: Option<Uuid> = sqlx::query_scalar(
        "SELECT m.group_id
         FROM members m
         JOIN team_invitations i ON i.group_id = m.group_id
         WHERE i.code = $1 AND m.user_id = $2 AND m.is_active",
    )
    .bind(&code)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;
    if let Some(group_id) = existing {
        let member = member::require_active_member(&mut *tx, group_id, user_id).await?;
        tracing::debug!(%group_id, %user_id, "join with code by existing member");
        return Ok(member);
    }

    let claimed = sqlx::query_as::<_, (Uuid, Uuid, String)>(
        "UPDATE team_invitations
         SET uses = uses + 1
         WHERE code = $1 AND revoked_at IS NULL AND expires_at > now() AND uses < max_uses
         RETURNING id, group_id, role",
    )
    .bind(&code)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((invitation_id, group_id, role)) = claimed else {
        tracing::warn!(%user_id, "invitation claim rejected");
        return Err(InvitationError::InvalidCode);
    };

    let active_elsewhere: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM members WHERE user_id = $1 AND is_active AND group_id <> $2)",
    )
    .bind(user_id)
    .bind(group_id)
    .fetch_one(&mut *tx)
    .await?;
    if active_elsewhere {
        return Err(InvitationError::AlreadyMember);
    }

    // Rejoining keeps an existing politician/manager role rather than
    // downgrading it to the invitation's role.
    sqlx::query(
        "INSERT INTO members (group_id, user_id, role) VALUES ($1, $2, $3)
         ON CONFLICT (group_id, user_id) DO UPDATE
         SET is_active = TRUE,
             role = CASE WHEN members.is_active THEN members.role ELSE EXCLUDED.role END",
    )
    .bind(group_id)
    .bind(user_id)
    .bind(&role)
    .execute(&mut *tx)
    .await
    .map_err(map_unique_violation)?;

    let member = member::require_active_member(&mut *tx, group_id, user_id).await?;
    tx.commit().await?;

    tracing::info!(%group_id, %user_id, %invitation_id, "joined group with invitation");
    Ok(member)
}

#[cfg(test)]
#[path = "invitation_test.rs"]
mod tests;
