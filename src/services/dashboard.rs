//! Group dashboard: case counts and recent activity.

use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::services::case::CaseStatus;
use crate::services::member::{self, MemberError};

const TOP_N: i64 = 10;
const RECENT_N: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error(transparent)]
    Access(#[from] MemberError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RecentCase {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub priority: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupStats {
    pub total_cases: i64,
    /// Every status, including zero counts, in workflow order.
    pub by_status: Vec<LabelCount>,
    pub by_category: Vec<LabelCount>,
    pub by_district: Vec<LabelCount>,
    pub open_assigned_to_me: i64,
    pub recent: Vec<RecentCase>,
}

/// Fill missing statuses with zero and order them by workflow.
pub(crate) fn complete_status_counts(raw: Vec<LabelCount>) -> Vec<LabelCount> {
    CaseStatus::ALL
        .iter()
        .map(|status| LabelCount {
            label: (*status).to_owned(),
            count: raw.iter().find(|c| c.label == *status).map_or(0, |c| c.count),
        })
        .collect()
}

/// Dashboard numbers for one group, as seen by `viewer_id`.
///
/// # Errors
///
/// Returns [`DashboardError::Access`] if the viewer is not an active member.
pub async fn group_stats(pool: &PgPool, group_id: Uuid, viewer_id: Uuid) -> Result<GroupStats, DashboardError> {
    let viewer = member::require_active_member(pool, group_id, viewer_id).await?;

    let by_status = sqlx::query_as::<_, LabelCount>(
        "SELECT status AS label, COUNT(*) AS count FROM cases WHERE group_id = $1 GROUP BY status",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    let total_cases = by_status.iter().map(|c| c.count).sum();

    let by_category = sqlx::query_as::<_, LabelCount>(
        "SELECT cat.name AS label, COUNT(*) AS count
         FROM cases c
         JOIN category_cases cc ON cc.case_id = c.id
         JOIN categories cat ON cat.id = cc.category_id
         WHERE c.group_id = $1
         GROUP BY cat.name
         ORDER BY count DESC, label
         LIMIT $2",
    )
    .bind(group_id)
    .bind(TOP_N)
    .fetch_all(pool)
    .await?;

    let by_district = sqlx::query_as::<_, LabelCount>(
        "SELECT d.name AS label, COUNT(*) AS count
         FROM cases c
         JOIN district_cases dc ON dc.case_id = c.id
         JOIN districts d ON d.id = dc.district_id
         WHERE c.group_id = $1
         GROUP BY d.name
         ORDER BY count DESC, label
         LIMIT $2",
    )
    .bind(group_id)
    .bind(TOP_N)
    .fetch_all(pool)
    .await?;

    let open_assigned_to_me: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM cases c
         JOIN in_charge_cases ic ON ic.case_id = c.id
         WHERE c.group_id = $1 AND ic.member_id = $2 AND c.status IN ('pending', 'processing')",
    )
    .bind(group_id)
    .bind(viewer.id)
    .fetch_one(pool)
    .await?;

    let recent = sqlx::query_as::<_, RecentCase>(
        "SELECT id, title, status, priority, received_at FROM cases
         WHERE group_id = $1
         ORDER BY received_at DESC, id DESC
         LIMIT $2",
    )
    .bind(group_id)
    .bind(RECENT_N)
    .fetch_all(pool)
    .await?;

    Ok(GroupStats {
        total_cases,
        by_status: complete_status_counts(by_status),
        by_category,
        by_district,
        open_assigned_to_me,
        recent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(label: &str, count: i64) -> LabelCount {
        LabelCount { label: label.into(), count }
    }

    #[test]
    fn status_counts_fill_zeroes_in_workflow_order() {
        let filled = complete_status_counts(vec![count("closed", 4), count("pending", 2)]);
        assert_eq!(
            filled,
            vec![count("pending", 2), count("processing", 0), count("completed", 0), count("closed", 4)]
        );
    }

    #[test]
    fn status_counts_ignore_unknown_labels() {
        let filled = complete_status_counts(vec![count("archived", 9)]);
        assert!(filled.iter().all(|c| c.count == 0));
        assert_eq!(filled.len(), CaseStatus::ALL.len());
    }

    #[tokio::test]
    async fn stats_require_membership() {
        let state = crate::state::test_helpers::test_app_state();
        let err = group_stats(&state.pool, Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DashboardError::Access(_)));
    }
}
