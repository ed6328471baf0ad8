//! Sweeper: periodic cleanup of expired auth and invitation rows.
//!
//! DESIGN
//! ======
//! A background task wakes every `interval`, deletes rows that can no longer
//! be used, and prunes idle rate-limiter buckets. Failures are logged and the
//! next tick retries; nothing on the request path depends on the sweep.

use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::rate_limit::RateLimiter;

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub access_codes: u64,
    pub invitations: u64,
}

impl SweepReport {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.sessions + self.access_codes + self.invitations
    }
}

/// Spawn the background sweeper. Returns a handle for shutdown.
pub fn spawn_sweeper(pool: PgPool, rate_limiter: RateLimiter, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            rate_limiter.prune_idle();
            match sweep_once(&pool).await {
                Ok(report) if report.total() > 0 => {
                    debug!(
                        sessions = report.sessions,
                        access_codes = report.access_codes,
                        invitations = report.invitations,
                        "sweep removed expired rows"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "sweep failed"),
            }
        }
    })
}

/// Delete expired sessions, spent access codes older than a day, and
/// invitations expired for more than a week.
///
/// # Errors
///
/// Returns the first database error; earlier deletes stay committed.
pub async fn sweep_once(pool: &PgPool) -> Result<SweepReport, sqlx::Error> {
    let sessions = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
        .execute(pool)
        .await?
        .rows_affected();

    let access_codes = sqlx::query(
        "DELETE FROM access_codes
         WHERE expires_at <= now() - INTERVAL '1 day'
            OR consumed_at <= now() - INTERVAL '1 day'",
    )
    .execute(pool)
    .await?
    .rows_affected();

    let invitations = sqlx::query("DELETE FROM team_invitations WHERE expires_at <= now() - INTERVAL '7 days'")
        .execute(pool)
        .await?
        .rows_affected();

    Ok(SweepReport { sessions, access_codes, invitations })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_total_sums_tables() {
        let report = SweepReport { sessions: 2, access_codes: 3, invitations: 1 };
        assert_eq!(report.total(), 6);
        assert_eq!(SweepReport::default().total(), 0);
    }

    #[tokio::test]
    async fn sweep_surfaces_database_errors() {
        let state = crate::state::test_helpers::test_app_state();
        assert!(sweep_once(&state.pool).await.is_err());
    }
}
