//! In-memory rate limiting for access-code requests.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `HashMap<String, VecDeque<Instant>>`
//! keyed by normalized email. Two limits are enforced, configurable through
//! `AppConfig` with these defaults:
//! - Per-email: 3 code requests per 10 minutes
//! - Global: 60 code requests per minute
//!
//! TRADE-OFFS
//! ==========
//! State is per-process. Running several replicas multiplies the effective
//! limit; that is acceptable because codes are also bounded by expiry and
//! the failed-attempt counter in the database.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_PER_EMAIL_LIMIT: usize = 3;
pub const DEFAULT_PER_EMAIL_WINDOW_SECS: u64 = 600;

pub const DEFAULT_GLOBAL_LIMIT: usize = 60;
pub const DEFAULT_GLOBAL_WINDOW_SECS: u64 = 60;

/// Limits parsed by `AppConfig`; `Default` gives the built-in values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_email_limit: usize,
    pub per_email_window: Duration,
    pub global_limit: usize,
    pub global_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_email_limit: DEFAULT_PER_EMAIL_LIMIT,
            per_email_window: Duration::from_secs(DEFAULT_PER_EMAIL_WINDOW_SECS),
            global_limit: DEFAULT_GLOBAL_LIMIT,
            global_window: Duration::from_secs(DEFAULT_GLOBAL_WINDOW_SECS),
        }
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum RateLimitError {
    #[error("too many code requests for this email (max {limit}/{window_secs}s)")]
    PerEmailExceeded { limit: usize, window_secs: u64 },
    #[error("too many code requests (max {limit}/{window_secs}s)")]
    GlobalExceeded { limit: usize, window_secs: u64 },
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    inner: std::sync::Arc<Mutex<RateLimiterInner>>,
    config: RateLimitConfig,
}

#[derive(Default)]
struct RateLimiterInner {
    email_requests: HashMap<String, VecDeque<Instant>>,
    global_requests: VecDeque<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self { inner: std::sync::Arc::new(Mutex::new(RateLimiterInner::default())), config }
    }

    /// Check per-email and global limits, then record the request.
    ///
    /// # Errors
    ///
    /// Returns the first limit that would be exceeded. Nothing is recorded
    /// for a rejected request.
    pub fn check_and_record(&self, email: &str) -> Result<(), RateLimitError> {
        self.check_and_record_at(email, Instant::now())
    }

    fn check_and_record_at(&self, email: &str, now: Instant) -> Result<(), RateLimitError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let cfg = self.config;

        prune_window(&mut inner.global_requests, now, cfg.global_window);
        if inner.global_requests.len() >= cfg.global_limit {
            return Err(RateLimitError::GlobalExceeded {
                limit: cfg.global_limit,
                window_secs: cfg.global_window.as_secs(),
            });
        }

        let email_deque = inner.email_requests.entry(email.to_owned()).or_default();
        prune_window(email_deque, now, cfg.per_email_window);
        if email_deque.len() >= cfg.per_email_limit {
            return Err(RateLimitError::PerEmailExceeded {
                limit: cfg.per_email_limit,
                window_secs: cfg.per_email_window.as_secs(),
            });
        }

        email_deque.push_back(now);
        inner.global_requests.push_back(now);

        Ok(())
    }

    /// Drop per-email entries whose windows have fully elapsed.
    pub fn prune_idle(&self) {
        self.prune_idle_at(Instant::now());
    }

    fn prune_idle_at(&self, now: Instant) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = self.config.per_email_window;
        inner.email_requests.retain(|_, deque| {
            prune_window(deque, now, window);
            !deque.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_emails(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .email_requests
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.duration_since(front) > window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
