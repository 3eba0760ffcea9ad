// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed-window rate limiter and submission timing guard.
//!
//! Both keep their state in a [`KvStore`]. The limiter fails open: when its
//! store is unbound or errors, it counts in a process-local
//! [`MemoryStore`] instead, and if that fails too the request is allowed.
//! The fallback is not shared between instances.

use crate::config::RateLimitConfig;
use crate::models::{rate_limit_key, timing_key, RateLimitCounter, TimingMarker};
use crate::store::{get_json, put_json, KvStore, MemoryStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed {
        /// Remaining requests in current window
        remaining: u32,
        /// Time until window resets
        reset_in: Duration,
    },
    /// Request is rate limited
    Limited {
        /// Time until the window ends
        retry_after: Duration,
    },
}

impl RateLimitResult {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Whole minutes to wait, rounded up; at least one when limited.
    pub fn wait_minutes(&self) -> Option<u64> {
        match self {
            Self::Allowed { .. } => None,
            Self::Limited { retry_after } => Some(retry_after.as_secs().div_ceil(60).max(1)),
        }
    }
}

/// Fixed-window rate limiter keyed by client IP.
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Option<Arc<dyn KvStore>>,
    fallback: Arc<MemoryStore>,
}

impl RateLimiter {
    /// Create a limiter over `store`; `None` counts in the local fallback only.
    pub fn new(config: RateLimitConfig, store: Option<Arc<dyn KvStore>>) -> Self {
        let fallback = Arc::new(MemoryStore::new(config.fallback_capacity));
        Self {
            config,
            store,
            fallback,
        }
    }

    /// The process-local fallback store.
    pub fn fallback(&self) -> &Arc<MemoryStore> {
        &self.fallback
    }

    /// Count a request from `ip` and decide whether it may proceed.
    pub async fn check(&self, ip: &str) -> RateLimitResult {
        self.check_at(ip, Utc::now()).await
    }

    /// Like [`check`](Self::check), with an explicit clock.
    pub async fn check_at(&self, ip: &str, now: DateTime<Utc>) -> RateLimitResult {
        if let Some(store) = &self.store {
            match self.check_in(store.as_ref(), ip, now).await {
                Ok(result) => return result,
                Err(err) => {
                    warn!(
                        %ip,
                        store = store.kind(),
                        error = %err,
                        "Rate limit store failed, using local fallback"
                    );
                }
            }
        }

        match self.check_in(self.fallback.as_ref(), ip, now).await {
            Ok(result) => result,
            Err(err) => {
                warn!(%ip, error = %err, "Local rate limit fallback failed, allowing request");
                RateLimitResult::Allowed {
                    remaining: self.config.max_submissions,
                    reset_in: self.config.window_duration(),
                }
            }
        }
    }

    async fn check_in(
        &self,
        store: &dyn KvStore,
        ip: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitResult, StoreError> {
        let key = rate_limit_key(ip);
        let window = self.config.window_secs as i64;
        let max = self.config.max_submissions;
        let now_secs = now.timestamp();

        let counter = match get_json::<RateLimitCounter>(store, &key).await? {
            Some(counter) if now_secs - counter.window_start < window => counter,
            // First request, or the previous window has elapsed
            _ => {
                let fresh = RateLimitCounter {
                    count: 1,
                    window_start: now_secs,
                };
                put_json(store, &key, &fresh, self.config.window_duration()).await?;
                return Ok(RateLimitResult::Allowed {
                    remaining: max.saturating_sub(1),
                    reset_in: self.config.window_duration(),
                });
            }
        };

        let remaining_secs = (counter.window_start + window - now_secs).max(1) as u64;
        let remaining_window = Duration::from_secs(remaining_secs);

        if counter.count >= max {
            debug!(%ip, count = counter.count, ?remaining_window, "IP rate limit exceeded");
            return Ok(RateLimitResult::Limited {
                retry_after: remaining_window,
            });
        }

        let updated = RateLimitCounter {
            count: counter.count + 1,
            window_start: counter.window_start,
        };
        put_json(store, &key, &updated, remaining_window).await?;

        Ok(RateLimitResult::Allowed {
            remaining: max.saturating_sub(updated.count),
            reset_in: remaining_window,
        })
    }
}

/// Flags submissions that follow the previous one from the same IP too
/// closely to come from a person.
pub struct TimingGuard {
    store: Arc<dyn KvStore>,
    min_interval: Duration,
    ttl: Duration,
}

impl TimingGuard {
    /// Create a guard over `store`.
    pub fn new(config: &RateLimitConfig, store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            min_interval: config.min_interval(),
            ttl: config.timing_ttl(),
        }
    }

    /// Returns true if `ip` submitted less than the minimum interval ago,
    /// and records this submission either way. Store failures never flag.
    pub async fn check_and_mark(&self, ip: &str) -> bool {
        self.check_and_mark_at(ip, Utc::now()).await
    }

    /// Like [`check_and_mark`](Self::check_and_mark), with an explicit clock.
    pub async fn check_and_mark_at(&self, ip: &str, now: DateTime<Utc>) -> bool {
        let key = timing_key(ip);
        let now_ms = now.timestamp_millis();

        let too_fast = match get_json::<TimingMarker>(self.store.as_ref(), &key).await {
            Ok(Some(marker)) => {
                let elapsed = now_ms - marker.last_submission;
                (0..self.min_interval.as_millis() as i64).contains(&elapsed)
            }
            Ok(None) => false,
            Err(err) => {
                warn!(%ip, error = %err, "Timing marker unavailable");
                false
            }
        };

        let marker = TimingMarker {
            last_submission: now_ms,
        };
        if let Err(err) = put_json(self.store.as_ref(), &key, &marker, self.ttl).await {
            warn!(%ip, error = %err, "Failed to store timing marker");
        }

        if too_fast {
            debug!(%ip, "Submission too fast");
        }
        too_fast
    }
}
