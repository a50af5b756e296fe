//! Sliding-window rate limiting keyed by caller identity.
//!
//! Each identity keeps the timestamps of its admitted requests inside the
//! window. Identities are spread over a sharded [`DashMap`], so one hot
//! caller never blocks the rest.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Admitted and recorded against the window.
    Allowed,
    /// Refused; not recorded.
    Limited {
        /// Time until the oldest admitted request leaves the window.
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Whether the request was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-identity sliding-window limiter.
///
/// A request at `now` is admitted iff fewer than `max_requests` admitted
/// requests fall in `(now - window, now]`.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests: usize::try_from(max_requests).unwrap_or(usize::MAX),
            window,
        }
    }

    /// Requests admitted per window.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check `identity` at `now`, recording the request if admitted.
    ///
    /// The read-modify-write happens under the identity's shard lock, so two
    /// concurrent requests can never both take the last slot.
    pub fn check(&self, identity: &str, now: Instant) -> RateDecision {
        let mut timestamps = self.windows.entry(identity.to_owned()).or_default();
        drain_expired(&mut timestamps, now, self.window);

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            return RateDecision::Allowed;
        }

        let retry_after = timestamps
            .front()
            .and_then(|oldest| oldest.checked_add(self.window))
            .map_or(self.window, |free_at| free_at.saturating_duration_since(now));
        RateDecision::Limited { retry_after }
    }

    /// Boolean form of [`check`](Self::check).
    pub fn admit(&self, identity: &str, now: Instant) -> bool {
        self.check(identity, now).is_allowed()
    }

    /// Drop identities with no admitted request inside the window.
    ///
    /// Returns the number of identities reclaimed.
    pub fn purge_idle(&self, now: Instant) -> usize {
        let mut purged = 0usize;
        self.windows.retain(|_, timestamps| {
            drain_expired(timestamps, now, self.window);
            let active = !timestamps.is_empty();
            if !active {
                purged = purged.saturating_add(1);
            }
            active
        });
        purged
    }

    /// Identities currently holding window state.
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

/// Pop timestamps at or before `now - window`.
fn drain_expired(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while timestamps.front().is_some_and(|t| *t <= cutoff) {
        timestamps.pop_front();
    }
}
