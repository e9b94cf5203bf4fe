//! Rate-limit governor: detects throttling signals from the fetcher,
//! suspends request issuance, and resumes on an exponential-then-capped
//! schedule.

use crate::backoff::ExponentialBackoff;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Coarse API health flag exposed across the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    Ok,
    RateLimited,
    Error,
}

#[derive(Debug)]
struct GovernorState {
    /// Consecutive throttling responses since the last success.
    strikes: u32,
    suspended_until: Option<Instant>,
}

/// Shared throttling state for all request issuance.
#[derive(Debug)]
pub struct RateLimitGovernor {
    policy: ExponentialBackoff,
    state: Mutex<GovernorState>,
    status_tx: watch::Sender<ApiStatus>,
}

impl RateLimitGovernor {
    pub fn new(policy: ExponentialBackoff) -> Self {
        let (status_tx, _) = watch::channel(ApiStatus::Ok);
        Self {
            policy,
            state: Mutex::new(GovernorState {
                strikes: 0,
                suspended_until: None,
            }),
            status_tx,
        }
    }

    pub fn status(&self) -> ApiStatus {
        *self.status_tx.borrow()
    }

    /// Watch status transitions (ok -> rate_limited -> ok, ...).
    pub fn watch(&self) -> watch::Receiver<ApiStatus> {
        self.status_tx.subscribe()
    }

    /// Wait until issuance is admitted. Returns immediately when the
    /// governor is not suspended.
    pub async fn admit(&self) {
        loop {
            let until = self.state.lock().suspended_until;
            match until {
                Some(until) if until > Instant::now() => {
                    tokio::time::sleep_until(until).await;
                }
                _ => return,
            }
        }
    }

    /// Record a throttling response: suspend issuance and grow the delay.
    /// Returns the suspension applied.
    pub fn on_throttled(&self) -> Duration {
        let mut state = self.state.lock();
        let delay = self.policy.delay(state.strikes);
        state.strikes = state.strikes.saturating_add(1);
        state.suspended_until = Some(Instant::now() + delay);
        drop(state);

        self.status_tx.send_replace(ApiStatus::RateLimited);
        warn!(?delay, "upstream throttling detected, suspending issuance");
        delay
    }

    /// A request succeeded: reset the schedule and clear the flag.
    pub fn on_success(&self) {
        let mut state = self.state.lock();
        let was_limited = state.strikes > 0;
        state.strikes = 0;
        state.suspended_until = None;
        drop(state);

        if self.status_tx.send_replace(ApiStatus::Ok) != ApiStatus::Ok && was_limited {
            debug!("rate limit cleared, resuming normal issuance");
        }
    }

    /// A request failed for a non-throttling reason after retries.
    pub fn on_failure(&self) {
        self.status_tx.send_replace(ApiStatus::Error);
    }
}
