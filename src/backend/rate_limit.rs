use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::BackendError;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Cloud request ceilings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,

    /// Longest a caller may wait for a free slot
    pub max_wait_ms: u64,

    /// Callers allowed to wait at the same time; further callers fail fast
    pub max_queue_depth: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // Gemini free tier
        RateLimitConfig {
            requests_per_minute: 15,
            requests_per_day: 1500,
            max_wait_ms: 30_000,
            max_queue_depth: 4,
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    config: RateLimitConfig,

    /// Instants of calls admitted during the last minute
    recent: VecDeque<Instant>,
    day_started: Instant,
    daily_count: u32,
    waiting: usize,
}

/// Sliding-window limiter for cloud calls.
///
/// One limiter lives for the whole session; backends rebuilt on reconfigure
/// share it so the call log survives the swap. The lock is only held while
/// inspecting the call log, never across a sleep.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

/// Releases a queue slot when the waiting caller finishes or is cancelled
struct QueueSlot<'a> {
    limiter: &'a RateLimiter,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.limiter.lock();
        state.waiting = state.waiting.saturating_sub(1);
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        RateLimiter {
            state: Mutex::new(LimiterState {
                config,
                recent: VecDeque::new(),
                day_started: Instant::now(),
                daily_count: 0,
                waiting: 0,
            }),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.lock().config.clone()
    }

    /// Change the ceilings without forgetting calls already admitted
    pub fn update_config(&self, config: RateLimitConfig) {
        let mut state = self.lock();
        if state.config != config {
            debug!(
                requests_per_minute = config.requests_per_minute,
                requests_per_day = config.requests_per_day,
                "Updating rate limits"
            );
            state.config = config;
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for a call slot, or fail with `RateLimited` when the wait would be
    /// too long, too many callers are already waiting, or the daily ceiling is hit.
    pub async fn acquire(&self) -> Result<(), BackendError> {
        // Total wait across every retry of the loop stays within max_wait
        let max_wait = Duration::from_millis(self.lock().config.max_wait_ms);
        let deadline = Instant::now().checked_add(max_wait);
        let mut slot: Option<QueueSlot<'_>> = None;

        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();
                let config = state.config.clone();

                if now.duration_since(state.day_started) >= DAY {
                    state.day_started = now;
                    state.daily_count = 0;
                }
                while state
                    .recent
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= MINUTE)
                {
                    state.recent.pop_front();
                }

                if state.daily_count >= config.requests_per_day {
                    let reset_in = DAY.saturating_sub(now.duration_since(state.day_started));
                    warn!(limit = config.requests_per_day, "Daily request ceiling reached");
                    return Err(BackendError::RateLimited {
                        message: format!(
                            "daily ceiling of {} requests reached",
                            config.requests_per_day
                        ),
                        retry_after: Some(reset_in),
                    });
                }

                if (state.recent.len() as u32) < config.requests_per_minute {
                    state.recent.push_back(now);
                    state.daily_count += 1;
                    return Ok(());
                }

                let oldest = state.recent.front().copied().unwrap_or(now);
                let wait = MINUTE.saturating_sub(now.duration_since(oldest));
                if deadline.is_some_and(|deadline| now + wait > deadline) {
                    return Err(BackendError::RateLimited {
                        message: format!(
                            "{} requests per minute exceeded",
                            config.requests_per_minute
                        ),
                        retry_after: Some(wait),
                    });
                }

                if slot.is_none() {
                    if state.waiting >= config.max_queue_depth {
                        return Err(BackendError::RateLimited {
                            message: format!(
                                "{} callers already waiting for the rate limiter",
                                state.waiting
                            ),
                            retry_after: Some(wait),
                        });
                    }
                    state.waiting += 1;
                    drop(state);
                    slot = Some(QueueSlot { limiter: self });
                }
                wait
            };

            debug!(wait_ms = wait.as_millis() as u64, "Rate limited, waiting for a slot");
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls admitted in the current minute
    pub fn in_flight_window(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .recent
            .iter()
            .filter(|t| now.duration_since(**t) < MINUTE)
            .count()
    }
}
