//! Dual-window limiter for calls to the text-recognition service.
//!
//! Providers publish both a burst cap (per second) and a sustained cap (per
//! minute); each is tracked with its own sliding window of admission times.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_PER_SECOND: u32 = 10;
pub const DEFAULT_MAX_PER_MINUTE: u32 = 1800;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limit wait cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RateLimitStats {
    pub requests_last_second: usize,
    pub requests_last_minute: usize,
    pub limit_per_second: u32,
    pub limit_per_minute: u32,
    /// Occupancy of the 1s window as a whole percentage of its limit.
    pub capacity_second_pct: u32,
    pub capacity_minute_pct: u32,
}

struct Windows {
    second: VecDeque<Instant>,
    minute: VecDeque<Instant>,
}

impl Windows {
    fn prune(&mut self, now: Instant) {
        prune_window(&mut self.second, now, SECOND);
        prune_window(&mut self.minute, now, MINUTE);
    }
}

fn prune_window(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(front) = window.front() {
        if now.saturating_duration_since(*front) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}

pub struct RateLimiter {
    max_per_second: u32,
    max_per_minute: u32,
    windows: Mutex<Windows>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_SECOND, DEFAULT_MAX_PER_MINUTE)
    }
}

impl RateLimiter {
    /// A limit of zero selects the default for that window.
    pub fn new(max_per_second: u32, max_per_minute: u32) -> Self {
        let max_per_second = if max_per_second == 0 { DEFAULT_MAX_PER_SECOND } else { max_per_second };
        let max_per_minute = if max_per_minute == 0 { DEFAULT_MAX_PER_MINUTE } else { max_per_minute };
        Self {
            max_per_second,
            max_per_minute,
            windows: Mutex::new(Windows {
                second: VecDeque::new(),
                minute: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Windows> {
        self.windows.lock().unwrap_or_else(|p| {
            tracing::warn!("Rate limiter mutex poisoned, recovering");
            p.into_inner()
        })
    }

    /// Wait until both windows have room, then record the call.
    ///
    /// The lock is held only to prune, check and append; waiting happens with
    /// the lock released. A cancelled wait records nothing.
    pub async fn admit(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled);
            }

            let wait_until = {
                let mut w = self.lock();
                let now = Instant::now();
                w.prune(now);
                if w.second.len() >= self.max_per_second as usize {
                    w.second.front().map(|t| *t + SECOND)
                } else if w.minute.len() >= self.max_per_minute as usize {
                    w.minute.front().map(|t| *t + MINUTE)
                } else {
                    w.second.push_back(now);
                    w.minute.push_back(now);
                    None
                }
            };

            let Some(deadline) = wait_until else {
                return Ok(());
            };

            tracing::debug!(
                wait_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Recognition rate limit reached, waiting"
            );
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
            }
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        let mut w = self.lock();
        w.prune(Instant::now());
        let second = w.second.len();
        let minute = w.minute.len();
        RateLimitStats {
            requests_last_second: second,
            requests_last_minute: minute,
            limit_per_second: self.max_per_second,
            limit_per_minute: self.max_per_minute,
            capacity_second_pct: (second as u64 * 100 / self.max_per_second as u64) as u32,
            capacity_minute_pct: (minute as u64 * 100 / self.max_per_minute as u64) as u32,
        }
    }
}
