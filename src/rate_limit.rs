//! Per-model rolling-window request throttle.
//!
//! Each model keeps the start times of its recent requests. A request is
//! admitted when fewer than `max_requests` started within the last window;
//! otherwise the caller sleeps until the oldest one ages out and tries
//! again. Requests are delayed, never rejected.
//!
//! The limiter is in-process. Several processes summarizing against the same
//! model each enforce their own window.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    history: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Wait for a slot for `model`. Returns how long the caller waited.
    pub async fn acquire(&self, model: &str) -> Duration {
        let started = Instant::now();
        loop {
            let wait = self.try_admit(model, Instant::now());
            match wait {
                None => return started.elapsed(),
                Some(delay) => {
                    debug!(
                        model,
                        delay_ms = delay.as_millis() as u64,
                        "rate limit window full, waiting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Admit now (returns None) or report how long until a slot frees up.
    fn try_admit(&self, model: &str, now: Instant) -> Option<Duration> {
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let starts = history.entry(model.to_string()).or_default();

        while let Some(&oldest) = starts.front() {
            if now.duration_since(oldest) >= self.window {
                starts.pop_front();
            } else {
                break;
            }
        }

        if starts.len() < self.max_requests {
            starts.push_back(now);
            return None;
        }

        let oldest = starts.front().copied().unwrap_or(now);
        Some((oldest + self.window).saturating_duration_since(now).max(Duration::from_millis(1)))
    }

    /// Requests admitted for `model` within the current window.
    pub fn in_window(&self, model: &str) -> usize {
        let now = Instant::now();
        let history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        history
            .get(model)
            .map(|starts| {
                starts
                    .iter()
                    .filter(|&&t| now.duration_since(t) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }
}
