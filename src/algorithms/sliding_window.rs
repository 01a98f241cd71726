//! In-process sliding window log.
//!
//! Keeps the admission instants of each key and drops the ones that fell
//! out of the window before counting. Keys whose whole log has expired are
//! evicted at most once per window. Only consistent within one process.

use super::{RateDecision, WindowRule, WindowStore};
use crate::error::GatewayError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

#[derive(Default)]
struct Windows {
    logs: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

impl Windows {
    fn sweep(&mut self, now: Instant, window: Duration) {
        if matches!(self.last_sweep, Some(last) if now.duration_since(last) < window) {
            return;
        }
        self.logs.retain(|_, log| {
            log.back()
                .is_some_and(|&newest| now.duration_since(newest) < window)
        });
        self.last_sweep = Some(now);
    }
}

#[derive(Default)]
pub struct LocalSlidingWindow {
    windows: Mutex<Windows>,
}

impl LocalSlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|w| w.logs.len()).unwrap_or_default()
    }
}

#[async_trait]
impl WindowStore for LocalSlidingWindow {
    async fn take(&self, key: &str, rule: &WindowRule) -> Result<RateDecision, GatewayError> {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| GatewayError::Store("failed to acquire window lock".to_string()))?;

        windows.sweep(now, rule.window);
        let log = windows.logs.entry(key.to_string()).or_default();
        while let Some(&oldest) = log.front() {
            if now.duration_since(oldest) >= rule.window {
                log.pop_front();
            } else {
                break;
            }
        }

        let admitted = (log.len() as u64) < rule.limit;
        if admitted {
            log.push_back(now);
        }

        let remaining = rule.limit.saturating_sub(log.len() as u64);
        let reset_at = log.front().map(|&oldest| {
            let until_reset = (oldest + rule.window).saturating_duration_since(now);
            let at = SystemTime::now() + until_reset;
            let millis = at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            millis.div_ceil(1000)
        });

        Ok(RateDecision {
            limit: rule.limit,
            remaining,
            reset_at,
            admitted,
        })
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}
