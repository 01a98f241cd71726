//! Sliding window counter stores.
//!
//! A store performs one atomic "consume a slot for key K" operation and
//! reports the resulting quota state. The Redis store is shared by every
//! gateway replica; the local store serves single-process deployments and
//! tests.

pub mod sliding_window;

use crate::error::GatewayError;
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use std::time::Duration;

pub use sliding_window::LocalSlidingWindow;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Quota applied to every caller key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRule {
    pub limit: u64,
    pub window: Duration,
}

impl Default for WindowRule {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

/// Outcome of one consume operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub limit: u64,
    /// Slots left after this request, never below zero.
    pub remaining: u64,
    /// Epoch seconds at which the oldest counted request leaves the window.
    pub reset_at: Option<u64>,
    pub admitted: bool,
}

impl RateDecision {
    /// Expose the quota state to the caller.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(LIMIT_HEADER, HeaderValue::from(self.limit));
        headers.insert(REMAINING_HEADER, HeaderValue::from(self.remaining));
        if let Some(reset_at) = self.reset_at {
            headers.insert(RESET_HEADER, HeaderValue::from(reset_at));
        }
    }
}

#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Atomically count one request for `key` if the window has room.
    async fn take(&self, key: &str, rule: &WindowRule) -> Result<RateDecision, GatewayError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), GatewayError>;
}
