use crate::algorithms::{RateDecision, WindowRule, WindowStore};
use crate::error::{GatewayError, Result};
use crate::middleware::remote_addr;
use axum::extract::{Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// What to do with a request when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Admit the request without rate limit headers.
    #[default]
    Open,
    /// Reject the request with 503.
    Closed,
}

impl FromStr for FailurePolicy {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(FailurePolicy::Open),
            "closed" => Ok(FailurePolicy::Closed),
            other => Err(GatewayError::Configuration(format!(
                "unknown failure policy '{}', expected 'open' or 'closed'",
                other
            ))),
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    rule: WindowRule,
    policy: FailurePolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, rule: WindowRule, policy: FailurePolicy) -> Self {
        Self {
            store,
            rule,
            policy,
        }
    }

    pub fn rule(&self) -> WindowRule {
        self.rule
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Consume one slot for `key`.
    pub async fn check(&self, key: &str) -> Result<RateDecision> {
        self.store.take(key, &self.rule).await
    }

    pub async fn is_store_available(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}

/// Caller identity: the remote address without its port, or the raw
/// address when it does not parse.
pub fn client_key(remote: &str) -> String {
    match remote.parse::<SocketAddr>() {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => remote.to_string(),
    }
}

/// Admission control middleware.
///
/// Only installed when a limiter was successfully built at startup.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&remote_addr(&request));

    let decision = match limiter.check(&key).await {
        Ok(decision) => decision,
        Err(err) => match limiter.policy() {
            FailurePolicy::Open => {
                warn!(key = %key, error = %err, "Rate limit store unavailable, admitting request");
                return next.run(request).await;
            }
            FailurePolicy::Closed => {
                warn!(key = %key, error = %err, "Rate limit store unavailable, rejecting request");
                return err.into_response();
            }
        },
    };

    if !decision.admitted {
        debug!(key = %key, limit = decision.limit, "Rate limit exceeded");
        let mut response = GatewayError::QuotaExceeded.into_response();
        decision.apply_headers(response.headers_mut());
        if let Some(seconds) = decision.reset_at.map(seconds_until) {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        return response;
    }

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());
    response
}

fn seconds_until(epoch_secs: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    epoch_secs.saturating_sub(now).max(1)
}
