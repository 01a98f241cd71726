use crate::rate_limiter::RateLimiter;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub rate_limiter: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct HealthChecker {
    rate_limiter: Option<Arc<RateLimiter>>,
    /// Whether the operator asked for rate limiting.
    rate_limit_enabled: bool,
    started: Instant,
}

impl HealthChecker {
    pub fn new(rate_limiter: Option<Arc<RateLimiter>>, rate_limit_enabled: bool) -> Self {
        Self {
            rate_limiter,
            rate_limit_enabled,
            started: Instant::now(),
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let limiter_status = self.check_rate_limiter().await;

        // Degraded, not unhealthy: requests still flow without rate limiting.
        let overall_status = match limiter_status.status.as_str() {
            "healthy" | "disabled" => "healthy",
            _ => "degraded",
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started.elapsed().as_secs(),
            dependencies: DependencyStatus {
                rate_limiter: limiter_status,
            },
        }
    }

    async fn check_rate_limiter(&self) -> ServiceStatus {
        let start = Instant::now();

        let Some(limiter) = &self.rate_limiter else {
            if !self.rate_limit_enabled {
                return ServiceStatus {
                    status: "disabled".to_string(),
                    response_time_ms: 0,
                    error: None,
                };
            }
            return ServiceStatus {
                status: "unavailable".to_string(),
                response_time_ms: 0,
                error: Some("Counter store was unreachable at startup".to_string()),
            };
        };

        if limiter.is_store_available().await {
            ServiceStatus {
                status: "healthy".to_string(),
                response_time_ms: start.elapsed().as_millis() as u64,
                error: None,
            }
        } else {
            ServiceStatus {
                status: "unavailable".to_string(),
                response_time_ms: start.elapsed().as_millis() as u64,
                error: Some("Counter store not reachable".to_string()),
            }
        }
    }
}

/// Health check endpoint
pub async fn health_check(State(checker): State<HealthChecker>) -> Json<HealthStatus> {
    Json(checker.check_health().await)
}
