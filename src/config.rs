use crate::algorithms::WindowRule;
use crate::error::{GatewayError, Result};
use crate::proxy::RelayMode;
use crate::rate_limiter::FailurePolicy;
use crate::redis::DEFAULT_STORE_TIMEOUT;
use crate::routing::Topology;
use envconfig::Envconfig;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL of the shared counter store
    #[envconfig(from = "REDIS_URL", default = "redis://redis:6379")]
    pub redis_url: String,

    /// Operator switch for the rate limiter
    #[envconfig(from = "RATE_LIMIT_ENABLED", default = "true")]
    pub rate_limit_enabled: bool,

    /// Requests admitted per caller per window
    #[envconfig(from = "RATE_LIMIT_REQUESTS", default = "10")]
    pub rate_limit_requests: u64,

    /// Window length in seconds
    #[envconfig(from = "RATE_LIMIT_WINDOW_SECS", default = "60")]
    pub rate_limit_window_secs: u64,

    /// Upper bound on one store round trip, in milliseconds
    #[envconfig(from = "RATE_LIMIT_STORE_TIMEOUT_MS", default = "500")]
    pub rate_limit_store_timeout_ms: u64,

    /// Namespace for window keys in the store
    #[envconfig(from = "RATE_LIMIT_KEY_PREFIX", default = "gateway_limiter")]
    pub rate_limit_key_prefix: String,

    /// `open` admits requests when the store fails, `closed` rejects them
    #[envconfig(from = "RATE_LIMIT_FAILURE_POLICY", default = "open")]
    pub rate_limit_failure_policy: String,

    /// Optional JSON file describing services and routes
    #[envconfig(from = "SERVICES_FILE")]
    pub services_file: Option<String>,

    /// End-to-end backend timeout in seconds; 0 keeps the transport default
    #[envconfig(from = "UPSTREAM_TIMEOUT_SECS", default = "0")]
    pub upstream_timeout_secs: u64,

    /// `buffered` or `streaming` response relay
    #[envconfig(from = "RELAY_MODE", default = "buffered")]
    pub relay_mode: String,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// `json` or `pretty`
    #[envconfig(from = "LOG_FORMAT", default = "json")]
    pub log_format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn window_rule(&self) -> WindowRule {
        WindowRule {
            limit: self.rate_limit_requests,
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.rate_limit_store_timeout_ms)
    }

    pub fn failure_policy(&self) -> Result<FailurePolicy> {
        self.rate_limit_failure_policy.parse()
    }

    pub fn relay(&self) -> Result<RelayMode> {
        self.relay_mode.parse()
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        (self.upstream_timeout_secs > 0).then(|| Duration::from_secs(self.upstream_timeout_secs))
    }

    pub fn json_logs(&self) -> bool {
        !self.log_format.eq_ignore_ascii_case("pretty")
    }

    /// Services and routes from `SERVICES_FILE`, or the built-in table.
    pub fn topology(&self) -> Result<Topology> {
        match &self.services_file {
            Some(path) if !path.trim().is_empty() => Topology::from_file(Path::new(path)),
            _ => Ok(Topology::default()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            redis_url: "redis://redis:6379".to_string(),
            rate_limit_enabled: true,
            rate_limit_requests: 10,
            rate_limit_window_secs: 60,
            rate_limit_store_timeout_ms: DEFAULT_STORE_TIMEOUT.as_millis() as u64,
            rate_limit_key_prefix: "gateway_limiter".to_string(),
            rate_limit_failure_policy: "open".to_string(),
            services_file: None,
            upstream_timeout_secs: 0,
            relay_mode: "buffered".to_string(),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl From<envconfig::Error> for GatewayError {
    fn from(err: envconfig::Error) -> Self {
        GatewayError::Configuration(err.to_string())
    }
}
