use crate::config::Config;
use crate::error::GatewayError;
use crate::routing::{RouteRule, Topology};
use std::collections::HashSet;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a Redis URL
    pub fn validate_redis_url(url: &str) -> Result<(), GatewayError> {
        if url.is_empty() {
            return Err(GatewayError::Validation(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(GatewayError::Validation(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates rate limit parameters
    pub fn validate_rate_limit(requests: u64, window_secs: u64) -> Result<(), GatewayError> {
        if requests == 0 {
            return Err(GatewayError::Validation(
                "Rate limit must allow at least one request".to_string(),
            ));
        }

        if window_secs == 0 {
            return Err(GatewayError::Validation(
                "Rate limit window must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates the service table and route order
    pub fn validate_topology(topology: &Topology) -> Result<(), GatewayError> {
        let mut names = HashSet::new();
        for service in &topology.services {
            if service.name.is_empty() {
                return Err(GatewayError::Validation(
                    "Service name cannot be empty".to_string(),
                ));
            }
            if service.host.is_empty() || service.port.is_empty() {
                return Err(GatewayError::Validation(format!(
                    "Service '{}' needs a host and a port",
                    service.name
                )));
            }
            if service.port.parse::<u16>().is_err() {
                return Err(GatewayError::Validation(format!(
                    "Service '{}' has invalid port '{}'",
                    service.name, service.port
                )));
            }
            if !names.insert(service.name.as_str()) {
                return Err(GatewayError::Validation(format!(
                    "Service '{}' is declared twice",
                    service.name
                )));
            }
        }

        if topology.routes.is_empty() {
            return Err(GatewayError::Validation(
                "At least one route is required".to_string(),
            ));
        }

        for (index, rule) in topology.routes.iter().enumerate() {
            if !rule.prefix.is_empty() && !rule.prefix.starts_with('/') {
                return Err(GatewayError::Validation(format!(
                    "Route prefix '{}' must start with '/'",
                    rule.prefix
                )));
            }
            if let Some(earlier) = shadowing_rule(&topology.routes[..index], rule) {
                return Err(GatewayError::Validation(format!(
                    "Route '{}' is unreachable: '{}' is declared before it",
                    rule.prefix, earlier.prefix
                )));
            }
        }

        Ok(())
    }

    /// Validates everything the gateway needs before it starts serving
    pub fn validate(config: &Config, topology: &Topology) -> Result<(), GatewayError> {
        if config.rate_limit_enabled {
            Self::validate_redis_url(&config.redis_url)?;
            Self::validate_rate_limit(config.rate_limit_requests, config.rate_limit_window_secs)?;
            if config.rate_limit_store_timeout_ms == 0 {
                return Err(GatewayError::Validation(
                    "Rate limit store timeout must be greater than 0".to_string(),
                ));
            }
            config.failure_policy()?;
        }
        config.relay()?;
        Self::validate_topology(topology)
    }
}

/// An earlier rule whose prefix covers every path `rule` could match.
fn shadowing_rule<'a>(earlier: &'a [RouteRule], rule: &RouteRule) -> Option<&'a RouteRule> {
    earlier.iter().find(|candidate| candidate.matches(&rule.prefix))
}
