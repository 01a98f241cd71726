//! Path based service routing.
//!
//! Rules are evaluated in declared order and the first matching prefix
//! wins, so specific prefixes must be listed before the catch-all.

use crate::error::{GatewayError, Result};
use crate::registry::{default_services, PathPolicy, ServiceEntry, ServiceRegistry};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    pub service: String,
}

impl RouteRule {
    pub fn new(prefix: &str, service: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            service: service.to_string(),
        }
    }

    /// Matches `prefix` itself or anything below it on a segment boundary.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// First rule, in declared order, whose prefix covers `path`.
    pub fn matching(&self, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

pub fn default_routes() -> Vec<RouteRule> {
    vec![
        RouteRule::new("/api/docs", "docs"),
        RouteRule::new("/api/logger", "logger"),
        RouteRule::new("/api", "exercises"),
    ]
}

/// Services and routes, as loaded from a topology file or the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub services: Vec<ServiceEntry>,
    pub routes: Vec<RouteRule>,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            services: default_services(),
            routes: default_routes(),
        }
    }
}

impl Topology {
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut topology: Topology = serde_json::from_str(raw)
            .map_err(|e| GatewayError::Configuration(format!("invalid topology: {}", e)))?;
        topology.routes = topology
            .routes
            .iter()
            .map(|r| RouteRule::new(&r.prefix, &r.service))
            .collect();
        Ok(topology)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }
}

/// Where a request is going once routing has been decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub service: String,
    /// Absolute URL without the query string.
    pub url: String,
}

pub struct Dispatcher {
    registry: ServiceRegistry,
    routes: RouteTable,
}

impl Dispatcher {
    pub fn new(registry: ServiceRegistry, routes: RouteTable) -> Self {
        Self { registry, routes }
    }

    pub fn from_topology(topology: Topology) -> Self {
        Self::new(
            ServiceRegistry::new(topology.services),
            RouteTable::new(topology.routes),
        )
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Classify `path`, rewrite it for the owning service and build the target URL.
    pub fn resolve(&self, path: &str) -> Result<Target> {
        let rule = self
            .routes
            .matching(path)
            .ok_or_else(|| GatewayError::RouteNotFound {
                path: path.to_string(),
            })?;

        let service = self.registry.resolve(&rule.service).ok_or_else(|| {
            GatewayError::UnknownService {
                service: rule.service.clone(),
            }
        })?;

        let rewritten = rewrite_path(path, &rule.prefix, service.path_policy);
        Ok(Target {
            service: service.name.clone(),
            url: format!("{}{}", service.base_url(), rewritten),
        })
    }
}

fn rewrite_path(path: &str, prefix: &str, policy: PathPolicy) -> String {
    match policy {
        PathPolicy::Preserve => path.to_string(),
        PathPolicy::StripPrefix => match path.strip_prefix(prefix) {
            Some("") | None => "/".to_string(),
            Some(rest) => rest.to_string(),
        },
    }
}

/// Resolves the target before anything else touches the request.
///
/// Unroutable requests are answered with 404 here and never reach the
/// rate limiter or a backend.
pub async fn resolve_route(
    State(dispatcher): State<Arc<Dispatcher>>,
    mut request: Request,
    next: Next,
) -> Response {
    match dispatcher.resolve(request.uri().path()) {
        Ok(target) => {
            debug!(service = %target.service, target = %target.url, "Route resolved");
            request.extensions_mut().insert(target);
            next.run(request).await
        }
        Err(err) => {
            debug!(error = %err, "Route not resolved");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        Dispatcher::from_topology(Topology::default())
    }

    #[test]
    fn test_named_services_strip_prefix() {
        let d = dispatcher();
        let docs = d.resolve("/api/docs/x").unwrap();
        assert_eq!(docs.service, "docs");
        assert_eq!(docs.url, "http://docs:8082/x");

        let logger = d.resolve("/api/logger/y").unwrap();
        assert_eq!(logger.service, "logger");
        assert_eq!(logger.url, "http://logger:8083/y");
    }

    #[test]
    fn test_catch_all_preserves_full_path() {
        let d = dispatcher();
        let target = d.resolve("/api/exercises/12").unwrap();
        assert_eq!(target.service, "exercises");
        assert_eq!(target.url, "http://exercises-service:8081/api/exercises/12");

        let target = d.resolve("/api/programs").unwrap();
        assert_eq!(target.url, "http://exercises-service:8081/api/programs");
    }

    #[test]
    fn test_specific_prefix_wins_over_catch_all() {
        let d = dispatcher();
        assert_eq!(d.resolve("/api/docs/index.html").unwrap().service, "docs");
        assert_eq!(d.resolve("/api/docs").unwrap().url, "http://docs:8082/");
    }

    #[test]
    fn test_prefix_matches_on_segment_boundary() {
        let d = dispatcher();
        let target = d.resolve("/api/docsearch").unwrap();
        assert_eq!(target.service, "exercises");
        assert_eq!(target.url, "http://exercises-service:8081/api/docsearch");
    }

    #[test]
    fn test_declared_order_is_respected() {
        // Catch-all listed first swallows everything.
        let table = RouteTable::new(vec![
            RouteRule::new("/api", "exercises"),
            RouteRule::new("/api/docs", "docs"),
        ]);
        assert_eq!(table.matching("/api/docs/x").unwrap().service, "exercises");
    }

    #[test]
    fn test_path_outside_api_is_not_found() {
        let err = dispatcher().resolve("/health-check").unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound { .. }));
    }

    #[test]
    fn test_route_to_unregistered_service_is_not_found() {
        let d = Dispatcher::new(
            ServiceRegistry::new(default_services()),
            RouteTable::new(vec![RouteRule::new("/api/billing", "billing")]),
        );
        let err = d.resolve("/api/billing/invoices").unwrap_err();
        assert!(matches!(err, GatewayError::UnknownService { ref service } if service == "billing"));
    }

    #[test]
    fn test_topology_from_json() {
        let raw = r#"{
            "services": [
                {"name": "search", "host": "search", "port": "9000"},
                {"name": "catalog", "host": "catalog", "port": "9001", "path_policy": "preserve"}
            ],
            "routes": [
                {"prefix": "/api/search/", "service": "search"},
                {"prefix": "/api", "service": "catalog"}
            ]
        }"#;
        let topology = Topology::from_json(raw).unwrap();
        assert_eq!(topology.routes[0].prefix, "/api/search");

        let d = Dispatcher::from_topology(topology);
        assert_eq!(d.resolve("/api/search/q").unwrap().url, "http://search:9000/q");
        assert_eq!(d.resolve("/api/items").unwrap().url, "http://catalog:9001/api/items");
    }

    #[test]
    fn test_topology_rejects_malformed_json() {
        assert!(matches!(
            Topology::from_json("{\"services\": 3}"),
            Err(GatewayError::Configuration(_))
        ));
    }
}
