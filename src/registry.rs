//! Static table of the backend services the gateway fronts.
//!
//! Built once at startup and shared read-only by every request handler.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the matched route prefix is treated when forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathPolicy {
    /// Remove the matched prefix; the backend sees a bare path.
    #[default]
    StripPrefix,
    /// Forward the original path unchanged.
    Preserve,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub host: String,
    pub port: String,
    #[serde(default)]
    pub path_policy: PathPolicy,
}

impl ServiceEntry {
    pub fn new(name: &str, host: &str, port: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port: port.to_string(),
            path_policy: PathPolicy::default(),
        }
    }

    pub fn preserving_path(mut self) -> Self {
        self.path_policy = PathPolicy::Preserve;
        self
    }

    /// Base URL of the service, without a path.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceEntry>,
}

impl ServiceRegistry {
    pub fn new(entries: impl IntoIterator<Item = ServiceEntry>) -> Self {
        let services = entries
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();
        Self { services }
    }

    /// Look up a service by its logical name.
    pub fn resolve(&self, name: &str) -> Option<&ServiceEntry> {
        self.services.get(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

/// Services fronted by a default deployment.
pub fn default_services() -> Vec<ServiceEntry> {
    vec![
        ServiceEntry::new("exercises", "exercises-service", "8081").preserving_path(),
        ServiceEntry::new("docs", "docs", "8082"),
        ServiceEntry::new("logger", "logger", "8083"),
    ]
}
