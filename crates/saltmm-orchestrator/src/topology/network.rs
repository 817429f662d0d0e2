//! Cluster network specification.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The single network every node of a cluster joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Network name (prefixed with the project name at deploy time).
    pub name: String,

    /// Network driver.
    pub driver: String,

    /// No external connectivity.
    pub internal: bool,

    /// Enable IPv6.
    pub enable_ipv6: bool,

    /// Network labels.
    pub labels: HashMap<String, String>,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            name: "saltnet".to_string(),
            driver: "bridge".to_string(),
            internal: false,
            enable_ipv6: false,
            labels: HashMap::new(),
        }
    }
}

impl NetworkSpec {
    /// Creates a network specification builder.
    pub fn builder(name: impl Into<String>) -> NetworkSpecBuilder {
        NetworkSpecBuilder {
            spec: NetworkSpec {
                name: name.into(),
                ..Default::default()
            },
        }
    }
}

/// Builder for `NetworkSpec`.
#[derive(Debug)]
pub struct NetworkSpecBuilder {
    spec: NetworkSpec,
}

impl NetworkSpecBuilder {
    /// Sets the driver.
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.spec.driver = driver.into();
        self
    }

    /// Makes the network internal.
    pub fn internal(mut self, internal: bool) -> Self {
        self.spec.internal = internal;
        self
    }

    /// Enables IPv6.
    pub fn enable_ipv6(mut self, enable: bool) -> Self {
        self.spec.enable_ipv6 = enable;
        self
    }

    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Builds the specification.
    pub fn build(self) -> NetworkSpec {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_builder() {
        let spec = NetworkSpec::builder("mmnet")
            .internal(true)
            .label("purpose", "failover")
            .build();

        assert_eq!(spec.name, "mmnet");
        assert_eq!(spec.driver, "bridge");
        assert!(spec.internal);
        assert_eq!(spec.labels.get("purpose").map(String::as_str), Some("failover"));
    }
}
