//! Per-domain routing overrides
//!
//! Lets an operator pin a recipient domain to a fixed `host:port`, skipping MX
//! discovery entirely. Used for local testing and split-horizon setups.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Configuration for a specific recipient domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DomainConfig {
    /// Deliver to this `host:port` (or bare `host`) instead of the domain's MX records
    ///
    /// ```ron
    /// domains: {
    ///     "test.example.com": (
    ///         mx_override: "localhost:1025",
    ///     ),
    /// }
    /// ```
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mx_override: Option<String>,
}

impl DomainConfig {
    #[must_use]
    pub fn mx_override_address(&self) -> Option<&str> {
        self.mx_override.as_deref()
    }
}

/// Registry of per-domain configurations, keyed by lower-cased domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DomainConfigRegistry {
    domains: HashMap<String, DomainConfig>,
}

impl DomainConfigRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the configuration for `domain`, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, domain: &str) -> Option<&DomainConfig> {
        self.domains.get(domain).or_else(|| {
            self.domains
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(domain))
                .map(|(_, config)| config)
        })
    }

    /// Add or update configuration for a domain
    pub fn insert(&mut self, domain: impl Into<String>, config: DomainConfig) {
        self.domains.insert(domain.into().to_ascii_lowercase(), config);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut registry = DomainConfigRegistry::new();
        registry.insert(
            "Test.Example.com",
            DomainConfig {
                mx_override: Some("localhost:1025".to_string()),
            },
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry
                .get("test.example.com")
                .and_then(DomainConfig::mx_override_address),
            Some("localhost:1025")
        );
        assert!(registry.get("other.example.com").is_none());
    }

    #[test]
    fn deserialize_with_implicit_some() {
        let config_str = r#"{
            "test.example.com": (
                mx_override: "localhost:1025",
            ),
            "plain.example.com": (),
        }"#;

        let registry: DomainConfigRegistry = ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(config_str)
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get("test.example.com").unwrap().mx_override_address(),
            Some("localhost:1025")
        );
        assert!(registry.get("plain.example.com").unwrap().mx_override.is_none());
    }
}
