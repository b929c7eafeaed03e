use std::{fmt, sync::Arc};

use outpost_common::{config::DomainConfigRegistry, internal};

use crate::dns::MxLookup;

/// One host to try for a destination domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub host: String,
    pub port: u16,
    /// MX preference; lower is tried first. Synthetic targets use 0.
    pub priority: u16,
}

impl DeliveryTarget {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, priority: u16) -> Self {
        Self {
            host: host.into(),
            port,
            priority,
        }
    }

    /// Parses an override of the form `host`, `host:port` or `[v6]:port`.
    #[must_use]
    pub fn from_override(value: &str, default_port: u16) -> Self {
        let value = value.trim();

        if let Some(rest) = value.strip_prefix('[')
            && let Some((host, tail)) = rest.split_once(']')
        {
            let port = tail
                .strip_prefix(':')
                .and_then(|port| port.parse().ok())
                .unwrap_or(default_port);
            return Self::new(host, port, 0);
        }

        match value.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                Self::new(host, port.parse().unwrap_or(default_port), 0)
            }
            _ => Self::new(value, default_port, 0),
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn address(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Turns a destination domain into an ordered list of delivery targets.
///
/// Never fails: when there is no usable MX answer the domain itself is used as
/// an implicit priority-0 exchanger.
#[derive(Clone)]
pub struct RouteResolver {
    lookup: Arc<dyn MxLookup>,
    domains: DomainConfigRegistry,
    port: u16,
}

impl RouteResolver {
    pub fn new(lookup: Arc<dyn MxLookup>, domains: DomainConfigRegistry, port: u16) -> Self {
        Self {
            lookup,
            domains,
            port,
        }
    }

    pub async fn resolve(&self, domain: &str) -> Vec<DeliveryTarget> {
        if let Some(target) = self
            .domains
            .get(domain)
            .and_then(|config| config.mx_override_address())
        {
            let target = DeliveryTarget::from_override(target, self.port);
            internal!(level = DEBUG, "Using configured route {target} for {domain}");
            return vec![target];
        }

        if domain.is_empty() {
            return vec![self.fallback(domain)];
        }

        match self.lookup.lookup_mx(domain).await {
            Ok(records) => {
                let mut targets: Vec<DeliveryTarget> = records
                    .into_iter()
                    .filter_map(|record| {
                        let host = record.exchange.trim_end_matches('.');
                        (!host.is_empty())
                            .then(|| DeliveryTarget::new(host, self.port, record.preference))
                    })
                    .collect();

                if targets.is_empty() {
                    tracing::warn!(domain, "Only null MX records found, using domain as host");
                    return vec![self.fallback(domain)];
                }

                // Stable: equal preferences keep resolver order.
                targets.sort_by_key(|target| target.priority);
                targets
            }
            Err(err) => {
                tracing::warn!(domain, error = %err, "MX resolution failed, using domain as host");
                vec![self.fallback(domain)]
            }
        }
    }

    fn fallback(&self, domain: &str) -> DeliveryTarget {
        DeliveryTarget::new(domain, self.port, 0)
    }
}
