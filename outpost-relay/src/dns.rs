//! DNS access for routing and record checks.
//!
//! [`MxLookup`] is the only seam the route resolver needs, so tests can supply
//! canned answers without touching the network.

use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::{
    TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider,
};
use tracing::debug;

use crate::error::DnsError;

/// One MX answer: preference and exchange host, in resolver order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub preference: u16,
    pub exchange: String,
}

impl MxRecord {
    #[must_use]
    pub fn new(preference: u16, exchange: impl Into<String>) -> Self {
        Self {
            preference,
            exchange: exchange.into(),
        }
    }
}

#[async_trait]
pub trait MxLookup: Send + Sync {
    /// Raw MX answers for `domain`. Any failure, including "no records", is an error.
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, DnsError>;
}

/// System resolver backed by hickory, with a per-query timeout.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    timeout: Duration,
}

impl DnsResolver {
    /// Reads the system resolver configuration.
    pub fn new(timeout: Duration) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver, timeout })
    }

    /// All TXT strings published at `name`, each record's chunks concatenated.
    pub async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.txt_lookup(name))
            .await
            .map_err(|_| DnsError::Timeout {
                domain: name.to_string(),
                after: self.timeout,
            })?
            .map_err(|err| DnsError::DomainResolutionFailed {
                domain: name.to_string(),
                reason: err.to_string(),
            })?;

        Ok(lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk))
                    .collect::<String>()
            })
            .collect())
    }
}

#[async_trait]
impl MxLookup for DnsResolver {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, DnsError> {
        debug!("Resolving MX records for {domain}");

        let lookup = tokio::time::timeout(self.timeout, self.resolver.mx_lookup(domain))
            .await
            .map_err(|_| DnsError::Timeout {
                domain: domain.to_string(),
                after: self.timeout,
            })?
            .map_err(|err| DnsError::DomainResolutionFailed {
                domain: domain.to_string(),
                reason: err.to_string(),
            })?;

        let records: Vec<MxRecord> = lookup
            .iter()
            .map(|mx| MxRecord::new(mx.preference(), mx.exchange().to_utf8()))
            .collect();

        if records.is_empty() {
            return Err(DnsError::DomainResolutionFailed {
                domain: domain.to_string(),
                reason: String::from("no MX records"),
            });
        }

        debug!("Resolved {} MX record(s) for {domain}", records.len());
        Ok(records)
    }
}
