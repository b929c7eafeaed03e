//! Timeouts and limits for both sides of the relay.
//!
//! Delivery timeouts are intentionally short: one black-holed recipient domain
//! must not keep the inbound session waiting on its final DATA reply.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds applied to each Domain Delivery Attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTimeouts {
    /// MX lookup for one destination domain.
    ///
    /// Default: 5 seconds
    #[serde(default = "defaults::dns_secs")]
    pub dns_secs: u64,

    /// Establishing the TCP connection to one target.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Each individual SMTP command/response exchange.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::command_secs")]
    pub command_secs: u64,

    /// The whole attempt for one domain, failover included.
    ///
    /// Default: 120 seconds
    #[serde(default = "defaults::submission_secs")]
    pub submission_secs: u64,

    /// Remote SMTP port. Only ever changed for local testing.
    ///
    /// Default: 25
    #[serde(default = "defaults::smtp_port")]
    pub smtp_port: u16,
}

impl DeliveryTimeouts {
    #[must_use]
    pub const fn dns(&self) -> Duration {
        Duration::from_secs(self.dns_secs)
    }

    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn submission(&self) -> Duration {
        Duration::from_secs(self.submission_secs)
    }
}

impl Default for DeliveryTimeouts {
    fn default() -> Self {
        Self {
            dns_secs: defaults::dns_secs(),
            connect_secs: defaults::connect_secs(),
            command_secs: defaults::command_secs(),
            submission_secs: defaults::submission_secs(),
            smtp_port: defaults::smtp_port(),
        }
    }
}

/// Inbound listener behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Name announced in the 220 greeting and EHLO reply.
    #[serde(default = "defaults::banner")]
    pub banner: String,

    /// Largest DATA payload accepted, advertised through the SIZE extension.
    ///
    /// Default: 25 MiB
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,

    /// Idle time allowed between client commands (RFC 5321 section 4.5.3.2).
    ///
    /// Default: 300 seconds
    #[serde(default = "defaults::server_command_secs")]
    pub command_timeout_secs: u64,
}

impl ServerSettings {
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            banner: defaults::banner(),
            max_message_size: defaults::max_message_size(),
            command_timeout_secs: defaults::server_command_secs(),
        }
    }
}

mod defaults {
    pub const fn dns_secs() -> u64 {
        5
    }

    pub const fn connect_secs() -> u64 {
        30
    }

    pub const fn command_secs() -> u64 {
        30
    }

    pub const fn submission_secs() -> u64 {
        120
    }

    pub const fn smtp_port() -> u16 {
        25
    }

    pub fn banner() -> String {
        String::from("outpost")
    }

    pub const fn max_message_size() -> usize {
        25 * 1024 * 1024
    }

    pub const fn server_command_secs() -> u64 {
        300
    }
}
