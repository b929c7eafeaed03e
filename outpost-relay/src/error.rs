//! Error types for the relay engine.
//!
//! Only [`PolicyError`], [`ParseError`] and [`RelayError`] ever reach the
//! submitting client. [`DnsError`] is downgraded to the fallback route and
//! [`DeliveryError`] is folded into a per-domain outcome.

use std::{fmt, time::Duration};

use outpost_smtp::client::ClientError;
use thiserror::Error;

/// Rejections issued while the inbound conversation is still in progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Authentication credentials invalid")]
    AuthRejected,

    #[error("Sender domain '{0}' not allowed")]
    SenderDomainRejected(String),

    /// Only raised when malformed recipients are rejected up front.
    #[error("Recipient '{0}' has no usable domain")]
    RecipientRejected(String),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Message could not be parsed: {0}")]
    ParseFailed(#[from] mailparse::MailParseError),
}

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("MX lookup for '{domain}' failed: {reason}")]
    DomainResolutionFailed { domain: String, reason: String },

    #[error("MX lookup for '{domain}' timed out after {after:?}")]
    Timeout { domain: String, after: Duration },

    #[error("Unable to initialise the DNS resolver: {0}")]
    Init(#[from] hickory_resolver::ResolveError),
}

/// How far an outbound conversation got before it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Connect,
    Greeting,
    Ehlo,
    StartTls,
    MailFrom,
    RcptTo,
    Data,
    Message,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Greeting => "greeting",
            Self::Ehlo => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::Message => "message data",
        })
    }
}

/// One domain's delivery failure. Never propagated past the delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("{stage} timed out after {}s talking to {target}", .after.as_secs())]
    Timeout {
        target: String,
        stage: Stage,
        after: Duration,
    },

    #[error("{target} rejected {stage}: {code} {message}")]
    Smtp {
        target: String,
        stage: Stage,
        code: u16,
        message: String,
    },

    #[error("Connection to {target} failed during {stage}: {reason}")]
    Protocol {
        target: String,
        stage: Stage,
        reason: String,
    },

    #[error("TLS negotiation with {target} failed: {reason}")]
    Tls { target: String, reason: String },

    #[error("DKIM signing failed: {0}")]
    Signing(String),

    #[error("Message could not be composed: {0}")]
    Message(String),

    #[error("Delivery did not complete within {}s", .0.as_secs())]
    SubmissionTimeout(Duration),
}

impl DeliveryError {
    pub(crate) fn protocol(target: &str, stage: Stage, err: &ClientError) -> Self {
        match err {
            ClientError::Tls(reason) => Self::Tls {
                target: target.to_string(),
                reason: reason.clone(),
            },
            other => Self::Protocol {
                target: target.to_string(),
                stage,
                reason: other.to_string(),
            },
        }
    }

    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Connect { .. } => Some(Stage::Connect),
            Self::Tls { .. } => Some(Stage::StartTls),
            Self::Timeout { stage, .. } | Self::Smtp { stage, .. } | Self::Protocol { stage, .. } => {
                Some(*stage)
            }
            Self::Signing(_) | Self::Message(_) | Self::SubmissionTimeout(_) => None,
        }
    }

    /// Whether the next target may be tried. Only failures before the remote
    /// accepted MAIL FROM qualify; after that the transaction is underway.
    #[must_use]
    pub fn allows_failover(&self) -> bool {
        self.stage().is_some_and(|stage| stage < Stage::MailFrom)
    }
}

/// A failed domain and the reason, as reported back to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainFailure {
    pub domain: String,
    pub error: String,
}

impl fmt::Display for DomainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            write!(f, "<no domain> ({})", self.error)
        } else {
            write!(f, "{} ({})", self.domain, self.error)
        }
    }
}

fn join<T: fmt::Display>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}

/// Session-level aggregates surfaced as the final DATA reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error(
        "Partial delivery: {} succeeded, {} failed. Succeeded: {}. Failed: {}",
        .succeeded.len(),
        .failed.len(),
        .succeeded.join(", "),
        join(.failed, "; ")
    )]
    PartialDeliveryFailure {
        succeeded: Vec<String>,
        failed: Vec<DomainFailure>,
    },

    #[error("Delivery failed to all {} domains: {}", .failed.len(), join(.failed, "; "))]
    TotalDeliveryFailure { failed: Vec<DomainFailure> },
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn failure(domain: &str, error: &str) -> DomainFailure {
        DomainFailure {
            domain: domain.to_string(),
            error: error.to_string(),
        }
    }

    #[test]
    fn failover_only_before_mail_from() {
        let connect = DeliveryError::Connect {
            target: String::from("mx1.foo.com:25"),
            reason: String::from("refused"),
        };
        let greeting = DeliveryError::Smtp {
            target: String::from("mx1.foo.com:25"),
            stage: Stage::Greeting,
            code: 421,
            message: String::from("busy"),
        };
        let rcpt = DeliveryError::Smtp {
            target: String::from("mx1.foo.com:25"),
            stage: Stage::RcptTo,
            code: 550,
            message: String::from("no such user"),
        };

        assert!(connect.allows_failover());
        assert!(greeting.allows_failover());
        assert!(!rcpt.allows_failover());
        assert!(!DeliveryError::Signing(String::from("bad key")).allows_failover());
    }

    #[test]
    fn aggregate_messages() {
        let partial = RelayError::PartialDeliveryFailure {
            succeeded: vec![String::from("a.com"), String::from("b.com")],
            failed: vec![failure("c.com", "refused")],
        };
        assert_eq!(
            partial.to_string(),
            "Partial delivery: 2 succeeded, 1 failed. Succeeded: a.com, b.com. Failed: c.com (refused)"
        );

        let total = RelayError::TotalDeliveryFailure {
            failed: vec![failure("c.com", "refused"), failure("", "no route")],
        };
        assert_eq!(
            total.to_string(),
            "Delivery failed to all 2 domains: c.com (refused); <no domain> (no route)"
        );
    }
}
