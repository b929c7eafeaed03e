//! Relay Orchestrator: one accepted message in, one aggregated outcome out.
//!
//! The message moves through `Received → Parsed → Grouped → Delivering →
//! Completed`. Envelope sender and recipients always come from the inbound
//! session; the parsed headers never decide where mail goes.

use std::{fmt, sync::Arc};

use futures_util::future::join_all;
use outpost_common::{config::RelayConfig, internal};
use outpost_tracing::traced;

use crate::{
    address::grouping_key,
    delivery::{DomainDelivery, DomainOutcome},
    dkim::SignerFactory,
    dns::MxLookup,
    error::{DeliveryError, DomainFailure, ParseError, RelayError},
    group::RecipientGroups,
    message::ParsedMessage,
    route::RouteResolver,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Received,
    Parsed,
    Grouped,
    Delivering,
    Completed,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Received => "received",
            Self::Parsed => "parsed",
            Self::Grouped => "grouped",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
        })
    }
}

/// Terminal value of one orchestrator run. The two domain sets are disjoint and
/// together cover every recipient group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionResult {
    pub successes: Vec<String>,
    pub failures: Vec<DomainFailure>,
}

impl SessionResult {
    fn from_outcomes(outcomes: Vec<DomainOutcome>) -> Self {
        let mut result = Self::default();

        for outcome in outcomes {
            match outcome.failure() {
                Some(failure) => result.failures.push(failure),
                None => result.successes.push(outcome.domain),
            }
        }

        result
    }

    /// `Ok(domains delivered)` when nothing failed; otherwise the aggregate
    /// error for the final DATA reply.
    pub fn verdict(&self) -> Result<usize, RelayError> {
        match (self.successes.is_empty(), self.failures.is_empty()) {
            (_, true) => Ok(self.successes.len()),
            (true, false) => Err(RelayError::TotalDeliveryFailure {
                failed: self.failures.clone(),
            }),
            (false, false) => Err(RelayError::PartialDeliveryFailure {
                succeeded: self.successes.clone(),
                failed: self.failures.clone(),
            }),
        }
    }
}

struct Inner {
    config: Arc<RelayConfig>,
    delivery: DomainDelivery,
    signers: SignerFactory,
}

/// Cheap to clone; each accepted message runs on its own clone.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Inner>,
}

impl Relay {
    /// Fails only when the configured DKIM key cannot be used.
    pub fn new(config: Arc<RelayConfig>, lookup: Arc<dyn MxLookup>) -> Result<Self, DeliveryError> {
        let signers = SignerFactory::new(&config.dkim)?;
        let routes = RouteResolver::new(lookup, config.domains.clone(), config.timeouts.smtp_port);
        let delivery = DomainDelivery::new(routes, config.timeouts.clone(), config.domain.clone());

        if signers.is_enabled() {
            internal!(level = INFO, "DKIM signing enabled with selector '{}'", config.dkim.selector);
        } else {
            tracing::warn!("No DKIM private key configured, messages will be sent unsigned");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                delivery,
                signers,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Relays one message to every recipient domain concurrently.
    ///
    /// Only a message that cannot be decoded is an error; delivery problems
    /// are reported per domain in the [`SessionResult`].
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(from = envelope_from, recipients = recipients.len())), timing(precision = "ms"))]
    pub async fn relay(
        &self,
        envelope_from: &str,
        recipients: &[String],
        raw: &[u8],
    ) -> Result<SessionResult, ParseError> {
        let mut state = RelayState::Received;
        internal!("Message {state}: {} bytes", raw.len());

        let message = ParsedMessage::parse(raw, &self.inner.config.domain)?;
        state = RelayState::Parsed;
        internal!("Message {state}: {}", message.message_id());

        let groups = RecipientGroups::group(recipients.iter().cloned());
        state = RelayState::Grouped;
        internal!(
            level = DEBUG,
            "Message {state}: {} recipient(s) across {} domain(s)",
            recipients.len(),
            groups.len()
        );

        // One signing identity per message: the sender's domain.
        let outcomes = match self.inner.signers.create(&grouping_key(envelope_from)) {
            Ok(signer) => {
                if let Some(signer) = &signer {
                    internal!(
                        level = DEBUG,
                        "Signing as {} with selector '{}'",
                        signer.domain(),
                        signer.selector()
                    );
                }

                state = RelayState::Delivering;
                internal!("Message {state}");

                join_all(groups.iter().map(|(domain, group)| {
                    self.inner
                        .delivery
                        .deliver(domain, group, &message, envelope_from, signer.as_ref())
                }))
                .await
            }
            Err(err) => {
                tracing::error!(error = %err, "Unable to create a signing context");
                groups
                    .domains()
                    .map(|domain| DomainOutcome {
                        domain: domain.to_string(),
                        result: Err(err.clone()),
                    })
                    .collect()
            }
        };

        let result = SessionResult::from_outcomes(outcomes);
        state = RelayState::Completed;
        internal!(
            level = INFO,
            "Message {} {state}: {} domain(s) delivered, {} failed",
            message.message_id(),
            result.successes.len(),
            result.failures.len()
        );

        Ok(result)
    }
}
