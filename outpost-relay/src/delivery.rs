//! Domain Delivery Attempt: one destination domain, one outcome.

use outpost_common::{config::DeliveryTimeouts, internal};

use crate::{
    dkim::SigningContext,
    error::{DeliveryError, DomainFailure},
    message::ParsedMessage,
    route::RouteResolver,
    transaction::SmtpTransaction,
};

/// What happened to one recipient group. Produced exactly once per group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainOutcome {
    pub domain: String,
    pub result: Result<(), DeliveryError>,
}

impl DomainOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The failure in the form reported back to the submitter, if any.
    #[must_use]
    pub fn failure(&self) -> Option<DomainFailure> {
        self.result.as_ref().err().map(|err| DomainFailure {
            domain: self.domain.clone(),
            error: err.to_string(),
        })
    }
}

/// Delivers one rendered message per domain. Holds no per-message state, so a
/// single instance serves every concurrent attempt.
#[derive(Clone)]
pub struct DomainDelivery {
    routes: RouteResolver,
    timeouts: DeliveryTimeouts,
    /// Presented as the EHLO identity.
    helo_domain: String,
}

impl DomainDelivery {
    #[must_use]
    pub fn new(routes: RouteResolver, timeouts: DeliveryTimeouts, helo_domain: impl Into<String>) -> Self {
        Self {
            routes,
            timeouts,
            helo_domain: helo_domain.into(),
        }
    }

    /// Never fails: every error is folded into the returned outcome so sibling
    /// domains are unaffected. The whole attempt, failover included, is bounded
    /// by the submission timeout.
    pub async fn deliver(
        &self,
        domain: &str,
        recipients: &[String],
        message: &ParsedMessage,
        envelope_from: &str,
        signer: Option<&SigningContext>,
    ) -> DomainOutcome {
        let limit = self.timeouts.submission();
        let result = tokio::time::timeout(
            limit,
            self.attempt(domain, recipients, message, envelope_from, signer),
        )
        .await
        .unwrap_or_else(|_| Err(DeliveryError::SubmissionTimeout(limit)));

        match &result {
            Ok(()) => tracing::info!(
                domain,
                recipients = recipients.len(),
                message_id = message.message_id(),
                "Delivered"
            ),
            Err(err) => tracing::warn!(
                domain,
                recipients = recipients.len(),
                message_id = message.message_id(),
                error = %err,
                "Delivery failed"
            ),
        }

        DomainOutcome {
            domain: domain.to_string(),
            result,
        }
    }

    async fn attempt(
        &self,
        domain: &str,
        recipients: &[String],
        message: &ParsedMessage,
        envelope_from: &str,
        signer: Option<&SigningContext>,
    ) -> Result<(), DeliveryError> {
        let payload = message.compose(envelope_from, recipients, signer)?;
        let targets = self.routes.resolve(domain).await;

        let mut last_error = None;
        for target in &targets {
            internal!(level = DEBUG, "Delivering to {domain} via {target} (priority {})", target.priority);

            let transaction = SmtpTransaction::new(
                target,
                &self.helo_domain,
                envelope_from,
                recipients,
                &payload,
                &self.timeouts,
            );

            match transaction.execute().await {
                Ok(()) => return Ok(()),
                Err(err) if err.allows_failover() => {
                    tracing::warn!(domain, %target, error = %err, "Target unavailable, trying next");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| DeliveryError::Connect {
            target: domain.to_string(),
            reason: String::from("no delivery targets"),
        }))
    }
}
