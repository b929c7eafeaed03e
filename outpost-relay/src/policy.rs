//! Session Policy: the accept/reject decisions made while a submission is
//! still in progress.

use outpost_common::{config::RelayConfig, internal};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{address::domain_of, error::PolicyError};

/// Compares two secrets without leaking where they differ. Hashing first
/// hides the length as well.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let hash_a = Sha256::digest(a);
    let hash_b = Sha256::digest(b);
    hash_a.ct_eq(&hash_b).into()
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    username: String,
    password: String,
    sending_domain: String,
    reject_malformed_recipients: bool,
}

impl SessionPolicy {
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            sending_domain: config.domain.clone(),
            reject_malformed_recipients: config.reject_malformed_recipients,
        }
    }

    /// Accepts only the configured credential pair.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<(), PolicyError> {
        // Both comparisons always run.
        let user_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        let pass_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());

        if user_ok & pass_ok {
            internal!(level = INFO, "Authenticated '{username}'");
            Ok(())
        } else {
            tracing::warn!(username, "Authentication rejected");
            Err(PolicyError::AuthRejected)
        }
    }

    /// The sender's domain must be exactly the configured sending domain.
    /// Case-sensitive; this is the only thing keeping the relay closed.
    pub fn validate_sender(&self, address: &str) -> Result<(), PolicyError> {
        let domain = domain_of(address);

        if domain == self.sending_domain {
            internal!(level = DEBUG, "Sender '{address}' accepted");
            Ok(())
        } else {
            tracing::warn!(sender = address, domain, "Sender domain rejected");
            Err(PolicyError::SenderDomainRejected(domain.to_string()))
        }
    }

    /// Accepts everything unless malformed recipients are rejected up front,
    /// in which case an address needs a non-empty domain.
    pub fn accept_recipient(&self, address: &str) -> Result<(), PolicyError> {
        if self.reject_malformed_recipients && domain_of(address).is_empty() {
            tracing::warn!(recipient = address, "Recipient without a domain rejected");
            return Err(PolicyError::RecipientRejected(address.to_string()));
        }

        internal!(level = DEBUG, "Recipient '{address}' accepted");
        Ok(())
    }
}
