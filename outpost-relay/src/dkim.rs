use std::sync::Arc;

use lettre::message::dkim::{DkimConfig, DkimSigningAlgorithm, DkimSigningKey};
use outpost_common::config::DkimSettings;

use crate::error::DeliveryError;

/// A ready-to-use DKIM identity, shared read-only by every delivery of one message.
#[derive(Clone)]
pub struct SigningContext {
    domain: String,
    selector: String,
    config: Arc<DkimConfig>,
}

impl SigningContext {
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub(crate) fn config(&self) -> &DkimConfig {
        &self.config
    }
}

impl std::fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningContext")
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// Holds the configured key material and hands out signing contexts per domain.
#[derive(Debug, Clone, Default)]
pub struct SignerFactory {
    selector: String,
    private_key: Option<String>,
}

impl SignerFactory {
    /// Builds the factory and checks the key parses, so a bad key fails at
    /// startup rather than on the first message.
    pub fn new(settings: &DkimSettings) -> Result<Self, DeliveryError> {
        let factory = Self {
            selector: settings.selector.clone(),
            private_key: settings.private_key().map(String::from),
        };

        if let Some(key) = &factory.private_key {
            parse_key(key)?;
        }

        Ok(factory)
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.private_key.is_some()
    }

    /// `None` when no private key is configured.
    pub fn create(&self, signing_domain: &str) -> Result<Option<SigningContext>, DeliveryError> {
        let Some(key) = &self.private_key else {
            return Ok(None);
        };

        let config = DkimConfig::default_config(
            self.selector.clone(),
            signing_domain.to_string(),
            parse_key(key)?,
        );

        Ok(Some(SigningContext {
            domain: signing_domain.to_string(),
            selector: self.selector.clone(),
            config: Arc::new(config),
        }))
    }
}

fn parse_key(pem: &str) -> Result<DkimSigningKey, DeliveryError> {
    DkimSigningKey::new(pem, DkimSigningAlgorithm::Rsa)
        .map_err(|err| DeliveryError::Signing(format!("invalid DKIM private key: {err}")))
}
