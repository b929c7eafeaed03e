/// Everything one inbound connection has declared so far.
///
/// Owned by a single session and never shared; the transaction part (sender and
/// recipients) is cleared by RSET, a new EHLO, or a completed DATA.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    helo: Option<String>,
    authenticated: Option<String>,
    sender: Option<String>,
    recipients: Vec<String>,
}

impl Envelope {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            helo: None,
            authenticated: None,
            sender: None,
            recipients: Vec::new(),
        }
    }

    #[must_use]
    pub fn helo(&self) -> Option<&str> {
        self.helo.as_deref()
    }

    pub fn set_helo(&mut self, id: impl Into<String>) {
        self.helo = Some(id.into());
    }

    /// The identity that passed AUTH, if any.
    #[must_use]
    pub fn authenticated(&self) -> Option<&str> {
        self.authenticated.as_deref()
    }

    pub fn authenticate(&mut self, username: impl Into<String>) {
        self.authenticated = Some(username.into());
    }

    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn set_sender(&mut self, sender: impl Into<String>) {
        self.sender = Some(sender.into());
    }

    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn add_recipient(&mut self, recipient: impl Into<String>) {
        self.recipients.push(recipient.into());
    }

    /// Drop the mail transaction, keeping the greeting and authentication.
    pub fn reset_transaction(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_identity() {
        let mut envelope = Envelope::new();
        envelope.set_helo("client.example.com");
        envelope.authenticate("mailer");
        envelope.set_sender("a@example.com");
        envelope.add_recipient("x@foo.com");
        envelope.add_recipient("x@foo.com");

        assert_eq!(envelope.recipients().len(), 2);

        envelope.reset_transaction();

        assert_eq!(envelope.sender(), None);
        assert!(envelope.recipients().is_empty());
        assert_eq!(envelope.helo(), Some("client.example.com"));
        assert_eq!(envelope.authenticated(), Some("mailer"));
    }
}
