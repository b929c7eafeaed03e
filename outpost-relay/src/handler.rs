//! Bridges the inbound SMTP surface to the relay engine.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use outpost_common::{internal, status::Status};
use outpost_smtp::{HandlerFactory, Reply, SmtpTransactionHandler, envelope::Envelope};

use crate::{
    error::{ParseError, PolicyError},
    orchestrator::{Relay, SessionResult},
    policy::SessionPolicy,
};

impl From<&PolicyError> for Reply {
    fn from(err: &PolicyError) -> Self {
        match err {
            PolicyError::AuthRejected => {
                Self::new(Status::AuthFailed, "5.7.8 Authentication credentials invalid")
            }
            PolicyError::SenderDomainRejected(_) => {
                Self::new(Status::Error, "5.7.1 Sender domain not allowed")
            }
            PolicyError::RecipientRejected(_) => {
                Self::new(Status::ParameterError, format!("5.1.3 {err}"))
            }
        }
    }
}

/// The final answer to DATA for one relayed message.
#[must_use]
pub fn data_reply(result: &Result<SessionResult, ParseError>) -> Reply {
    match result {
        Ok(session) => match session.verdict() {
            Ok(delivered) => Reply::ok(format!("2.0.0 Message relayed to {delivered} domain(s)")),
            Err(err) => Reply::new(Status::Error, format!("5.0.0 {err}")),
        },
        // The parser's detail stays in the log.
        Err(_) => Reply::new(Status::TransactionFailed, "5.6.0 Message could not be parsed"),
    }
}

/// One per inbound connection.
pub struct RelayHandler {
    peer: SocketAddr,
    policy: Arc<SessionPolicy>,
    relay: Relay,
}

impl RelayHandler {
    #[must_use]
    pub const fn new(peer: SocketAddr, policy: Arc<SessionPolicy>, relay: Relay) -> Self {
        Self {
            peer,
            policy,
            relay,
        }
    }
}

#[async_trait]
impl SmtpTransactionHandler for RelayHandler {
    async fn on_connect(&mut self, peer: SocketAddr) -> Result<(), Reply> {
        internal!(level = INFO, "Connection from {peer}");
        Ok(())
    }

    async fn on_auth(&mut self, username: &str, password: &str) -> Result<(), Reply> {
        self.policy
            .authenticate(username, password)
            .map_err(|err| Reply::from(&err))
    }

    async fn on_mail_from(&mut self, _envelope: &Envelope, sender: &str) -> Result<(), Reply> {
        self.policy
            .validate_sender(sender)
            .map_err(|err| Reply::from(&err))
    }

    async fn on_rcpt_to(&mut self, _envelope: &Envelope, recipient: &str) -> Result<(), Reply> {
        self.policy
            .accept_recipient(recipient)
            .map_err(|err| Reply::from(&err))
    }

    /// Delivery runs in its own task: if this connection goes away while the
    /// task is in flight, the attempts still run to completion.
    async fn on_data(&mut self, envelope: &Envelope, message: Vec<u8>) -> Reply {
        let relay = self.relay.clone();
        let sender = envelope.sender().unwrap_or_default().to_string();
        let recipients = envelope.recipients().to_vec();
        let peer = self.peer;

        let task = tokio::spawn(async move {
            let result = relay.relay(&sender, &recipients, &message).await;
            if let Err(err) = &result {
                tracing::warn!(%peer, error = %err, "Rejecting unparsable message");
            }
            data_reply(&result)
        });

        match task.await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(peer = %self.peer, error = %err, "Relay task failed");
                Reply::new(Status::ActionUnavailable, "4.3.0 Local error in processing")
            }
        }
    }
}

/// Hands every connection the shared policy and relay.
#[derive(Clone)]
pub struct RelayHandlerFactory {
    policy: Arc<SessionPolicy>,
    relay: Relay,
}

impl RelayHandlerFactory {
    #[must_use]
    pub fn new(relay: Relay) -> Self {
        Self {
            policy: Arc::new(SessionPolicy::new(relay.config())),
            relay,
        }
    }
}

impl HandlerFactory for RelayHandlerFactory {
    type Handler = RelayHandler;

    fn create(&self, peer: SocketAddr) -> Self::Handler {
        RelayHandler::new(peer, Arc::clone(&self.policy), self.relay.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::DomainFailure;

    #[test]
    fn policy_rejections() {
        assert_eq!(
            Reply::from(&PolicyError::AuthRejected).to_string(),
            "535 5.7.8 Authentication credentials invalid\r\n"
        );
        assert_eq!(
            Reply::from(&PolicyError::SenderDomainRejected(String::from("wrong.com"))).to_string(),
            "550 5.7.1 Sender domain not allowed\r\n"
        );
        assert_eq!(
            Reply::from(&PolicyError::RecipientRejected(String::from("nodomain"))).to_string(),
            "501 5.1.3 Recipient 'nodomain' has no usable domain\r\n"
        );
    }

    #[test]
    fn data_replies() {
        let delivered = SessionResult {
            successes: vec![String::from("foo.com"), String::from("bar.com")],
            failures: Vec::new(),
        };
        assert_eq!(
            data_reply(&Ok(delivered)).to_string(),
            "250 2.0.0 Message relayed to 2 domain(s)\r\n"
        );

        let partial = SessionResult {
            successes: vec![String::from("foo.com")],
            failures: vec![DomainFailure {
                domain: String::from("bar.com"),
                error: String::from("refused"),
            }],
        };
        assert_eq!(
            data_reply(&Ok(partial)).to_string(),
            "550 5.0.0 Partial delivery: 1 succeeded, 1 failed. Succeeded: foo.com. Failed: bar.com (refused)\r\n"
        );
    }

    #[test]
    fn parse_failures_do_not_leak_detail() {
        let err = ParseError::ParseFailed(mailparse::MailParseError::Generic(
            "Unexpected end of headers",
        ));

        assert_eq!(
            data_reply(&Err(err)).to_string(),
            "554 5.6.0 Message could not be parsed\r\n"
        );
    }
}
