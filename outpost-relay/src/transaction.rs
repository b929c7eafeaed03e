//! One SMTP conversation with one remote exchanger.
//!
//! Covers the whole exchange for a single target: connect, greeting, EHLO,
//! opportunistic STARTTLS (with the RFC 3207 plaintext retry), MAIL FROM,
//! RCPT TO for every recipient of the group, DATA and QUIT. Each step runs
//! under the command timeout; failures carry the [`Stage`] they happened in.

use std::{future::Future, time::Duration};

use outpost_common::config::DeliveryTimeouts;
use outpost_smtp::client::{ClientError, Response, SmtpClient};
use outpost_tracing::traced;

use crate::{
    error::{DeliveryError, Stage},
    route::DeliveryTarget,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsNegotiationOutcome {
    Success,
    /// The server does not advertise STARTTLS.
    Skipped,
    /// STARTTLS was refused or the handshake failed; reconnect in plaintext.
    RetryWithoutTls,
}

pub struct SmtpTransaction<'a> {
    target: &'a DeliveryTarget,
    /// Sending domain, presented as the EHLO identity.
    helo_domain: &'a str,
    sender: &'a str,
    recipients: &'a [String],
    message: &'a [u8],
    timeouts: &'a DeliveryTimeouts,
}

impl<'a> SmtpTransaction<'a> {
    #[must_use]
    pub const fn new(
        target: &'a DeliveryTarget,
        helo_domain: &'a str,
        sender: &'a str,
        recipients: &'a [String],
        message: &'a [u8],
        timeouts: &'a DeliveryTimeouts,
    ) -> Self {
        Self {
            target,
            helo_domain,
            sender,
            recipients,
            message,
            timeouts,
        }
    }

    fn address(&self) -> String {
        self.target.address()
    }

    /// Runs one client step under the command timeout.
    async fn step<F>(&self, stage: Stage, future: F) -> Result<Response, DeliveryError>
    where
        F: Future<Output = Result<Response, ClientError>>,
    {
        let after = self.timeouts.command();
        tokio::time::timeout(after, future)
            .await
            .map_err(|_| DeliveryError::Timeout {
                target: self.address(),
                stage,
                after,
            })?
            .map_err(|err| DeliveryError::protocol(&self.address(), stage, &err))
    }

    fn rejected(&self, stage: Stage, response: &Response) -> DeliveryError {
        DeliveryError::Smtp {
            target: self.address(),
            stage,
            code: response.code,
            message: response.message(),
        }
    }

    async fn connect_and_greet(&self) -> Result<SmtpClient, DeliveryError> {
        let after = self.timeouts.connect();
        let mut client = tokio::time::timeout(
            after,
            SmtpClient::connect(&self.target.host, self.target.port),
        )
        .await
        .map_err(|_| DeliveryError::Timeout {
            target: self.address(),
            stage: Stage::Connect,
            after,
        })?
        .map_err(|err| DeliveryError::Connect {
            target: self.address(),
            reason: err.to_string(),
        })?;

        let greeting = self.step(Stage::Greeting, client.read_greeting()).await?;
        if !greeting.is_success() {
            return Err(self.rejected(Stage::Greeting, &greeting));
        }

        Ok(client)
    }

    async fn ehlo(&self, client: &mut SmtpClient) -> Result<Response, DeliveryError> {
        let response = self.step(Stage::Ehlo, client.ehlo(self.helo_domain)).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(self.rejected(Stage::Ehlo, &response))
        }
    }

    /// Delivers to this target. Consumes the transaction; the client is dropped either way.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(target = %self.target)), timing(precision = "ms"))]
    pub async fn execute(self) -> Result<(), DeliveryError> {
        let mut client = self.connect_and_greet().await?;

        if self.negotiate_tls(&mut client).await? == TlsNegotiationOutcome::RetryWithoutTls {
            tracing::info!(target = %self.target, "Reconnecting without STARTTLS per RFC 3207 Section 4.1");

            drop(client);
            client = self.connect_and_greet().await?;
            self.ehlo(&mut client).await?;
        }

        tracing::debug!(
            target = %self.target,
            tls = client.is_tls(),
            "Starting mail transaction"
        );

        let mail = self.step(Stage::MailFrom, client.mail_from(self.sender)).await?;
        if !mail.is_success() {
            return Err(self.rejected(Stage::MailFrom, &mail));
        }

        for recipient in self.recipients {
            let rcpt = self.step(Stage::RcptTo, client.rcpt_to(recipient)).await?;
            if !rcpt.is_success() {
                return Err(DeliveryError::Smtp {
                    target: self.address(),
                    stage: Stage::RcptTo,
                    code: rcpt.code,
                    message: format!("<{recipient}> {}", rcpt.message()),
                });
            }
        }

        let data = self.step(Stage::Data, client.data()).await?;
        if !data.is_intermediate() {
            return Err(self.rejected(Stage::Data, &data));
        }

        let accepted = self.step(Stage::Message, client.send_data(self.message)).await?;
        if !accepted.is_success() {
            return Err(self.rejected(Stage::Message, &accepted));
        }

        // The message is delivered; a failed QUIT changes nothing.
        if let Err(err) = tokio::time::timeout(Duration::from_secs(5), client.quit()).await {
            tracing::debug!(target = %self.target, "QUIT timed out after successful delivery: {err}");
        }

        Ok(())
    }

    async fn negotiate_tls(
        &self,
        client: &mut SmtpClient,
    ) -> Result<TlsNegotiationOutcome, DeliveryError> {
        let ehlo = self.ehlo(client).await?;

        if !ehlo.has_capability("STARTTLS") {
            tracing::debug!(target = %self.target, "STARTTLS not offered, continuing in plaintext");
            return Ok(TlsNegotiationOutcome::Skipped);
        }

        match self.step(Stage::StartTls, client.starttls()).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                tracing::info!(
                    target = %self.target,
                    response = %response.message(),
                    "Server rejected STARTTLS, will retry without TLS"
                );
                return Ok(TlsNegotiationOutcome::RetryWithoutTls);
            }
            Err(err) => {
                tracing::info!(target = %self.target, error = %err, "STARTTLS failed, will retry without TLS");
                return Ok(TlsNegotiationOutcome::RetryWithoutTls);
            }
        }

        // RFC 3207: the session starts over after the handshake.
        self.ehlo(client).await?;
        tracing::debug!(target = %self.target, "TLS negotiated via STARTTLS");

        Ok(TlsNegotiationOutcome::Success)
    }
}
