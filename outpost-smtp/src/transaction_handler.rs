//! Seam between the submission protocol and whatever decides what to do with it.
//!
//! The session owns sequencing and I/O; the handler owns every accept/reject
//! decision and what happens to the message once DATA completes.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::{envelope::Envelope, reply::Reply};

/// Per-connection callbacks invoked by [`crate::session::Session`].
///
/// Rejections are returned as the [`Reply`] to send back, so the handler
/// chooses both the status code and the enhanced status text.
#[async_trait]
pub trait SmtpTransactionHandler: Send {
    /// Called before the greeting. Returning an error closes the connection with that reply.
    async fn on_connect(&mut self, _peer: SocketAddr) -> Result<(), Reply> {
        Ok(())
    }

    /// Credentials decoded from AUTH PLAIN or AUTH LOGIN.
    async fn on_auth(&mut self, username: &str, password: &str) -> Result<(), Reply>;

    /// The envelope still holds the previous state; `sender` is not yet recorded.
    async fn on_mail_from(&mut self, envelope: &Envelope, sender: &str) -> Result<(), Reply>;

    async fn on_rcpt_to(&mut self, envelope: &Envelope, recipient: &str) -> Result<(), Reply>;

    /// The complete, dot-unstuffed message. The returned reply is the final
    /// answer to the DATA command.
    async fn on_data(&mut self, envelope: &Envelope, message: Vec<u8>) -> Reply;
}

/// Creates one handler per accepted connection.
pub trait HandlerFactory: Send + Sync + 'static {
    type Handler: SmtpTransactionHandler + 'static;

    fn create(&self, peer: SocketAddr) -> Self::Handler;
}
