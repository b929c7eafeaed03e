use std::{net::SocketAddr, sync::Arc, time::Duration};

use outpost_common::{
    Signal, config::ServerSettings, error::SessionError, incoming, internal, outgoing,
    status::Status,
};
use outpost_tracing::traced;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};

use crate::{
    auth::{self, Credentials, LOGIN_PASSWORD_PROMPT, LOGIN_USERNAME_PROMPT},
    command::{AuthMechanism, Command, HeloVariant, MailParameters},
    envelope::Envelope,
    reply::Reply,
    state::{Sequence, State},
    transaction_handler::SmtpTransactionHandler,
};

/// Longest command line accepted, sized for AUTH initial responses (RFC 4954 Section 4).
const MAX_COMMAND_LINE: usize = 12 * 1024;

/// Longer DATA lines are read in pieces of this size.
const MAX_DATA_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub banner: String,
    /// Upper bound on the unstuffed DATA payload, advertised through SIZE.
    pub max_message_size: usize,
    /// Idle time allowed while waiting for a command or a line of DATA.
    pub command_timeout: Duration,
}

impl From<&ServerSettings> for SessionConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            banner: settings.banner.clone(),
            max_message_size: settings.max_message_size,
            command_timeout: settings.command_timeout(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    ConnectionClose,
    ConnectionKeepAlive,
}

/// One inbound submission conversation.
pub struct Session<Stream, Handler> {
    peer: SocketAddr,
    stream: BufReader<Stream>,
    /// Bytes of a partially received line; kept across cancelled reads.
    pending: Vec<u8>,
    handler: Handler,
    envelope: Envelope,
    state: State,
    config: Arc<SessionConfig>,
}

impl<Stream, Handler> Session<Stream, Handler>
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
    Handler: SmtpTransactionHandler,
{
    pub fn new(stream: Stream, peer: SocketAddr, handler: Handler, config: Arc<SessionConfig>) -> Self {
        Self {
            peer,
            stream: BufReader::new(stream),
            pending: Vec::new(),
            handler,
            envelope: Envelope::new(),
            state: State::default(),
            config,
        }
    }

    /// Drives the conversation until QUIT, disconnect, timeout or shutdown.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(peer = %self.peer)), timing(precision = "ms"))]
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        internal!("Connected");

        if let Err(reply) = self.handler.on_connect(self.peer).await {
            self.send(&reply).await?;
            return Ok(());
        }

        let greeting = format!("{} ESMTP outpost ready", self.config.banner);
        self.send(&Reply::new(Status::ServiceReady, greeting)).await?;

        loop {
            let received = tokio::select! {
                signal = shutdown.recv() => {
                    if matches!(signal, Ok(Signal::Shutdown) | Err(RecvError::Closed)) {
                        internal!(level = INFO, "Shutdown requested, closing session");
                        self.send(&Reply::new(Status::Unavailable, "4.3.2 Server shutting down")).await?;
                        return Err(SessionError::Shutdown);
                    }
                    continue;
                }
                received = tokio::time::timeout(self.config.command_timeout, self.read_chunk(MAX_COMMAND_LINE)) => received,
            };

            let line = match received {
                Err(_) => return self.timed_out().await,
                Ok(chunk) => chunk?,
            };

            if line.is_empty() {
                internal!("Peer closed the connection");
                return Ok(());
            }

            if !line.ends_with(b"\n") {
                self.send(&Reply::new(Status::SyntaxError, "5.5.6 Line too long"))
                    .await?;
                return Err(SessionError::Protocol(String::from("Command line too long")));
            }

            match self.dispatch(&line).await {
                Ok(Event::ConnectionClose) => return Ok(()),
                Ok(Event::ConnectionKeepAlive) => {}
                Err(SessionError::Timeout(_)) => return self.timed_out().await,
                Err(err) => return Err(err),
            }
        }
    }

    async fn timed_out(&mut self) -> Result<(), SessionError> {
        let secs = self.config.command_timeout.as_secs();
        tracing::warn!(peer = %self.peer, state = ?self.state, timeout_secs = secs, "Client connection timed out");

        // The peer may already be gone; the timeout is what gets reported.
        let _ = self
            .send(&Reply::new(Status::Unavailable, "4.4.2 Idle timeout, closing connection"))
            .await;

        Err(SessionError::Timeout(secs))
    }

    async fn dispatch(&mut self, line: &[u8]) -> Result<Event, SessionError> {
        let command = Command::try_from(line).unwrap_or_else(|invalid| invalid);
        incoming!("{command}");

        if let Sequence::OutOfOrder(reason) = self.state.permits(&command) {
            self.send(&Reply::new(
                Status::InvalidCommandSequence,
                format!("5.5.1 {reason}"),
            ))
            .await?;
            return Ok(Event::ConnectionKeepAlive);
        }

        let reply = match &command {
            Command::Helo(variant) => self.helo(variant),
            Command::Auth { mechanism, initial } => self.auth(mechanism, initial.as_deref()).await?,
            Command::MailFrom(sender, params) => self.mail_from(sender, params).await,
            Command::RcptTo(recipient) => self.rcpt_to(recipient).await,
            Command::Data => self.data().await?,
            Command::Rset => {
                self.envelope.reset_transaction();
                Reply::ok("2.0.0 Ok")
            }
            Command::Noop => Reply::ok("2.0.0 Ok"),
            Command::Help => Reply::new(
                Status::HelpMessage,
                "2.0.0 Supported: EHLO HELO AUTH MAIL RCPT DATA RSET NOOP HELP QUIT",
            ),
            Command::Quit => Reply::new(Status::GoodBye, "2.0.0 Bye"),
            Command::StartTls => Reply::new(Status::NotImplemented, "5.5.1 STARTTLS not available"),
            Command::Invalid(reason) => Reply::new(Status::SyntaxError, format!("5.5.2 {reason}")),
        };

        // DATA always ends the transaction, whatever the final reply was.
        if reply.is_positive() || command == Command::Data {
            self.state = self.state.after(&command);
        }

        self.send(&reply).await?;

        Ok(if self.state == State::Closed {
            Event::ConnectionClose
        } else {
            Event::ConnectionKeepAlive
        })
    }

    fn helo(&mut self, variant: &HeloVariant) -> Reply {
        self.envelope.reset_transaction();

        match variant {
            HeloVariant::Helo(id) => {
                self.envelope.set_helo(id.as_str());
                Reply::ok(format!("{} greets {id}", self.config.banner))
            }
            HeloVariant::Ehlo(id) => {
                self.envelope.set_helo(id.as_str());
                Reply::multiline(
                    Status::Ok,
                    vec![
                        format!("{} greets {id}", self.config.banner),
                        String::from("AUTH PLAIN LOGIN"),
                        format!("SIZE {}", self.config.max_message_size),
                        String::from("8BITMIME"),
                        String::from("ENHANCEDSTATUSCODES"),
                        String::from("HELP"),
                    ],
                )
            }
        }
    }

    async fn auth(
        &mut self,
        mechanism: &AuthMechanism,
        initial: Option<&str>,
    ) -> Result<Reply, SessionError> {
        if self.envelope.authenticated().is_some() {
            return Ok(Reply::new(
                Status::InvalidCommandSequence,
                "5.5.1 Already authenticated",
            ));
        }

        let decoded = match mechanism {
            AuthMechanism::Plain => {
                let response = match initial {
                    Some(response) => response.to_string(),
                    None => match self.challenge("").await? {
                        Some(response) => response,
                        None => return Ok(auth_cancelled()),
                    },
                };

                auth::decode_plain(&response)
            }
            AuthMechanism::Login => {
                let username = match initial {
                    Some(username) => username.to_string(),
                    None => match self.challenge(LOGIN_USERNAME_PROMPT).await? {
                        Some(username) => username,
                        None => return Ok(auth_cancelled()),
                    },
                };
                let Some(password) = self.challenge(LOGIN_PASSWORD_PROMPT).await? else {
                    return Ok(auth_cancelled());
                };

                auth::decode_login(&username).and_then(|username| {
                    auth::decode_login(&password).map(|password| Credentials { username, password })
                })
            }
            AuthMechanism::Unsupported(name) => {
                return Ok(Reply::new(
                    Status::ParameterNotImplemented,
                    format!("5.5.4 Unrecognized authentication type {name}"),
                ));
            }
        };

        let credentials = match decoded {
            Ok(credentials) => credentials,
            Err(err) => return Ok(Reply::new(Status::ParameterError, format!("5.5.2 {err}"))),
        };

        Ok(
            match self
                .handler
                .on_auth(&credentials.username, &credentials.password)
                .await
            {
                Ok(()) => {
                    self.envelope.authenticate(credentials.username);
                    Reply::new(Status::AuthSucceeded, "2.7.0 Authentication successful")
                }
                Err(reply) => reply,
            },
        )
    }

    /// Sends a 334 challenge and reads the client's answer. `None` means the client sent `*`.
    async fn challenge(&mut self, prompt: &str) -> Result<Option<String>, SessionError> {
        self.send(&Reply::new(Status::AuthContinue, prompt)).await?;

        let line = tokio::time::timeout(self.config.command_timeout, self.read_chunk(MAX_COMMAND_LINE))
            .await
            .map_err(|_| SessionError::Timeout(self.config.command_timeout.as_secs()))??;

        if line.is_empty() {
            return Err(SessionError::Protocol(String::from(
                "Connection closed during AUTH",
            )));
        }

        let response = String::from_utf8_lossy(&line).trim().to_string();
        Ok((response != "*").then_some(response))
    }

    async fn mail_from(&mut self, sender: &str, params: &MailParameters) -> Reply {
        if self.envelope.authenticated().is_none() {
            return Reply::new(Status::AuthRequired, "5.7.0 Authentication required");
        }

        if let Some(declared) = params.size()
            && declared > self.config.max_message_size
        {
            return Reply::new(
                Status::ExceededStorage,
                format!(
                    "5.3.4 Declared size {declared} exceeds fixed maximum message size {}",
                    self.config.max_message_size
                ),
            );
        }

        match self.handler.on_mail_from(&self.envelope, sender).await {
            Ok(()) => {
                self.envelope.set_sender(sender);
                Reply::ok("2.1.0 Sender OK")
            }
            Err(reply) => reply,
        }
    }

    async fn rcpt_to(&mut self, recipient: &str) -> Reply {
        match self.handler.on_rcpt_to(&self.envelope, recipient).await {
            Ok(()) => {
                self.envelope.add_recipient(recipient);
                Reply::ok("2.1.5 Recipient OK")
            }
            Err(reply) => reply,
        }
    }

    async fn data(&mut self) -> Result<Reply, SessionError> {
        self.send(&Reply::new(
            Status::StartMailInput,
            "End data with <CR><LF>.<CR><LF>",
        ))
        .await?;

        let reply = match self.read_message().await? {
            Some(message) => {
                internal!(level = DEBUG, "Received {} byte message", message.len());
                self.handler.on_data(&self.envelope, message).await
            }
            None => Reply::new(
                Status::ExceededStorage,
                format!(
                    "5.3.4 Message exceeds fixed maximum message size {}",
                    self.config.max_message_size
                ),
            ),
        };

        self.envelope.reset_transaction();
        Ok(reply)
    }

    /// Reads DATA up to the terminating `.` line, undoing dot-stuffing.
    ///
    /// Returns `None` when the payload exceeded the size limit; the rest of the
    /// message is still consumed so the connection stays in sync.
    async fn read_message(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let limit = self.config.max_message_size;
        let mut message = Vec::new();
        let mut exceeded = false;
        let mut at_line_start = true;

        loop {
            let chunk = tokio::time::timeout(self.config.command_timeout, self.read_chunk(MAX_DATA_CHUNK))
                .await
                .map_err(|_| SessionError::Timeout(self.config.command_timeout.as_secs()))??;

            if chunk.is_empty() {
                return Err(SessionError::Protocol(String::from(
                    "Connection closed during DATA",
                )));
            }

            if at_line_start && (chunk == b".\r\n" || chunk == b".\n") {
                break;
            }

            let content = if at_line_start && chunk.starts_with(b".") {
                &chunk[1..]
            } else {
                &chunk[..]
            };

            if !exceeded {
                if message.len().saturating_add(content.len()) > limit {
                    exceeded = true;
                    message = Vec::new();
                } else {
                    message.extend_from_slice(content);
                }
            }

            at_line_start = chunk.ends_with(b"\n");
        }

        Ok((!exceeded).then_some(message))
    }

    /// Reads through the next LF, at most `limit` bytes. Empty means the peer closed.
    ///
    /// Partial input stays in `pending`, so a read cancelled by `select!` loses nothing.
    async fn read_chunk(&mut self, limit: usize) -> Result<Vec<u8>, SessionError> {
        let remaining = u64::try_from(limit.saturating_sub(self.pending.len())).unwrap_or(u64::MAX);

        (&mut self.stream)
            .take(remaining)
            .read_until(b'\n', &mut self.pending)
            .await?;

        Ok(std::mem::take(&mut self.pending))
    }

    async fn send(&mut self, reply: &Reply) -> Result<(), SessionError> {
        let wire = reply.to_string();
        outgoing!("{}", wire.trim_end());

        let stream = self.stream.get_mut();
        stream.write_all(wire.as_bytes()).await?;
        stream.flush().await?;

        Ok(())
    }
}

fn auth_cancelled() -> Reply {
    Reply::new(Status::ParameterError, "5.0.0 Authentication cancelled")
}
