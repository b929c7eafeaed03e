//! Scriptable remote exchanger for delivery tests.
#![allow(dead_code)] // Not every test binary uses every knob.
//!
//! Accepts any number of connections, answers each command with a configured
//! reply and records what it was sent:
//!
//! ```rust,no_run
//! let server = MockSmtpServer::builder()
//!     .with_rcpt_to_response(550, "5.1.1 User unknown")
//!     .build()
//!     .await?;
//!
//! // deliver to server.addr(), then inspect server.commands()
//! ```

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    task::JoinHandle,
};

/// What the server was sent, in order, across every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// A new connection was accepted.
    Connected,
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Dot-unstuffed message body, terminator excluded.
    Message(Vec<u8>),
    StartTls,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Response {
    code: u16,
    message: String,
}

impl Response {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct MockServerConfig {
    greeting: Response,
    ehlo_code: u16,
    capabilities: Vec<String>,
    mail_from: Response,
    rcpt_to: Response,
    data: Response,
    data_end: Response,
    /// `Some` advertises STARTTLS and answers it with this reply.
    starttls: Option<Response>,
    response_delay: Option<Duration>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: Response::new(220, "mock.test ESMTP"),
            ehlo_code: 250,
            capabilities: vec![String::from("mock.test"), String::from("SIZE 10000000")],
            mail_from: Response::new(250, "2.1.0 OK"),
            rcpt_to: Response::new(250, "2.1.5 OK"),
            data: Response::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end: Response::new(250, "2.0.0 OK: queued"),
            starttls: None,
            response_delay: None,
        }
    }
}

impl MockServerConfig {
    fn ehlo_bytes(&self) -> Vec<u8> {
        let mut lines = self.capabilities.clone();
        if self.starttls.is_some() {
            lines.push(String::from("STARTTLS"));
        }

        let last = lines.len().saturating_sub(1);
        lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let separator = if index == last { ' ' } else { '-' };
                format!("{}{separator}{line}\r\n", self.ehlo_code)
            })
            .collect::<String>()
            .into_bytes()
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    task: JoinHandle<()>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `127.0.0.1:<port>`, ready for a route override.
    #[must_use]
    pub fn route(&self) -> String {
        self.addr.to_string()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// Every message body received, in arrival order.
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::Message(body) => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }

    async fn handle_client(
        stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        commands.write().await.push(SmtpCommand::Connected);
        writer.write_all(&config.greeting.to_bytes()).await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let command_line = line.trim_end();
            let (verb, rest) = command_line
                .split_once(' ')
                .unwrap_or((command_line, ""));
            let verb = verb.to_ascii_uppercase();

            let (command, reply) = match verb.as_str() {
                "EHLO" => (SmtpCommand::Ehlo(rest.to_string()), config.ehlo_bytes()),
                "HELO" => (
                    SmtpCommand::Helo(rest.to_string()),
                    Response::new(250, "mock.test").to_bytes(),
                ),
                "MAIL" => (SmtpCommand::MailFrom(rest.to_string()), config.mail_from.to_bytes()),
                "RCPT" => (SmtpCommand::RcptTo(rest.to_string()), config.rcpt_to.to_bytes()),
                "DATA" => (SmtpCommand::Data, config.data.to_bytes()),
                "RSET" | "NOOP" => (
                    SmtpCommand::Other(verb.clone()),
                    Response::new(250, "2.0.0 OK").to_bytes(),
                ),
                "STARTTLS" => (
                    SmtpCommand::StartTls,
                    config
                        .starttls
                        .as_ref()
                        .map_or_else(|| Response::new(502, "5.5.1 Not implemented"), Clone::clone)
                        .to_bytes(),
                ),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&Response::new(221, "2.0.0 Bye").to_bytes()).await?;
                    return Ok(());
                }
                _ => (
                    SmtpCommand::Other(command_line.to_string()),
                    Response::new(500, "5.5.2 Unknown command").to_bytes(),
                ),
            };

            let is_data = command == SmtpCommand::Data;
            commands.write().await.push(command);

            if let Some(delay) = config.response_delay {
                tokio::time::sleep(delay).await;
            }
            writer.write_all(&reply).await?;

            if is_data && config.data.code == 354 {
                let body = Self::read_message(&mut reader).await?;
                commands.write().await.push(SmtpCommand::Message(body));
                writer.write_all(&config.data_end.to_bytes()).await?;
            }
        }
    }

    async fn read_message<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
    where
        R: AsyncBufReadExt + Unpin,
    {
        let mut body = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                return Ok(body);
            }

            if line == b".\r\n" || line == b".\n" {
                return Ok(body);
            }

            let unstuffed = line.strip_prefix(b".").filter(|_| line.starts_with(b".."));
            body.extend_from_slice(unstuffed.unwrap_or(&line));
        }
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = Response::new(code, message);
        self
    }

    #[must_use]
    pub const fn with_ehlo_code(mut self, code: u16) -> Self {
        self.config.ehlo_code = code;
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from = Response::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.rcpt_to = Response::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data = Response::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = Response::new(code, message);
        self
    }

    /// Advertise STARTTLS and answer it with this reply.
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.starttls = Some(Response::new(code, message));
        self
    }

    #[must_use]
    pub const fn with_response_delay(mut self, delay: Duration) -> Self {
        self.config.response_delay = Some(delay);
        self
    }

    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));

        let task = {
            let commands = Arc::clone(&commands);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands);

                    tokio::spawn(async move {
                        if let Err(err) = MockSmtpServer::handle_client(stream, config, commands).await {
                            tracing::debug!("Mock server client error: {err}");
                        }
                    });
                }
            })
        };

        Ok(MockSmtpServer {
            addr,
            commands,
            task,
        })
    }
}

/// An address nothing is listening on.
pub async fn closed_port() -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    listener.local_addr()
}
