//! Outbound SMTP client used to hand messages to remote exchangers.
//!
//! The client speaks plain SMTP and can upgrade an open connection with
//! STARTTLS. It is deliberately small: command sequencing, failure
//! classification and timeouts belong to the caller.
//!
//! ```no_run
//! use outpost_smtp::client::SmtpClient;
//!
//! # async fn example() -> Result<(), outpost_smtp::client::ClientError> {
//! let mut client = SmtpClient::connect("mx.example.net", 25).await?;
//! client.read_greeting().await?;
//! let ehlo = client.ehlo("example.com").await?;
//! if ehlo.has_capability("STARTTLS") {
//!     client.starttls().await?;
//!     client.ehlo("example.com").await?;
//! }
//! client.mail_from("alice@example.com").await?;
//! client.rcpt_to("bob@example.net").await?;
//! client.data().await?;
//! client.send_data(b"Subject: hi\r\n\r\nHello").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
