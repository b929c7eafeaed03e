//! SMTP plumbing for outpost: the authenticated submission surface that
//! accepts mail from trusted clients, and the outbound client used to relay
//! it to remote exchangers.

pub mod auth;
pub mod client;
pub mod command;
pub mod envelope;
pub mod listener;
pub mod reply;
pub mod session;
pub mod state;
pub mod transaction_handler;

pub use listener::Listener;
pub use reply::Reply;
pub use session::{Session, SessionConfig};
pub use transaction_handler::{HandlerFactory, SmtpTransactionHandler};
