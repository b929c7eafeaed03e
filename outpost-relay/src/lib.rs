//! The intake-and-relay engine.
//!
//! An authenticated submission is gated by [`SessionPolicy`], parsed once,
//! split into one group per recipient domain and handed to a concurrent
//! [`DomainDelivery`] per group. Each domain succeeds or fails on its own; the
//! [`Relay`] folds the outcomes into a single [`SessionResult`] that becomes
//! the final reply to DATA.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use outpost_common::config::RelayConfig;
//! # use outpost_relay::{DnsResolver, Relay, RelayHandlerFactory};
//! # async fn example(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = DnsResolver::new(config.timeouts.dns())?;
//! let relay = Relay::new(Arc::new(config), Arc::new(resolver))?;
//! let factory = RelayHandlerFactory::new(relay);
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod delivery;
pub mod dkim;
pub mod dns;
pub mod error;
pub mod group;
pub mod handler;
pub mod message;
pub mod orchestrator;
pub mod policy;
pub mod route;
mod transaction;

pub use delivery::{DomainDelivery, DomainOutcome};
pub use dkim::{SignerFactory, SigningContext};
pub use dns::{DnsResolver, MxLookup, MxRecord};
pub use error::{DeliveryError, DnsError, ParseError, PolicyError, RelayError};
pub use group::RecipientGroups;
pub use handler::{RelayHandler, RelayHandlerFactory};
pub use message::ParsedMessage;
pub use orchestrator::{Relay, RelayState, SessionResult};
pub use policy::SessionPolicy;
pub use route::{DeliveryTarget, RouteResolver};
