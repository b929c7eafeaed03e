pub mod config;
pub mod error;
pub mod logging;
pub mod status;

pub use tracing;

/// Broadcast to every long-running task by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
