use std::{future::Future, sync::Arc};

use outpost_common::{Signal, config::RelayConfig, internal};
use outpost_relay::{DnsResolver, Relay, RelayHandlerFactory};
use outpost_smtp::{Listener, SessionConfig};
use outpost_tracing::traced;
use tokio::sync::broadcast;

/// Resolves once SIGINT or SIGTERM arrives.
#[traced(instrument(level = tracing::Level::TRACE))]
pub async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    }

    Ok(())
}

/// Owns the process lifetime: builds the relay, serves submissions and shuts
/// everything down when asked.
pub struct Controller {
    config: Arc<RelayConfig>,
}

impl Controller {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Runs until SIGINT/SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(async {
            if let Err(err) = shutdown_signal().await {
                tracing::error!("Unable to listen for shutdown signals: {err}");
            }
        })
        .await
    }

    /// Runs until `stop` resolves, then lets open sessions finish.
    ///
    /// # Errors
    ///
    /// Failing to set up DNS, an unusable DKIM key, or failing to bind the
    /// listen address. Nothing that happens once serving has started is fatal.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run_until<F>(self, stop: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let resolver = DnsResolver::new(self.config.timeouts.dns())?;
        let relay = Relay::new(Arc::clone(&self.config), Arc::new(resolver))?;

        let listener = Listener::bind(
            &self.config.listen_address(),
            RelayHandlerFactory::new(relay),
            SessionConfig::from(&self.config.server),
        )
        .await?;

        internal!(
            level = INFO,
            "Relaying for {} on {}",
            self.config.domain,
            listener.local_addr()?
        );

        let (broadcast, receiver) = broadcast::channel(16);
        let mut server = tokio::spawn(listener.serve(receiver));

        tokio::select! {
            result = &mut server => {
                result??;
                return Ok(());
            }
            () = stop => {}
        }

        // No receivers left means the listener already stopped.
        let _ = broadcast.send(Signal::Shutdown);
        server.await??;

        internal!(level = INFO, "Shutdown complete");
        Ok(())
    }
}
