use std::{net::SocketAddr, sync::Arc};

use futures_util::future::join_all;
use outpost_common::{Signal, error::ListenerError, internal};
use outpost_tracing::traced;
use tokio::{net::TcpListener, sync::broadcast};

use crate::{
    session::{Session, SessionConfig},
    transaction_handler::HandlerFactory,
};

/// Accepts submission connections and runs one [`Session`] task per peer.
pub struct Listener<F: HandlerFactory> {
    listener: TcpListener,
    factory: Arc<F>,
    config: Arc<SessionConfig>,
}

impl<F: HandlerFactory> Listener<F> {
    /// Binds the listening socket. Failure here is the only fatal error of the submission surface.
    pub async fn bind(
        address: &str,
        factory: F,
        config: SessionConfig,
    ) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ListenerError::BindFailed {
                address: address.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            factory: Arc::new(factory),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ListenerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until a shutdown signal arrives, then waits for open sessions to finish.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err))]
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), ListenerError> {
        let local = self.local_addr()?;
        internal!(level = INFO, "Accepting submissions on {local}");

        let mut sessions = Vec::default();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        internal!(
                            level = INFO,
                            "Listener {local} received shutdown signal, finishing {} sessions ...",
                            sessions.len()
                        );
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = self.listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(%local, error = %err, "Failed to accept connection");
                            continue;
                        }
                    };

                    tracing::debug!(%peer, "Connection received on {local}");
                    sessions.retain(|session: &tokio::task::JoinHandle<()>| !session.is_finished());

                    let session = Session::new(stream, peer, self.factory.create(peer), Arc::clone(&self.config));
                    let signal = shutdown.resubscribe();

                    sessions.push(tokio::spawn(async move {
                        match session.run(signal).await {
                            Ok(()) => {}
                            Err(err) if err.is_shutdown() => {}
                            Err(err) if err.is_client_error() => {
                                tracing::info!(%peer, "Session ended: {err}");
                            }
                            Err(err) => internal!(level = ERROR, "Session with {peer} failed: {err}"),
                        }
                    }));
                }
            }
        }

        Ok(())
    }
}
