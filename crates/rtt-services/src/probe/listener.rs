//! Primary probe port: every accepted connection is a probe session.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use super::ConnectionHandler;

/// Pause after a failed accept (e.g. EMFILE) before trying again.
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct ProbeListener {
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    shutdown: broadcast::Receiver<()>,
}

impl ProbeListener {
    pub fn new(
        listener: TcpListener,
        handler: Arc<dyn ConnectionHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            handler,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let local = self.listener.local_addr().ok();
        tracing::info!(addr = ?local, "probe listener started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(addr = ?local, "probe listener shutting down");
                    return;
                }

                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };

                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        handler.handle(stream, peer).await;
                    });
                }
            }
        }
    }
}
