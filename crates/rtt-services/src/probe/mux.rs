//! Decoy/probe multiplexing on shared ports.
//!
//! Health checkers on these ports send a single `0xAA` and expect it back.
//! A real probe client connects and waits for the server, so silence (or a
//! half-close) within the classification timeout means "probe". Peeking is
//! never needed: in the probe case no byte has been read.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use rtt_core::wire::DECOY_MARKER;

use super::listener::ACCEPT_BACKOFF;
use super::ConnectionHandler;

/// Deadline for echoing the decoy marker.
const DECOY_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Silent or half-closed within the timeout. Nothing was consumed.
    Probe,
    /// Sent the decoy marker.
    Decoy,
    /// Sent some other byte.
    Reject(u8),
    /// Read failed (reset etc.).
    Broken,
}

/// Read at most one byte within `timeout` and decide what the peer is.
pub async fn classify(stream: &mut TcpStream, timeout: Duration) -> Classification {
    let mut buf = [0u8; 1];
    match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
        Err(_) => Classification::Probe,
        Ok(Ok(0)) => Classification::Probe,
        Ok(Ok(_)) if buf[0] == DECOY_MARKER => Classification::Decoy,
        Ok(Ok(_)) => Classification::Reject(buf[0]),
        Ok(Err(e)) => {
            tracing::trace!(error = %e, "classification read failed");
            Classification::Broken
        }
    }
}

/// Accept loop for one multiplexed port.
pub struct MuxListener {
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
    classify_timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl MuxListener {
    pub fn new(
        listener: TcpListener,
        handler: Arc<dyn ConnectionHandler>,
        classify_timeout: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            handler,
            classify_timeout,
            shutdown,
        }
    }

    /// Bind `addr`, logging and returning `None` on failure so one busy
    /// port does not take the rest down.
    pub async fn bind(
        addr: &str,
        handler: Arc<dyn ConnectionHandler>,
        classify_timeout: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Option<Self> {
        match TcpListener::bind(addr).await {
            Ok(listener) => Some(Self::new(listener, handler, classify_timeout, shutdown)),
            Err(e) => {
                tracing::error!(addr, error = %e, "mux listener bind failed, port disabled");
                None
            }
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(mut self) {
        let local = self.listener.local_addr().ok();
        tracing::info!(addr = ?local, "mux listener started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(addr = ?local, "mux listener shutting down");
                    return;
                }

                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "mux accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };

                    let handler = self.handler.clone();
                    let timeout = self.classify_timeout;
                    tokio::spawn(dispatch(stream, peer, handler, timeout));
                }
            }
        }
    }
}

async fn dispatch(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    timeout: Duration,
) {
    match classify(&mut stream, timeout).await {
        Classification::Probe => {
            tracing::trace!(%peer, "mux: probe session");
            handler.handle(stream, peer).await;
        }
        Classification::Decoy => {
            let echo = tokio::time::timeout(DECOY_WRITE_TIMEOUT, stream.write_all(&[DECOY_MARKER]));
            match echo.await {
                Ok(Ok(())) => tracing::debug!(%peer, "mux: decoy echoed"),
                Ok(Err(e)) => tracing::debug!(%peer, error = %e, "mux: decoy echo failed"),
                Err(_) => tracing::debug!(%peer, "mux: decoy echo timed out"),
            }
        }
        Classification::Reject(byte) => {
            tracing::debug!(%peer, byte, "mux: unexpected first byte, closing");
        }
        Classification::Broken => {
            tracing::trace!(%peer, "mux: connection broke during classification");
        }
    }
}
