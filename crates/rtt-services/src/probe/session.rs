//! Probe session: handshake, kernel RTT capture, measurement, record write.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use rtt_core::geo::{haversine_km, Coordinates};
use rtt_core::wire::ACK_BYTE;
use rtt_core::{PathMeasurement, RttRecord};

use super::tcp_info::{kernel_rtt, KernelRtt, RttError};
use super::{ConnectionHandler, ProbeSettings};
use crate::cache::RecordCache;
use crate::gate::MeasurementGate;
use crate::geolocate::{GeoLocation, GeoLocator};
use crate::globalping::{LocationHint, PathMeasurer};

/// Runs probe sessions. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ProbeHandler {
    cache: RecordCache,
    gate: MeasurementGate,
    measurer: Arc<dyn PathMeasurer>,
    locator: Arc<dyn GeoLocator>,
    settings: ProbeSettings,
}

impl ProbeHandler {
    pub fn new(
        cache: RecordCache,
        gate: MeasurementGate,
        measurer: Arc<dyn PathMeasurer>,
        locator: Arc<dyn GeoLocator>,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            cache,
            gate,
            measurer,
            locator,
            settings,
        }
    }

    /// Run one session to completion. Returns the record written, if any.
    pub async fn session(&self, mut stream: TcpStream, peer: SocketAddr) -> Option<RttRecord> {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "set_nodelay failed");
        }

        self.handshake(&mut stream, peer).await;

        let rtt = match self.sample_kernel_rtt(&stream).await {
            Ok(rtt) if !rtt.is_zero() => rtt,
            Ok(_) => {
                tracing::debug!(%peer, "no kernel rtt estimate, dropping session");
                return None;
            }
            Err(e) => {
                tracing::debug!(%peer, error = %e, "kernel rtt unavailable, dropping session");
                return None;
            }
        };
        // The socket has served its purpose.
        drop(stream);

        let address = peer.ip().to_canonical().to_string();

        let location = match self.locator.locate(&address).await {
            Ok(loc) => Some(loc),
            Err(e) => {
                tracing::debug!(%address, error = %e, "geolocation failed");
                None
            }
        };

        let previous = self.cache.get(&address);

        let fresh = if self.gate.allow(&address, self.settings.cooldown) {
            let hint = location.as_ref().map(GeoLocation::hint).unwrap_or_default();
            self.measure(&address, &hint).await
        } else {
            tracing::debug!(%address, "measurement in cooldown, reusing previous result");
            None
        };

        let record = merge_record(
            &address,
            rtt,
            fresh,
            previous.as_ref(),
            location.as_ref(),
            self.settings.server,
            Utc::now(),
        );
        self.cache.set(record.clone());

        tracing::info!(
            %address,
            rtt_ms = record.kernel_rtt_ms,
            rttvar_ms = record.kernel_rttvar_ms,
            path_rtt_ms = record.path.path_rtt_ms,
            "recorded rtt"
        );
        Some(record)
    }

    /// Read the client's byte and answer with the ack, all under the I/O
    /// deadline. Failures are tolerated; the kernel may still have an RTT.
    async fn handshake(&self, stream: &mut TcpStream, peer: SocketAddr) {
        let exchange = async {
            let mut buf = [0u8; 1];
            if let Err(e) = stream.read(&mut buf).await {
                tracing::trace!(%peer, error = %e, "handshake read failed");
            }
            stream.write_all(&[ACK_BYTE]).await
        };

        match tokio::time::timeout(self.settings.io_timeout, exchange).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(%peer, error = %e, "handshake ack failed"),
            Err(_) => tracing::debug!(%peer, "handshake timed out"),
        }
    }

    /// Poll until the kernel reports a nonzero estimate or the poll deadline
    /// passes. The last sample (or error) is returned either way.
    async fn sample_kernel_rtt(&self, stream: &TcpStream) -> Result<KernelRtt, RttError> {
        let deadline = Instant::now() + self.settings.rtt_poll_deadline;
        loop {
            let sample = kernel_rtt(stream);
            if matches!(&sample, Ok(rtt) if !rtt.is_zero()) || Instant::now() >= deadline {
                return sample;
            }
            tokio::time::sleep(self.settings.rtt_poll_interval).await;
        }
    }

    async fn measure(&self, address: &str, hint: &LocationHint) -> Option<PathMeasurement> {
        match self.measurer.measure(hint).await {
            Ok(path) => {
                tracing::debug!(
                    address,
                    id = %path.measurement_id,
                    path_rtt_ms = path.path_rtt_ms,
                    probes = path.probes.len(),
                    "path measurement finished"
                );
                Some(path)
            }
            Err(e) => {
                tracing::warn!(address, error = %e, "path measurement failed");
                None
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for ProbeHandler {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        self.session(stream, peer).await;
    }
}

/// Build the record to store for `address`.
///
/// The path measurement is the fresh one if there is one, otherwise the
/// previous record's, otherwise empty. Kernel figures and the timestamp are
/// always new.
pub fn merge_record(
    address: &str,
    rtt: KernelRtt,
    fresh: Option<PathMeasurement>,
    previous: Option<&RttRecord>,
    location: Option<&GeoLocation>,
    server: Coordinates,
    now: DateTime<Utc>,
) -> RttRecord {
    let path = fresh
        .or_else(|| previous.map(|prev| prev.path.clone()))
        .unwrap_or_default();
    let distance = location
        .map(|loc| haversine_km(loc.coordinates(), server))
        .unwrap_or(0.0);
    RttRecord::new(address, rtt.rtt_us, rtt.rttvar_us, path, distance, now)
}
