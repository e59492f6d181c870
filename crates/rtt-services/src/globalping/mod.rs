//! External path measurement through Globalping.
//!
//! A TCP traceroute towards this server is requested from vantage points
//! near the peer, narrowing from city to region to country until some probe
//! is available, and the job is polled until it finishes or the deadline hits.

mod api;
mod extract;
mod orchestrator;

pub use api::{
    ApiError, GlobalpingClient, Location, MeasurementApi, MeasurementRequest, MeasurementResponse,
    ProbeMeta, ProbeResult, Submission, TracerouteResult, NO_PROBES_FOUND,
};
pub use extract::median;
pub use orchestrator::{Orchestrator, PollPolicy};

use async_trait::async_trait;
use rtt_core::PathMeasurement;

/// Geographic hints for choosing vantage points. Blank hints are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationHint {
    /// ISO country code.
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

impl LocationHint {
    pub fn new(country: &str, region: &str, city: &str) -> Self {
        let keep = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        Self {
            country: keep(country),
            region: keep(region),
            city: keep(city),
        }
    }

    /// Locations to try, most specific first.
    pub fn ladder(&self) -> Vec<Location> {
        let mut rungs = Vec::with_capacity(3);
        if let Some(city) = &self.city {
            rungs.push(Location {
                city: Some(city.clone()),
                ..Default::default()
            });
        }
        if let Some(region) = &self.region {
            rungs.push(Location {
                magic: Some(region.clone()),
                ..Default::default()
            });
        }
        if let Some(country) = &self.country {
            rungs.push(Location {
                country: Some(country.clone()),
                ..Default::default()
            });
        }
        rungs
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error("globalping request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("globalping http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected globalping response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("globalping accepted the measurement without an id")]
    MissingId,
    #[error("globalping rejected the measurement: {kind}: {message}")]
    Api { kind: String, message: String },
    #[error("no probes found at any location level (city/region/country)")]
    NoProbesAnyLevel,
    #[error("measurement {0} failed")]
    JobFailed(String),
    #[error("measurement {0} finished without usable rtt values")]
    NoData(String),
    #[error("timed out waiting for measurement {0}")]
    Timeout(String),
    #[error("measurement deadline exceeded")]
    DeadlineExceeded,
}

/// Produces a path measurement for a peer's location.
#[async_trait]
pub trait PathMeasurer: Send + Sync {
    async fn measure(&self, hint: &LocationHint) -> Result<PathMeasurement, MeasurementError>;
}
