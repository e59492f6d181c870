//! RTT records: the unit of cache storage and API output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-vantage-point detail from an external path measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    /// Average RTT of the hop matching the measurement target.
    pub rtt_ms: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub asn: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub city: String,
    /// Great-circle distance from the vantage point to this server.
    pub distance_km: f64,
    /// 1-based hop number of the target on the probe's path. 0 = not located.
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub hop_count: u32,
}

/// Aggregate of one external measurement job.
///
/// These fields travel together: a record either carries a freshly produced
/// measurement or the previous record's measurement, never a mix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathMeasurement {
    /// Job id, empty when no measurement is associated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub measurement_id: String,
    /// Median RTT across responding vantage points. 0 = unavailable.
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub path_rtt_ms: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub probes: Vec<ProbeInfo>,
    /// Raw traceroute output, one entry per vantage point.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_outputs: Vec<String>,
}

impl PathMeasurement {
    pub fn is_empty(&self) -> bool {
        self.measurement_id.is_empty()
    }
}

/// Latest measurement for one peer address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RttRecord {
    /// Textual IP of the peer.
    pub address: String,
    pub kernel_rtt_us: u32,
    pub kernel_rtt_ms: f64,
    pub kernel_rttvar_us: u32,
    pub kernel_rttvar_ms: f64,
    #[serde(flatten)]
    pub path: PathMeasurement,
    /// Distance from the peer's geolocation to this server. 0 = unknown.
    pub distance_to_server_km: f64,
    pub updated_at: DateTime<Utc>,
}

impl RttRecord {
    /// Build a record from kernel microsecond readings; the millisecond
    /// views are derived here and nowhere else.
    pub fn new(
        address: impl Into<String>,
        kernel_rtt_us: u32,
        kernel_rttvar_us: u32,
        path: PathMeasurement,
        distance_to_server_km: f64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            address: address.into(),
            kernel_rtt_us,
            kernel_rtt_ms: f64::from(kernel_rtt_us) / 1000.0,
            kernel_rttvar_us,
            kernel_rttvar_ms: f64::from(kernel_rttvar_us) / 1000.0,
            path,
            distance_to_server_km,
            updated_at,
        }
    }

    /// Age of the record relative to `now`. Negative ages clamp to zero.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.updated_at).to_std().unwrap_or_default()
    }
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}
