//! Folding a finished traceroute job into a `PathMeasurement`.
//!
//! One RTT sample per vantage point: the average of the positive timings of
//! the hop that reached the target. The job's RTT is the median of those
//! samples, so a single far-off probe cannot drag the figure.

use rtt_core::geo::{haversine_km, Coordinates};
use rtt_core::{PathMeasurement, ProbeInfo};

use super::api::{Hop, ProbeResult, TracerouteResult};
use super::MeasurementError;

/// Aggregate every usable probe result of job `id`.
pub fn aggregate(
    id: &str,
    results: &[ProbeResult],
    server: Coordinates,
) -> Result<PathMeasurement, MeasurementError> {
    let mut probes = Vec::with_capacity(results.len());
    let mut raw_outputs = Vec::with_capacity(results.len());

    for result in results {
        if let Some(info) = probe_info(result, server) {
            probes.push(info);
            raw_outputs.push(result.result.raw_output.clone().unwrap_or_default());
        }
    }

    let mut samples: Vec<f64> = probes.iter().map(|p| p.rtt_ms).collect();
    let path_rtt_ms = median(&mut samples).ok_or_else(|| MeasurementError::NoData(id.to_string()))?;

    Ok(PathMeasurement {
        measurement_id: id.to_string(),
        path_rtt_ms,
        probes,
        raw_outputs,
    })
}

/// Per-probe detail, or `None` if the probe produced no usable timing.
fn probe_info(result: &ProbeResult, server: Coordinates) -> Option<ProbeInfo> {
    let trace = &result.result;
    let last = trace.hops.last()?;

    let hop_count = target_hop(trace);
    let hop = hop_count
        .and_then(|n| trace.hops.get(n as usize - 1))
        .unwrap_or(last);
    let rtt_ms = average_rtt(hop)?;

    let meta = &result.probe;
    Some(ProbeInfo {
        rtt_ms,
        latitude: meta.latitude,
        longitude: meta.longitude,
        asn: meta.asn,
        network: meta.network.clone(),
        country: meta.country.clone(),
        city: meta.city.clone(),
        distance_km: haversine_km(server, Coordinates::new(meta.latitude, meta.longitude)),
        hop_count: hop_count.unwrap_or(0),
    })
}

/// 1-based hop number at which the trace reached its resolved target.
///
/// Structured hop identity first; raw output lines as a fallback for
/// results whose hops carry no address or hostname.
fn target_hop(trace: &TracerouteResult) -> Option<u32> {
    let address = non_blank(trace.resolved_address.as_deref());
    let hostname = non_blank(trace.resolved_hostname.as_deref());
    if address.is_none() && hostname.is_none() {
        return None;
    }

    let matches = |candidate: Option<&str>, wanted: Option<&str>| match (candidate, wanted) {
        (Some(c), Some(w)) => c.trim().eq_ignore_ascii_case(w),
        _ => false,
    };

    let structured = trace.hops.iter().position(|hop| {
        matches(hop.resolved_address.as_deref(), address)
            || matches(hop.resolved_hostname.as_deref(), hostname)
    });
    if let Some(index) = structured {
        return Some(index as u32 + 1);
    }

    let raw = trace.raw_output.as_deref()?;
    hop_from_raw_output(raw, address, hostname)
}

/// Scan `traceroute` text output for the first line naming the target and
/// return its leading hop number. The target must appear as a whole token,
/// so `203.0.113.7` does not match a line for `203.0.113.70`.
fn hop_from_raw_output(raw: &str, address: Option<&str>, hostname: Option<&str>) -> Option<u32> {
    let needles: Vec<&str> = [address, hostname].into_iter().flatten().collect();

    raw.lines()
        .filter(|line| {
            line.split(|c: char| c.is_whitespace() || c == '(' || c == ')')
                .filter(|token| !token.is_empty())
                .any(|token| needles.iter().any(|n| token.eq_ignore_ascii_case(n)))
        })
        .find_map(leading_hop_number)
}

/// `"  7  host (1.2.3.4)  12.3 ms"` → `Some(7)`.
fn leading_hop_number(line: &str) -> Option<u32> {
    let rest = line.trim_start();
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 || !rest[digits_end..].starts_with(char::is_whitespace) {
        return None;
    }
    rest[..digits_end].parse().ok().filter(|n| *n > 0)
}

/// Mean of the hop's positive timings.
fn average_rtt(hop: &Hop) -> Option<f64> {
    let positive: Vec<f64> = hop
        .timings
        .iter()
        .filter_map(|t| t.rtt)
        .filter(|rtt| *rtt > 0.0)
        .collect();
    if positive.is_empty() {
        return None;
    }
    Some(positive.iter().sum::<f64>() / positive.len() as f64)
}

/// Middle element after sorting; the upper middle for even lengths.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values[values.len() / 2])
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
