//! rtt-core: shared record types, wire constants, configuration and distance math.
//! All other rttd crates depend on this one.

pub mod config;
pub mod geo;
pub mod record;
pub mod wire;

pub use record::{PathMeasurement, ProbeInfo, RttRecord};
