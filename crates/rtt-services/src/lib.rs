//! rtt-services: measurement pipeline shared by the daemon and the API.
//!
//! Leaves first: the TTL cache and measurement gate hold the only shared
//! mutable state; the Globalping orchestrator and ip-api client talk to the
//! outside world; the probe module accepts connections and ties it together.

pub mod cache;
pub mod gate;
pub mod geolocate;
pub mod globalping;
pub mod probe;

pub use cache::RecordCache;
pub use gate::MeasurementGate;
pub use geolocate::{GeoError, GeoLocation, GeoLocator, IpApiClient};
pub use globalping::{
    GlobalpingClient, LocationHint, MeasurementError, Orchestrator, PathMeasurer, PollPolicy,
};
pub use probe::{ProbeHandler, ProbeSettings};
