//! Raw probe port wire format.
//!
//! Probe handshake: the client sends any single byte, the server answers
//! with [`ACK_BYTE`]. Decoy check: the client sends [`DECOY_MARKER`] as its
//! first byte and the server echoes it back before closing.

/// First byte that marks a liveness/decoy check on a multiplexed port.
pub const DECOY_MARKER: u8 = 0xAA;

/// Acknowledgment written back after the client's handshake byte.
pub const ACK_BYTE: u8 = 0x01;

/// Default primary (unmultiplexed) probe port.
pub const DEFAULT_PROBE_PORT: u16 = 9000;
