//! Configuration system for rttd.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RTTD_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/rttd/config.toml
//!   3. ~/.config/rttd/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::geo::Coordinates;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RttConfig {
    pub listen: ListenConfig,
    pub server: ServerConfig,
    pub probe: ProbeConfig,
    pub measurement: MeasurementConfig,
    pub geolocation: GeolocationConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Primary probe listener. Failing to bind it is fatal.
    pub probe_addr: String,
    /// Multiplexed decoy/probe listeners. A bind failure disables only that port.
    pub mux_addrs: Vec<String>,
    /// Read API listener.
    pub api_addr: String,
    /// How long a multiplexed connection may stay silent before it is
    /// treated as a probe session.
    pub classify_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Fixed coordinates of this server, used for distance calculations.
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Overall deadline for the one-byte handshake.
    pub io_timeout_ms: u64,
    /// Interval between kernel RTT reads.
    pub rtt_poll_interval_ms: u64,
    /// Give up waiting for a kernel RTT estimate after this long.
    pub rtt_poll_deadline_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    /// Globalping API base URL, without trailing slash.
    pub api_base: String,
    /// Optional Globalping API token (raises the per-caller quota).
    pub token: Option<String>,
    /// Public address of this server, used as the traceroute target.
    pub target: String,
    /// TCP port probed by the traceroute.
    pub port: u16,
    /// Vantage points requested per measurement.
    pub probe_limit: u32,
    /// Timeout for each individual HTTP call.
    pub request_timeout_ms: u64,
    /// Deadline for a whole measurement, ladder and polling included.
    pub overall_timeout_ms: u64,
    /// First status-poll backoff.
    pub poll_initial_ms: u64,
    /// Backoff increment per retry.
    pub poll_step_ms: u64,
    /// Minimum interval between measurements triggered for the same address.
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    /// ip-api base URL, without trailing slash.
    pub api_base: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Records older than this are never served.
    pub ttl_secs: u64,
    /// Interval of the physical eviction sweep.
    pub sweep_interval_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            probe_addr: "0.0.0.0:9000".to_string(),
            mux_addrs: ["0.0.0.0:8443", "0.0.0.0:8080", "0.0.0.0:853", "0.0.0.0:5432"]
                .into_iter()
                .map(String::from)
                .collect(),
            api_addr: "0.0.0.0:9080".to_string(),
            classify_timeout_ms: 2_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            latitude: 36.102,
            longitude: -115.1447,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 3_000,
            rtt_poll_interval_ms: 20,
            rtt_poll_deadline_ms: 200,
        }
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.globalping.io/v1".to_string(),
            token: None,
            target: "45.61.141.20".to_string(),
            port: crate::wire::DEFAULT_PROBE_PORT,
            probe_limit: 3,
            request_timeout_ms: 5_000,
            overall_timeout_ms: 10_000,
            poll_initial_ms: 200,
            poll_step_ms: 150,
            cooldown_secs: 600,
        }
    }
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            api_base: "http://ip-api.com".to_string(),
            timeout_ms: 3_000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3_600,
            sweep_interval_secs: 300,
        }
    }
}

// ── Duration views ────────────────────────────────────────────────────────────

impl ListenConfig {
    pub fn classify_timeout(&self) -> Duration {
        Duration::from_millis(self.classify_timeout_ms)
    }
}

impl ServerConfig {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

impl ProbeConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn rtt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.rtt_poll_interval_ms)
    }

    pub fn rtt_poll_deadline(&self) -> Duration {
        Duration::from_millis(self.rtt_poll_deadline_ms)
    }
}

impl MeasurementConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn poll_initial(&self) -> Duration {
        Duration::from_millis(self.poll_initial_ms)
    }

    pub fn poll_step(&self) -> Duration {
        Duration::from_millis(self.poll_step_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl GeolocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("rttd")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RttConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a config file, falling back to defaults if it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(RttConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RTTD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RttConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply RTTD_* overrides. `lookup` abstracts the environment so tests
    /// don't have to mutate process state.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RTTD_LISTEN__PROBE_ADDR") {
            self.listen.probe_addr = v;
        }
        if let Some(v) = lookup("RTTD_LISTEN__MUX_ADDRS") {
            self.listen.mux_addrs = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("RTTD_LISTEN__API_ADDR") {
            self.listen.api_addr = v;
        }
        if let Some(v) = lookup("RTTD_SERVER__LATITUDE") {
            if let Ok(lat) = v.parse() {
                self.server.latitude = lat;
            }
        }
        if let Some(v) = lookup("RTTD_SERVER__LONGITUDE") {
            if let Ok(lon) = v.parse() {
                self.server.longitude = lon;
            }
        }
        if let Some(v) = lookup("RTTD_MEASUREMENT__TARGET") {
            self.measurement.target = v;
        }
        if let Some(v) = lookup("RTTD_MEASUREMENT__PORT") {
            if let Ok(p) = v.parse() {
                self.measurement.port = p;
            }
        }
        if let Some(v) = lookup("RTTD_MEASUREMENT__TOKEN") {
            self.measurement.token = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = lookup("RTTD_MEASUREMENT__API_BASE") {
            self.measurement.api_base = v;
        }
        if let Some(v) = lookup("RTTD_GEOLOCATION__API_BASE") {
            self.geolocation.api_base = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_matches_deployment() {
        let config = RttConfig::default();
        assert_eq!(config.listen.probe_addr, "0.0.0.0:9000");
        assert_eq!(config.listen.mux_addrs.len(), 4);
        assert_eq!(config.listen.classify_timeout(), Duration::from_secs(2));
        assert_eq!(config.probe.rtt_poll_deadline(), Duration::from_millis(200));
        assert_eq!(config.measurement.cooldown(), Duration::from_secs(600));
        assert_eq!(config.measurement.overall_timeout(), Duration::from_secs(10));
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.cache.sweep_interval(), Duration::from_secs(300));
        assert!(config.measurement.token.is_none());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("RTTD_LISTEN__PROBE_ADDR", "127.0.0.1:19000"),
            ("RTTD_LISTEN__MUX_ADDRS", "127.0.0.1:18443, 127.0.0.1:18080,"),
            ("RTTD_SERVER__LATITUDE", "51.5"),
            ("RTTD_SERVER__LONGITUDE", "not-a-number"),
            ("RTTD_MEASUREMENT__TOKEN", "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = RttConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.listen.probe_addr, "127.0.0.1:19000");
        assert_eq!(
            config.listen.mux_addrs,
            vec!["127.0.0.1:18443".to_string(), "127.0.0.1:18080".to_string()]
        );
        assert_eq!(config.server.latitude, 51.5);
        // Unparseable values leave the default in place.
        assert_eq!(config.server.longitude, -115.1447);
        assert_eq!(config.measurement.token.as_deref(), Some("secret"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let text = r#"
            [cache]
            ttl_secs = 60

            [measurement]
            target = "203.0.113.7"
        "#;
        let config: RttConfig = toml::from_str(text).unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.sweep_interval_secs, 300);
        assert_eq!(config.measurement.target, "203.0.113.7");
        assert_eq!(config.measurement.probe_limit, 3);
    }

    #[test]
    fn load_from_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("rttd-missing-{}.toml", std::process::id()));
        let config = RttConfig::load_from(&path).unwrap();
        assert_eq!(config.listen.api_addr, "0.0.0.0:9080");
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir().join(format!("rttd-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        std::env::set_var("RTTD_CONFIG", config_path.to_str().unwrap());

        let path = RttConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = RttConfig::load_from(&path).expect("load should succeed");
        assert_eq!(config.measurement.port, 9000);

        std::env::remove_var("RTTD_CONFIG");
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let path = std::env::temp_dir().join(format!("rttd-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[cache\nttl_secs = ").unwrap();
        let err = RttConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed(..)));
        let _ = std::fs::remove_file(&path);
    }
}
