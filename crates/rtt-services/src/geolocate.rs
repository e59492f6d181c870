//! Reverse geolocation via ip-api.com.
//!
//! Best-effort: the probe session treats any failure here as "location
//! unknown" and still records the kernel RTT.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use rtt_core::geo::Coordinates;

use crate::globalping::LocationHint;

/// Where a peer address resolves to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoLocation {
    pub country: String,
    /// ISO 3166-1 alpha-2 code.
    pub country_code: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoLocation {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// Location hints for the measurement ladder. Blank fields are dropped.
    pub fn hint(&self) -> LocationHint {
        LocationHint::new(&self.country_code, &self.region, &self.city)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("geolocation request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("geolocation http status {0}")]
    Status(u16),
    #[error("geolocation lookup failed: {0}")]
    Lookup(String),
}

/// Resolves a peer address to a location.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, address: &str) -> Result<GeoLocation, GeoError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
}

const IP_API_FIELDS: &str = "status,message,country,countryCode,regionName,city,lat,lon";

/// ip-api.com JSON endpoint client.
#[derive(Clone)]
pub struct IpApiClient {
    http: reqwest::Client,
    base: String,
}

impl IpApiClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, GeoError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn lookup_url(&self, address: &str) -> String {
        format!("{}/json/{}?fields={}", self.base, address, IP_API_FIELDS)
    }
}

#[async_trait]
impl GeoLocator for IpApiClient {
    async fn locate(&self, address: &str) -> Result<GeoLocation, GeoError> {
        let resp = self.http.get(self.lookup_url(address)).send().await?;
        if !resp.status().is_success() {
            return Err(GeoError::Status(resp.status().as_u16()));
        }
        let body: IpApiResponse = resp.json().await?;
        into_location(body)
    }
}

fn into_location(body: IpApiResponse) -> Result<GeoLocation, GeoError> {
    if body.status != "success" {
        let message = if body.message.is_empty() {
            "failed".to_string()
        } else {
            body.message
        };
        return Err(GeoError::Lookup(message));
    }
    Ok(GeoLocation {
        country: body.country,
        country_code: body.country_code,
        region: body.region_name,
        city: body.city,
        latitude: body.lat,
        longitude: body.lon,
    })
}
