//! Globalping REST API: wire types and HTTP client.
//!
//!   POST {base}/measurements        → 202 {"id": ...} or 4xx {"error": {"type", "message"}}
//!   GET  {base}/measurements/{id}   → {"status": ..., "results": [...]}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};

use super::MeasurementError;

/// Error type Globalping returns when no probe matches the location.
pub const NO_PROBES_FOUND: &str = "no_probes_found";

// ── Request ───────────────────────────────────────────────────────────────────

/// One location constraint. Exactly one field is set per ladder rung.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Free-form match; Globalping resolves region names through it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasurementOptions {
    pub protocol: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    pub limit: u32,
    pub measurement_options: MeasurementOptions,
}

impl MeasurementRequest {
    /// TCP traceroute towards `target:port` from up to `limit` probes at `location`.
    pub fn tcp_traceroute(target: &str, port: u16, limit: u32, location: Location) -> Self {
        Self {
            kind: "traceroute".to_string(),
            target: target.to_string(),
            locations: vec![location],
            limit,
            measurement_options: MeasurementOptions {
                protocol: "TCP".to_string(),
                port,
            },
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

/// Typed error body returned by Globalping on rejected submissions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

impl ApiError {
    pub fn is_no_probes(&self) -> bool {
        self.kind == NO_PROBES_FOUND
    }
}

/// Outcome of a submission the API understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Accepted(String),
    Rejected(ApiError),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeasurementResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub results: Vec<ProbeResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeResult {
    #[serde(default)]
    pub probe: ProbeMeta,
    #[serde(default)]
    pub result: TracerouteResult,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeMeta {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub asn: u32,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracerouteResult {
    #[serde(default)]
    pub raw_output: Option<String>,
    #[serde(default)]
    pub resolved_address: Option<String>,
    #[serde(default)]
    pub resolved_hostname: Option<String>,
    #[serde(default)]
    pub hops: Vec<Hop>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    #[serde(default)]
    pub resolved_address: Option<String>,
    #[serde(default)]
    pub resolved_hostname: Option<String>,
    #[serde(default)]
    pub timings: Vec<Timing>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Timing {
    /// Null when the probe packet was lost.
    #[serde(default)]
    pub rtt: Option<f64>,
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// The two calls the orchestrator needs. Transport errors are returned
/// as-is; retrying is the orchestrator's business.
#[async_trait]
pub trait MeasurementApi: Send + Sync {
    async fn submit(&self, request: &MeasurementRequest) -> Result<Submission, MeasurementError>;
    async fn fetch(&self, id: &str) -> Result<MeasurementResponse, MeasurementError>;
}

/// reqwest-backed Globalping client.
#[derive(Clone)]
pub struct GlobalpingClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl GlobalpingClient {
    /// `request_timeout` bounds every individual HTTP call.
    pub fn new(
        base: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, MeasurementError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("rttd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl MeasurementApi for GlobalpingClient {
    async fn submit(&self, request: &MeasurementRequest) -> Result<Submission, MeasurementError> {
        let url = format!("{}/measurements", self.base);
        let req = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(request);
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        parse_submission(status.as_u16(), &body)
    }

    async fn fetch(&self, id: &str) -> Result<MeasurementResponse, MeasurementError> {
        let url = format!("{}/measurements/{}", self.base, id);
        let req = self.http.get(&url).header(ACCEPT, "application/json");
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(MeasurementError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

fn parse_submission(status: u16, body: &str) -> Result<Submission, MeasurementError> {
    if (200..300).contains(&status) {
        let created: CreatedResponse = serde_json::from_str(body)?;
        if created.id.is_empty() {
            return Err(MeasurementError::MissingId);
        }
        return Ok(Submission::Accepted(created.id));
    }
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.kind.is_empty() => Ok(Submission::Rejected(envelope.error)),
        _ => Err(MeasurementError::Status {
            status,
            body: body.to_string(),
        }),
    }
}
