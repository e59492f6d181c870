//! Location ladder and job polling.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use rtt_core::config::MeasurementConfig;
use rtt_core::geo::Coordinates;
use rtt_core::PathMeasurement;

use super::api::{Location, MeasurementApi, MeasurementRequest, Submission};
use super::{extract, LocationHint, MeasurementError, PathMeasurer};

/// Backoff and deadline for one measurement.
///
/// Status polls sleep `initial`, then `initial + step`, `initial + 2*step`…
/// A sleep that would end past `overall` (measured from the start of the
/// measurement) is not taken; the measurement times out instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial: Duration,
    pub step: Duration,
    pub overall: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            step: Duration::from_millis(150),
            overall: Duration::from_secs(10),
        }
    }
}

impl PollPolicy {
    pub fn from_config(config: &MeasurementConfig) -> Self {
        Self {
            initial: config.poll_initial(),
            step: config.poll_step(),
            overall: config.overall_timeout(),
        }
    }
}

/// Runs TCP traceroutes towards this server through a [`MeasurementApi`].
pub struct Orchestrator<A> {
    api: A,
    target: String,
    port: u16,
    limit: u32,
    server: Coordinates,
    policy: PollPolicy,
}

impl<A: MeasurementApi> Orchestrator<A> {
    pub fn new(api: A, target: impl Into<String>, port: u16, limit: u32, server: Coordinates) -> Self {
        Self {
            api,
            target: target.into(),
            port,
            limit,
            server,
            policy: PollPolicy::default(),
        }
    }

    pub fn from_config(api: A, config: &MeasurementConfig, server: Coordinates) -> Self {
        Self::new(api, config.target.clone(), config.port, config.probe_limit, server)
            .with_policy(PollPolicy::from_config(config))
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Ladder + poll under the overall deadline.
    pub async fn run(&self, hint: &LocationHint) -> Result<PathMeasurement, MeasurementError> {
        let deadline = Instant::now() + self.policy.overall;
        tokio::time::timeout_at(deadline, self.run_ladder(hint, deadline))
            .await
            .unwrap_or_else(|_| Err(MeasurementError::DeadlineExceeded))
    }

    async fn run_ladder(
        &self,
        hint: &LocationHint,
        deadline: Instant,
    ) -> Result<PathMeasurement, MeasurementError> {
        for location in hint.ladder() {
            match self.submit(location.clone()).await? {
                Submission::Accepted(id) => {
                    tracing::debug!(id = %id, location = ?location, "measurement submitted");
                    return self.await_result(&id, deadline).await;
                }
                Submission::Rejected(err) if err.is_no_probes() => {
                    tracing::debug!(location = ?location, "no probes at this level, widening");
                }
                Submission::Rejected(err) => {
                    return Err(MeasurementError::Api {
                        kind: err.kind,
                        message: err.message,
                    });
                }
            }
        }
        Err(MeasurementError::NoProbesAnyLevel)
    }

    async fn submit(&self, location: Location) -> Result<Submission, MeasurementError> {
        let request =
            MeasurementRequest::tcp_traceroute(&self.target, self.port, self.limit, location);
        self.api.submit(&request).await
    }

    async fn await_result(
        &self,
        id: &str,
        deadline: Instant,
    ) -> Result<PathMeasurement, MeasurementError> {
        let mut backoff = self.policy.initial;

        loop {
            let response = self.api.fetch(id).await?;
            match response.status.as_str() {
                "finished" => return extract::aggregate(id, &response.results, self.server),
                "failed" | "error" => return Err(MeasurementError::JobFailed(id.to_string())),
                status => {
                    if Instant::now() + backoff > deadline {
                        return Err(MeasurementError::Timeout(id.to_string()));
                    }
                    tracing::trace!(id, status, backoff_ms = backoff.as_millis() as u64, "measurement pending");
                    tokio::time::sleep(backoff).await;
                    backoff += self.policy.step;
                }
            }
        }
    }
}

#[async_trait]
impl<A: MeasurementApi> PathMeasurer for Orchestrator<A> {
    async fn measure(&self, hint: &LocationHint) -> Result<PathMeasurement, MeasurementError> {
        self.run(hint).await
    }
}
