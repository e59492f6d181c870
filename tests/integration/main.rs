//! rttd integration test harness.
//!
//! Runs the probe listeners, the read API and the real HTTP clients
//! in-process over loopback. Globalping and ip-api are replaced by small
//! axum servers, so the tests need no network access and no privileges.
//!
//!   cargo test --test integration

mod api;
mod probe;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use rtt_core::config::RttConfig;
use rtt_core::RttRecord;
use rtt_services::probe::{ConnectionHandler, MuxListener, ProbeListener};
use rtt_services::{
    GlobalpingClient, IpApiClient, MeasurementGate, Orchestrator, ProbeHandler, ProbeSettings,
    RecordCache,
};

/// Traceroute target the fake Globalping reports as reached.
pub const TARGET: &str = "203.0.113.9";

/// Classification timeout on the test mux port.
pub const CLASSIFY: Duration = Duration::from_millis(150);

// ── Fake upstreams ────────────────────────────────────────────────────────────

/// Globalping stand-in: no probes in any city, probes in every region.
/// The first status poll reports in-progress, later ones finished.
#[derive(Clone, Default)]
pub struct FakeGlobalping {
    pub submissions: Arc<Mutex<Vec<Value>>>,
    polls: Arc<Mutex<usize>>,
}

impl FakeGlobalping {
    pub fn submissions(&self) -> Vec<Value> {
        self.submissions.lock().unwrap().clone()
    }
}

async fn globalping_submit(
    State(gp): State<FakeGlobalping>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let city = body["locations"][0].get("city").is_some();
    gp.submissions.lock().unwrap().push(body);
    if city {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": {"type": "no_probes_found", "message": "No suitable probes found."}})),
        );
    }
    (StatusCode::ACCEPTED, Json(json!({"id": "it-1", "probesCount": 2})))
}

async fn globalping_fetch(State(gp): State<FakeGlobalping>, Path(id): Path<String>) -> Json<Value> {
    let polls = {
        let mut polls = gp.polls.lock().unwrap();
        *polls += 1;
        *polls
    };
    if polls == 1 {
        return Json(json!({"id": id, "status": "in-progress", "results": []}));
    }
    Json(json!({
        "id": id,
        "status": "finished",
        "results": [
            traceroute_result("Frankfurt", 50.11, 8.68, 30.0),
            traceroute_result("Paris", 48.85, 2.35, 40.0),
        ],
    }))
}

fn traceroute_result(city: &str, latitude: f64, longitude: f64, rtt: f64) -> Value {
    json!({
        "probe": {
            "country": "DE",
            "city": city,
            "asn": 3320,
            "network": "Example Transit",
            "latitude": latitude,
            "longitude": longitude,
        },
        "result": {
            "status": "finished",
            "rawOutput": format!("traceroute to {TARGET}\n 1  10.0.0.1  1.0 ms\n 2  {TARGET}  {rtt} ms\n"),
            "resolvedAddress": TARGET,
            "hops": [
                {"resolvedAddress": "10.0.0.1", "timings": [{"rtt": 1.0}]},
                {"resolvedAddress": TARGET, "timings": [{"rtt": rtt}, {"rtt": null}, {"rtt": rtt}]},
            ],
        },
    })
}

/// ip-api stand-in: every address is in Frankfurt.
async fn ip_api_lookup(Path(ip): Path<String>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "query": ip,
        "country": "Germany",
        "countryCode": "DE",
        "regionName": "Hesse",
        "city": "Frankfurt am Main",
        "lat": 50.11,
        "lon": 8.68,
    }))
}

async fn serve_router(router: Router) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}

// ── Daemon stack ──────────────────────────────────────────────────────────────

/// The daemon's components wired together on ephemeral loopback ports.
pub struct Stack {
    pub probe_addr: SocketAddr,
    pub mux_addr: SocketAddr,
    pub api_addr: SocketAddr,
    pub cache: RecordCache,
    pub globalping: FakeGlobalping,
    shutdown: broadcast::Sender<()>,
}

impl Stack {
    pub async fn start() -> Result<Self> {
        let globalping = FakeGlobalping::default();
        let gp_addr = serve_router(
            Router::new()
                .route("/v1/measurements", post(globalping_submit))
                .route("/v1/measurements/{id}", get(globalping_fetch))
                .with_state(globalping.clone()),
        )
        .await?;
        let ip_api_addr = serve_router(Router::new().route("/json/{ip}", get(ip_api_lookup))).await?;

        let mut config = RttConfig::default();
        config.measurement.api_base = format!("http://{gp_addr}/v1");
        config.measurement.target = TARGET.to_string();
        config.measurement.poll_initial_ms = 20;
        config.measurement.poll_step_ms = 10;
        config.geolocation.api_base = format!("http://{ip_api_addr}");

        let cache = RecordCache::new(config.cache.ttl());
        let gate = MeasurementGate::new();

        let client = GlobalpingClient::new(
            config.measurement.api_base.clone(),
            None,
            config.measurement.request_timeout(),
        )?;
        let orchestrator =
            Orchestrator::from_config(client, &config.measurement, config.server.coordinates());
        let locator = IpApiClient::new(config.geolocation.api_base.clone(), config.geolocation.timeout())?;
        let handler: Arc<dyn ConnectionHandler> = Arc::new(ProbeHandler::new(
            cache.clone(),
            gate.clone(),
            Arc::new(orchestrator),
            Arc::new(locator),
            ProbeSettings::from_config(&config),
        ));

        let (shutdown, _) = broadcast::channel(1);

        let primary = TcpListener::bind("127.0.0.1:0").await?;
        let probe_addr = primary.local_addr()?;
        tokio::spawn(ProbeListener::new(primary, handler.clone(), shutdown.subscribe()).run());

        let mux = MuxListener::bind("127.0.0.1:0", handler, CLASSIFY, shutdown.subscribe())
            .await
            .context("mux bind failed")?;
        let mux_addr = mux.local_addr()?;
        tokio::spawn(mux.run());

        let api_addr = serve_router(rtt_api::router(rtt_api::ApiState::new(cache.clone(), gate))).await?;

        Ok(Self {
            probe_addr,
            mux_addr,
            api_addr,
            cache,
            globalping,
            shutdown,
        })
    }

    /// Wait until a record for `address` shows up in the cache.
    pub async fn wait_for_record(&self, address: &str, timeout: Duration) -> Result<RttRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(record) = self.cache.get(address) {
                return Ok(record);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("no record for {address} after {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// GET an API path; returns status and body.
    pub async fn api_get(&self, path: &str) -> Result<(u16, String)> {
        let resp = reqwest::get(format!("http://{}/api{}", self.api_addr, path)).await?;
        let status = resp.status().as_u16();
        Ok((status, resp.text().await?))
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

// ── Client helpers ────────────────────────────────────────────────────────────

/// Probe client: send one byte, return the server's answer.
pub async fn probe_handshake(addr: SocketAddr) -> Result<u8> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&[0x07]).await?;
    let mut ack = [0u8; 1];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut ack))
        .await
        .context("no handshake ack")??;
    Ok(ack[0])
}

/// Send `first` and collect everything the server writes until it closes.
pub async fn send_and_drain(addr: SocketAddr, first: u8) -> Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&[first]).await?;
    let mut reply = Vec::new();
    match tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply)).await {
        Ok(Ok(_)) => {}
        // A reset after close is fine; the reply so far is what counts.
        Ok(Err(_)) => {}
        Err(_) => bail!("server did not close the connection"),
    }
    Ok(reply)
}
