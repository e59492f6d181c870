//! rttd: passive RTT measurement daemon.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use rtt_core::config::RttConfig;
use rtt_services::probe::{ConnectionHandler, MuxListener, ProbeListener};
use rtt_services::{
    GeoLocator, GlobalpingClient, IpApiClient, MeasurementGate, Orchestrator, PathMeasurer,
    ProbeHandler, ProbeSettings, RecordCache,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load config
    if let Err(e) = RttConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = RttConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        let mut config = RttConfig::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    });

    tracing::info!(
        probe_addr = %config.listen.probe_addr,
        mux_addrs = ?config.listen.mux_addrs,
        api_addr = %config.listen.api_addr,
        target = %config.measurement.target,
        "rttd starting"
    );

    // Shared state
    let cache = RecordCache::new(config.cache.ttl());
    let gate = MeasurementGate::new();

    // External clients
    let globalping = GlobalpingClient::new(
        config.measurement.api_base.clone(),
        config.measurement.token.clone(),
        config.measurement.request_timeout(),
    )
    .context("failed to build Globalping client")?;
    if config.measurement.token.is_none() {
        tracing::info!("no Globalping token configured, using anonymous quota");
    }
    let measurer: Arc<dyn PathMeasurer> = Arc::new(Orchestrator::from_config(
        globalping,
        &config.measurement,
        config.server.coordinates(),
    ));
    let locator: Arc<dyn GeoLocator> = Arc::new(
        IpApiClient::new(config.geolocation.api_base.clone(), config.geolocation.timeout())
            .context("failed to build geolocation client")?,
    );

    let handler: Arc<dyn ConnectionHandler> = Arc::new(ProbeHandler::new(
        cache.clone(),
        gate.clone(),
        measurer,
        locator,
        ProbeSettings::from_config(&config),
    ));

    // ── Shutdown channel ─────────────────────────────────────────────────────

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let primary = TcpListener::bind(&config.listen.probe_addr)
        .await
        .with_context(|| format!("failed to bind probe listener on {}", config.listen.probe_addr))?;

    let sweeper_task = tokio::spawn(
        cache
            .clone()
            .run_sweeper(config.cache.sweep_interval(), shutdown_tx.subscribe()),
    );

    for addr in &config.listen.mux_addrs {
        let mux = MuxListener::bind(
            addr,
            handler.clone(),
            config.listen.classify_timeout(),
            shutdown_tx.subscribe(),
        )
        .await;
        if let Some(mux) = mux {
            tokio::spawn(mux.run());
        }
    }

    let primary_task =
        tokio::spawn(ProbeListener::new(primary, handler, shutdown_tx.subscribe()).run());

    let api_task = {
        let state = rtt_api::ApiState::new(cache, gate);
        let addr = config.listen.api_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = rtt_api::serve(state, &addr).await {
                tracing::error!(error = %e, "API server failed");
                return Err(e);
            }
            Ok(())
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    wait_for_exit(shutdown_tx.subscribe(), primary_task, sweeper_task, api_task).await
}

/// Resolve on shutdown, or fail as soon as any long-lived task ends first.
async fn wait_for_exit(
    mut shutdown: broadcast::Receiver<()>,
    primary_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
    api_task: JoinHandle<Result<()>>,
) -> Result<()> {
    tokio::select! {
        _ = shutdown.recv() => {
            tracing::info!("shutting down");
            Ok(())
        }
        r = primary_task => bail!("probe listener exited: {:?}", r),
        r = sweeper_task => bail!("cache sweeper exited: {:?}", r),
        r = api_task     => bail!("API server exited: {:?}", r),
    }
}
