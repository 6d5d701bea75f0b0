use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use ready_engine::{AsyncProbe, Introspectable, ReadinessConfig, spawned};
use ready_protocol::{FeatureId, FeatureOutcome};
use ready_proxy::{ConnectionStatus, ProxyBuilder, ReadyProxy, StaticInterfaces};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PRESENCE: FeatureId = FeatureId::new(1);
const ROSTER: FeatureId = FeatureId::new(2);
const PRESENCE_INTERFACE: &str = "org.example.Connection.Interface.Presence";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatusArg {
    Connected,
    Connecting,
    Disconnected,
}

impl From<StatusArg> for ConnectionStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Connected => ConnectionStatus::Connected,
            StatusArg::Connecting => ConnectionStatus::Connecting,
            StatusArg::Disconnected => ConnectionStatus::Disconnected,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "readyd")]
#[command(about = "Feature readiness demo daemon")]
struct Cli {
    #[arg(long, value_enum, default_value = "connected")]
    status: StatusArg,
    /// Interfaces the simulated connection reports after core introspection.
    #[arg(long = "interface", default_value = PRESENCE_INTERFACE)]
    interfaces: Vec<String>,
    #[arg(long, default_value_t = 150)]
    probe_latency_ms: u64,
    /// Feature ids whose probe fails.
    #[arg(long = "fail-feature")]
    fail_features: Vec<u32>,
    /// Status to switch to while the first probes are still running.
    #[arg(long, value_enum)]
    switch_to: Option<StatusArg>,
    #[arg(long, default_value = "/org/example/Connection/demo")]
    object_path: String,
    #[arg(long)]
    log_json: bool,
}

/// Simulated round trip: sleeps, then fails for the configured features.
struct SimulatedProbe {
    latency: Duration,
    failing: Arc<BTreeSet<FeatureId>>,
}

#[async_trait]
impl AsyncProbe for SimulatedProbe {
    async fn probe(&self, feature: FeatureId) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        if self.failing.contains(&feature) {
            bail!("simulated failure for {feature}");
        }
        Ok(())
    }
}

fn render_report(proxy: &ReadyProxy) -> Result<String> {
    serde_json::to_string(&proxy.describe())
        .with_context(|| format!("failed to serialize state of {}", proxy.object_path()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }

    let latency = Duration::from_millis(cli.probe_latency_ms);
    let failing: Arc<BTreeSet<FeatureId>> =
        Arc::new(cli.fail_features.iter().copied().map(FeatureId::new).collect());
    let simulated = || SimulatedProbe {
        latency,
        failing: Arc::clone(&failing),
    };

    let connected = ConnectionStatus::Connected.status();
    let proxy = ProxyBuilder::new("org.example.Connection.demo", cli.object_path.as_str())
        .initial_status(ConnectionStatus::from(cli.status))
        .core_statuses([ConnectionStatus::Connected, ConnectionStatus::Connecting])
        .feature(
            PRESENCE,
            Introspectable::new([connected], spawned(simulated()))
                .depends_on_features([FeatureId::CORE])
                .depends_on_interfaces([PRESENCE_INTERFACE]),
        )
        .feature(
            ROSTER,
            Introspectable::new([connected], spawned(simulated())).depends_on_features([PRESENCE]),
        )
        .interface_source(StaticInterfaces::new(cli.interfaces.iter().map(String::as_str)))
        .config(ReadinessConfig::new(cli.object_path.as_str()).status_ready_buffer(16))
        .build()?;

    let mut announcements = proxy.subscribe_status_ready();
    let announcement_task = tokio::spawn(async move {
        while let Ok(ready) = announcements.recv().await {
            let status = ConnectionStatus::from_status(ready.status)
                .map_or_else(|| ready.status.to_string(), |status| status.to_string());
            info!(
                %status,
                epoch = ready.epoch,
                satisfied = ?ready.satisfied,
                missing = ?ready.missing,
                at = %ready.emitted_at,
                "status ready"
            );
        }
    });

    let handle = proxy.become_ready([PRESENCE, ROSTER])?;
    info!(handle = %handle.id(), requested = ?handle.requested_features(), "become-ready requested");

    if let Some(next) = cli.switch_to {
        tokio::time::sleep(latency / 2).await;
        let next = ConnectionStatus::from(next);
        info!(status = %next, "remote status changed");
        proxy.set_status(next);
    }

    match tokio::time::timeout(latency * 10 + Duration::from_secs(1), handle.wait()).await {
        Ok(Ok(outcome)) => {
            for (feature, result) in &outcome.features {
                match result {
                    FeatureOutcome::Satisfied => info!(%feature, "feature ready"),
                    FeatureOutcome::Missing => warn!(%feature, "feature unavailable"),
                }
            }
            info!(
                status = %outcome.status,
                epoch = outcome.epoch,
                fully_satisfied = outcome.is_fully_satisfied(),
                "become-ready finished"
            );
        }
        Ok(Err(error)) => warn!(%error, "become-ready failed"),
        Err(_) => warn!(
            status = %proxy.status(),
            "become-ready still pending; remote status does not support the requested features"
        ),
    }

    let report = render_report(&proxy)?;
    info!(report = %report, "proxy state");

    proxy.invalidate("org.example.Error.Cancelled", "demo finished");
    drop(proxy);
    announcement_task.abort();
    Ok(())
}
