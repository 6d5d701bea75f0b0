//! # ready-proxy — remote-object proxies driven by the readiness engine
//!
//! A [`ReadyProxy`] names one remote object (bus name + object path) and owns
//! the [`ReadinessHelper`] that brings its features to a decided state. The
//! builder installs the core probe, which discovers the object's interfaces
//! through an [`InterfaceSource`] before any dependent feature is considered.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use ready_engine::{
    FeatureRegistry, Introspectable, PendingReady, Probe, ProbeContext, ReadinessConfig,
    ReadinessHelper, ReadinessSnapshot,
};
use ready_events::StatusReadyHub;
use ready_protocol::{
    BusName, FeatureId, InterfaceName, ObjectPath, ReadinessResult, Status, StatusReady,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Answers which interfaces a remote object implements.
#[async_trait]
pub trait InterfaceSource: Send + Sync + 'static {
    async fn interfaces(
        &self,
        bus_name: &BusName,
        object_path: &ObjectPath,
    ) -> Result<Vec<InterfaceName>>;
}

/// Interface source returning a fixed list for every object.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    interfaces: Vec<InterfaceName>,
}

impl StaticInterfaces {
    pub fn new<I, N>(interfaces: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<InterfaceName>,
    {
        Self {
            interfaces: interfaces.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl InterfaceSource for StaticInterfaces {
    async fn interfaces(&self, _: &BusName, _: &ObjectPath) -> Result<Vec<InterfaceName>> {
        Ok(self.interfaces.clone())
    }
}

/// Status of a connection object, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl ConnectionStatus {
    pub const ALL: [ConnectionStatus; 3] = [
        ConnectionStatus::Connected,
        ConnectionStatus::Connecting,
        ConnectionStatus::Disconnected,
    ];

    pub const fn status(self) -> Status {
        match self {
            ConnectionStatus::Connected => Status::new(0),
            ConnectionStatus::Connecting => Status::new(1),
            ConnectionStatus::Disconnected => Status::new(2),
        }
    }

    pub fn from_status(status: Status) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.status() == status)
    }
}

impl From<ConnectionStatus> for Status {
    fn from(value: ConnectionStatus) -> Self {
        value.status()
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Core probe: asks the interface source, publishes what it found, then reports.
struct CoreProbe {
    bus_name: BusName,
    object_path: ObjectPath,
    source: Arc<dyn InterfaceSource>,
}

impl Probe for CoreProbe {
    fn introspect(&self, ctx: ProbeContext) {
        let bus_name = self.bus_name.clone();
        let object_path = self.object_path.clone();
        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            let success = match source.interfaces(&bus_name, &object_path).await {
                Ok(interfaces) => {
                    debug!(%object_path, count = interfaces.len(), "interfaces discovered");
                    ctx.set_interfaces(interfaces);
                    true
                }
                Err(error) => {
                    warn!(%object_path, error = %format!("{error:#}"), "interface lookup failed");
                    false
                }
            };
            if let Err(error) = ctx.complete(success) {
                debug!(%object_path, %error, "core probe report rejected");
            }
        });
    }
}

pub struct ProxyBuilder {
    bus_name: BusName,
    object_path: ObjectPath,
    initial_status: Status,
    core_statuses: BTreeSet<Status>,
    features: Vec<(FeatureId, Introspectable)>,
    interface_source: Arc<dyn InterfaceSource>,
    config: Option<ReadinessConfig>,
}

impl ProxyBuilder {
    /// Start a proxy for `object_path` on `bus_name`. Defaults to a single
    /// status `0`, in which core is meaningful, and no interfaces.
    pub fn new(bus_name: impl Into<BusName>, object_path: impl Into<ObjectPath>) -> Self {
        Self {
            bus_name: bus_name.into(),
            object_path: object_path.into(),
            initial_status: Status::new(0),
            core_statuses: BTreeSet::from([Status::new(0)]),
            features: Vec::new(),
            interface_source: Arc::new(StaticInterfaces::default()),
            config: None,
        }
    }

    pub fn initial_status(mut self, status: impl Into<Status>) -> Self {
        self.initial_status = status.into();
        self
    }

    /// Statuses in which the core feature is probed.
    pub fn core_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Status>,
    {
        self.core_statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    pub fn feature(mut self, feature: impl Into<FeatureId>, introspectable: Introspectable) -> Self {
        self.features.push((feature.into(), introspectable));
        self
    }

    pub fn interface_source(mut self, source: impl InterfaceSource) -> Self {
        self.interface_source = Arc::new(source);
        self
    }

    pub fn config(mut self, config: ReadinessConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the proxy and start core introspection. Must run inside a tokio runtime.
    pub fn build(self) -> Result<ReadyProxy> {
        if let Some((feature, _)) = self.features.iter().find(|(feature, _)| feature.is_core()) {
            bail!("{feature} is installed by the proxy and cannot be registered");
        }

        let core = Introspectable::new(
            self.core_statuses,
            CoreProbe {
                bus_name: self.bus_name.clone(),
                object_path: self.object_path.clone(),
                source: self.interface_source,
            },
        );
        let registry = FeatureRegistry::new(
            std::iter::once((FeatureId::CORE, core)).chain(self.features),
        )
        .with_context(|| format!("invalid feature registry for {}", self.object_path))?;

        let config = self
            .config
            .unwrap_or_else(|| ReadinessConfig::new(self.object_path.as_str()));
        let helper = ReadinessHelper::with_config(self.initial_status, registry, config);
        info!(
            bus_name = %self.bus_name,
            object_path = %self.object_path,
            status = %self.initial_status,
            "proxy created"
        );

        Ok(ReadyProxy {
            bus_name: self.bus_name,
            object_path: self.object_path,
            helper,
        })
    }
}

/// Client-side handle on one remote object.
#[derive(Clone)]
pub struct ReadyProxy {
    bus_name: BusName,
    object_path: ObjectPath,
    helper: ReadinessHelper,
}

impl ReadyProxy {
    pub fn bus_name(&self) -> &BusName {
        &self.bus_name
    }

    pub fn object_path(&self) -> &ObjectPath {
        &self.object_path
    }

    pub fn status(&self) -> Status {
        self.helper.current_status()
    }

    pub fn set_status(&self, status: impl Into<Status>) {
        self.helper.set_status(status.into());
    }

    #[instrument(skip(self, features), fields(object_path = %self.object_path))]
    pub fn become_ready<I, F>(&self, features: I) -> ReadinessResult<PendingReady>
    where
        I: IntoIterator<Item = F>,
        F: Into<FeatureId>,
    {
        self.helper.become_ready(features)
    }

    pub fn is_ready<I, F>(&self, features: I) -> bool
    where
        I: IntoIterator<Item = F>,
        F: Into<FeatureId>,
    {
        self.helper.is_ready(features)
    }

    pub fn interfaces(&self) -> BTreeSet<InterfaceName> {
        self.helper.interfaces()
    }

    pub fn has_interface(&self, interface: impl Into<InterfaceName>) -> bool {
        self.helper.has_interface(&interface.into())
    }

    /// The remote object went away; see [`ReadinessHelper::invalidate`].
    pub fn invalidate(&self, error_name: impl Into<String>, message: impl Into<String>) {
        self.helper.invalidate(error_name, message);
    }

    pub fn subscribe_status_ready(&self) -> broadcast::Receiver<StatusReady> {
        self.helper.subscribe_status_ready()
    }

    pub fn status_ready_hub(&self) -> &StatusReadyHub {
        self.helper.status_ready_hub()
    }

    pub fn helper(&self) -> &ReadinessHelper {
        &self.helper
    }

    /// Follow a status feed: the current value is applied at once, then every
    /// change. The task ends when the sender is dropped.
    pub fn watch_status(&self, mut statuses: watch::Receiver<Status>) -> JoinHandle<()> {
        let proxy = self.clone();
        tokio::spawn(async move {
            let initial = *statuses.borrow_and_update();
            if initial != proxy.status() {
                proxy.set_status(initial);
            }
            while statuses.changed().await.is_ok() {
                let status = *statuses.borrow_and_update();
                debug!(object_path = %proxy.object_path, %status, "remote status changed");
                proxy.set_status(status);
            }
            debug!(object_path = %proxy.object_path, "status feed closed");
        })
    }

    pub fn describe(&self) -> ProxyReport {
        ProxyReport {
            bus_name: self.bus_name.clone(),
            object_path: self.object_path.clone(),
            readiness: self.helper.snapshot(),
        }
    }
}

impl fmt::Debug for ReadyProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyProxy")
            .field("bus_name", &self.bus_name)
            .field("object_path", &self.object_path)
            .field("status", &self.status())
            .finish()
    }
}

/// Serializable description of a proxy and its readiness bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyReport {
    pub bus_name: BusName,
    pub object_path: ObjectPath,
    pub readiness: ReadinessSnapshot,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use ready_events::wait_for_status;
    use ready_protocol::{FeatureOutcome, FeatureSet, ReadinessError, feature_set};
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(1);
    const PRESENCE: FeatureId = FeatureId::new(1);
    const ROSTER: FeatureId = FeatureId::new(2);
    const PRESENCE_IFACE: &str = "org.example.Connection.Interface.Presence";

    struct Unreachable;

    #[async_trait]
    impl InterfaceSource for Unreachable {
        async fn interfaces(&self, _: &BusName, _: &ObjectPath) -> Result<Vec<InterfaceName>> {
            Err(anyhow!("org.example.Error.NoReply"))
        }
    }

    fn succeed(ctx: ProbeContext) {
        let _ = ctx.complete(true);
    }

    fn connection(source: impl InterfaceSource) -> Result<ReadyProxy> {
        ProxyBuilder::new("org.example.Conn.alice", "/org/example/Conn/alice")
            .initial_status(ConnectionStatus::Connected)
            .core_statuses([ConnectionStatus::Connected, ConnectionStatus::Connecting])
            .feature(
                PRESENCE,
                Introspectable::new([ConnectionStatus::Connected.status()], succeed)
                    .depends_on_features([FeatureId::CORE])
                    .depends_on_interfaces([PRESENCE_IFACE]),
            )
            .feature(
                ROSTER,
                Introspectable::new([ConnectionStatus::Connected.status()], succeed)
                    .depends_on_features([PRESENCE]),
            )
            .interface_source(source)
            .build()
    }

    #[test]
    fn connection_status_maps_to_status_values() {
        assert_eq!(Status::from(ConnectionStatus::Connecting), Status::new(1));
        assert_eq!(
            ConnectionStatus::from_status(Status::new(2)),
            Some(ConnectionStatus::Disconnected)
        );
        assert_eq!(ConnectionStatus::from_status(Status::new(9)), None);
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
    }

    #[tokio::test]
    async fn core_probe_publishes_interfaces() -> Result<()> {
        let proxy = connection(StaticInterfaces::new([PRESENCE_IFACE]))?;
        let outcome = timeout(WAIT, proxy.become_ready([PRESENCE, ROSTER])?).await??;

        assert!(outcome.is_fully_satisfied());
        assert!(proxy.has_interface(PRESENCE_IFACE));
        assert_eq!(proxy.interfaces().len(), 1);
        assert!(proxy.is_ready([FeatureId::CORE]));
        Ok(())
    }

    #[tokio::test]
    async fn missing_interface_leaves_dependents_missing() -> Result<()> {
        let proxy = connection(StaticInterfaces::default())?;
        let outcome = timeout(WAIT, proxy.become_ready([PRESENCE, ROSTER])?).await??;

        assert_eq!(outcome.outcome(PRESENCE), Some(FeatureOutcome::Missing));
        assert_eq!(outcome.outcome(ROSTER), Some(FeatureOutcome::Missing));
        assert!(proxy.is_ready(FeatureSet::new()));
        Ok(())
    }

    #[tokio::test]
    async fn interface_lookup_failure_marks_everything_missing() -> Result<()> {
        let proxy = connection(Unreachable)?;
        let outcome = timeout(WAIT, proxy.become_ready([PRESENCE])?).await??;

        assert_eq!(outcome.missing(), feature_set([1_u32]));
        assert!(!proxy.is_ready([FeatureId::CORE]));
        assert_eq!(proxy.helper().missing_features(), feature_set([0_u32, 1, 2]));
        Ok(())
    }

    #[tokio::test]
    async fn registering_core_twice_is_rejected() {
        let error = ProxyBuilder::new("org.example.Conn.bob", "/org/example/Conn/bob")
            .feature(FeatureId::CORE, Introspectable::new([Status::new(0)], succeed))
            .build()
            .unwrap_err();
        assert!(error.to_string().contains("feature:core"));
    }

    #[tokio::test]
    async fn unknown_dependency_is_reported_with_context() {
        let error = ProxyBuilder::new("org.example.Conn.bob", "/org/example/Conn/bob")
            .feature(
                3_u32,
                Introspectable::new([Status::new(0)], succeed).depends_on_features([9_u32]),
            )
            .build()
            .unwrap_err();
        assert!(error.to_string().contains("/org/example/Conn/bob"));
        assert!(matches!(
            error.downcast_ref::<ReadinessError>(),
            Some(ReadinessError::UnknownDependency { .. })
        ));
    }

    #[tokio::test]
    async fn watched_status_feed_drives_the_engine() -> Result<()> {
        let proxy = connection(StaticInterfaces::new([PRESENCE_IFACE]))?;
        let mut ready = proxy.subscribe_status_ready();
        timeout(WAIT, wait_for_status(&mut ready, ConnectionStatus::Connected.status())).await?;

        let (sender, receiver) = watch::channel(ConnectionStatus::Connected.status());
        let feed = proxy.watch_status(receiver);
        sender.send(ConnectionStatus::Disconnected.status())?;

        let announced = timeout(
            WAIT,
            wait_for_status(&mut ready, ConnectionStatus::Disconnected.status()),
        )
        .await?
        .ok_or_else(|| anyhow!("status-ready hub closed"))?;
        assert!(announced.satisfied.is_empty());
        assert_eq!(proxy.status(), ConnectionStatus::Disconnected.status());

        drop(sender);
        timeout(WAIT, feed).await??;
        Ok(())
    }

    #[tokio::test]
    async fn invalidated_proxy_rejects_requests() -> Result<()> {
        let proxy = connection(StaticInterfaces::new([PRESENCE_IFACE]))?;
        let handle = proxy.become_ready([ROSTER])?;
        proxy.invalidate("org.example.Error.Disconnected", "account removed");

        let error = timeout(WAIT, handle).await?.unwrap_err();
        assert!(matches!(error, ReadinessError::Invalidated { .. }));
        assert!(proxy.become_ready([PRESENCE]).is_err());
        assert!(proxy.describe().readiness.invalidated);
        Ok(())
    }

    #[tokio::test]
    async fn report_serializes_readiness() -> Result<()> {
        let proxy = connection(StaticInterfaces::new([PRESENCE_IFACE]))?;
        timeout(WAIT, proxy.become_ready(FeatureSet::new())?).await??;

        let json = serde_json::to_value(proxy.describe())?;
        assert_eq!(json["object_path"], "/org/example/Conn/alice");
        assert_eq!(json["readiness"]["satisfied"], serde_json::json!([0]));
        Ok(())
    }
}
