//! Probe capability and the completion token handed to every probe.
//!
//! The engine never performs remote calls itself. When a feature becomes
//! eligible it calls [`Probe::introspect`] with a [`ProbeContext`]; the probe
//! starts whatever round trips it needs and later reports exactly once through
//! [`ProbeContext::complete`].

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use ready_protocol::{FeatureId, InterfaceName, ReadinessError, ReadinessResult, Status};
use tracing::{debug, warn};

use crate::helper::{ReadinessHelper, Shared};

/// Starts the probe for one feature.
///
/// Implementations must return promptly; the outcome is reported through the
/// context, possibly from another task and possibly before `introspect`
/// returns.
pub trait Probe: Send + Sync {
    fn introspect(&self, ctx: ProbeContext);
}

impl<F> Probe for F
where
    F: Fn(ProbeContext) + Send + Sync,
{
    fn introspect(&self, ctx: ProbeContext) {
        self(ctx)
    }
}

/// Single-use completion token for one in-flight probe.
///
/// Dropping the context without calling [`ProbeContext::complete`] reports the
/// feature as missing, so a lost probe never stalls resolution.
pub struct ProbeContext {
    feature: FeatureId,
    status: Status,
    epoch: u64,
    helper: Weak<Shared>,
    reported: bool,
}

impl ProbeContext {
    pub(crate) fn new(feature: FeatureId, status: Status, epoch: u64, helper: Weak<Shared>) -> Self {
        Self {
            feature,
            status,
            epoch,
            helper,
            reported: false,
        }
    }

    pub fn feature(&self) -> FeatureId {
        self.feature
    }

    /// Status the probe was issued under.
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The engine that issued this probe, if it is still alive.
    pub fn helper(&self) -> Option<ReadinessHelper> {
        self.helper.upgrade().map(ReadinessHelper::from_shared)
    }

    /// Publish the remote object's interfaces before reporting, typically from
    /// the core probe.
    pub fn set_interfaces<I, N>(&self, interfaces: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<InterfaceName>,
    {
        if let Some(helper) = self.helper() {
            helper.set_interfaces(interfaces);
        }
    }

    /// Report the probe outcome. Consumes the context.
    pub fn complete(mut self, success: bool) -> ReadinessResult<()> {
        self.reported = true;
        let helper = self.helper().ok_or(ReadinessError::HelperDropped)?;
        helper.report_from_probe(self.feature, success, self.epoch)
    }
}

impl Drop for ProbeContext {
    fn drop(&mut self) {
        if self.reported {
            return;
        }
        warn!(feature = %self.feature, epoch = self.epoch, "probe context dropped without a report");
        if let Some(helper) = self.helper() {
            let _ = helper.report_from_probe(self.feature, false, self.epoch);
        }
    }
}

impl std::fmt::Debug for ProbeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeContext")
            .field("feature", &self.feature)
            .field("status", &self.status)
            .field("epoch", &self.epoch)
            .field("reported", &self.reported)
            .finish()
    }
}

/// Probe expressed as an async call; failure of any kind marks the feature missing.
#[async_trait]
pub trait AsyncProbe: Send + Sync + 'static {
    async fn probe(&self, feature: FeatureId) -> anyhow::Result<()>;
}

/// Adapts an [`AsyncProbe`] into a [`Probe`] by spawning it on the tokio runtime.
pub struct Spawned<P> {
    inner: Arc<P>,
}

/// Wrap `probe` so each introspection runs as its own tokio task.
pub fn spawned<P: AsyncProbe>(probe: P) -> Spawned<P> {
    Spawned {
        inner: Arc::new(probe),
    }
}

impl<P: AsyncProbe> Probe for Spawned<P> {
    fn introspect(&self, ctx: ProbeContext) {
        let probe = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let feature = ctx.feature();
            let success = match probe.probe(feature).await {
                Ok(()) => true,
                Err(error) => {
                    debug!(%feature, error = %format!("{error:#}"), "probe failed");
                    false
                }
            };
            if let Err(error) = ctx.complete(success) {
                warn!(%feature, %error, "probe report rejected");
            }
        });
    }
}
