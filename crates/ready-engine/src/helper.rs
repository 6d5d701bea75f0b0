use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use ready_events::StatusReadyHub;
use ready_protocol::{
    FeatureId, FeatureSet, InterfaceName, ReadinessError, ReadinessResult, ReadyOutcome, Status,
    StatusReady,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ReadinessConfig;
use crate::pending::PendingReady;
use crate::probe::{Probe, ProbeContext};
use crate::registry::FeatureRegistry;
use crate::state::{ReadinessSnapshot, ReadinessState};

/// Feature readiness engine attached to one remote-object proxy.
///
/// Cheap to clone; clones drive the same state. Resolution passes never run
/// inline: every state change queues a pass on a driver task owned by the
/// engine, and passes run one at a time. Dropping the last clone finishes
/// every outstanding [`PendingReady`] with [`ReadinessError::HelperDropped`].
#[derive(Clone)]
pub struct ReadinessHelper {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    config: ReadinessConfig,
    registry: Arc<FeatureRegistry>,
    state: Mutex<ReadinessState>,
    passes: mpsc::UnboundedSender<()>,
    hub: StatusReadyHub,
}

/// A probe selected by a pass, started once the state lock is released.
struct Launch {
    feature: FeatureId,
    probe: Arc<dyn Probe>,
    status: Status,
    epoch: u64,
}

impl ReadinessHelper {
    /// Create an engine in `initial_status`.
    ///
    /// Must be called from within a tokio runtime: the engine spawns its pass
    /// driver. If the status is supported, core introspection is queued.
    pub fn new(initial_status: Status, registry: impl Into<Arc<FeatureRegistry>>) -> Self {
        Self::with_config(initial_status, registry, ReadinessConfig::default())
    }

    pub fn with_config(
        initial_status: Status,
        registry: impl Into<Arc<FeatureRegistry>>,
        config: ReadinessConfig,
    ) -> Self {
        let (passes, receiver) = mpsc::unbounded_channel();
        let hub = StatusReadyHub::new(config.status_ready_buffer);
        let shared = Arc::new(Shared {
            config,
            registry: registry.into(),
            state: Mutex::new(ReadinessState::new(initial_status)),
            passes,
            hub,
        });
        tokio::spawn(drive_passes(Arc::downgrade(&shared), receiver));

        {
            let mut state = shared.state.lock();
            if shared.registry.supports(initial_status) {
                shared.introspect_core(&mut state);
            }
        }
        debug!(engine = %shared.config.label, status = %initial_status, "readiness helper created");
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.shared.registry
    }

    pub fn current_status(&self) -> Status {
        self.shared.state.lock().current_status
    }

    pub fn epoch(&self) -> u64 {
        self.shared.state.lock().epoch
    }

    /// Apply a new remote status, or defer it until in-flight probes drain.
    #[instrument(skip(self), fields(engine = %self.shared.config.label))]
    pub fn set_status(&self, status: Status) {
        let mut state = self.shared.state.lock();
        if state.invalidated.is_some() {
            debug!("ignoring status change on invalidated engine");
            return;
        }
        self.shared.apply_status(&mut state, status);
    }

    pub fn interfaces(&self) -> BTreeSet<InterfaceName> {
        self.shared.state.lock().interfaces.clone()
    }

    pub fn has_interface(&self, interface: &InterfaceName) -> bool {
        self.shared.state.lock().interfaces.contains(interface)
    }

    /// Replace the set of interfaces known to be implemented by the remote object.
    pub fn set_interfaces<I, N>(&self, interfaces: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<InterfaceName>,
    {
        let interfaces: BTreeSet<InterfaceName> = interfaces.into_iter().map(Into::into).collect();
        debug!(engine = %self.shared.config.label, count = interfaces.len(), "interfaces updated");
        self.shared.state.lock().interfaces = interfaces;
    }

    pub fn requested_features(&self) -> FeatureSet {
        self.shared.state.lock().requested.clone()
    }

    pub fn satisfied_features(&self) -> FeatureSet {
        self.shared.state.lock().satisfied.clone()
    }

    pub fn missing_features(&self) -> FeatureSet {
        self.shared.state.lock().missing.clone()
    }

    pub fn pending_features(&self) -> FeatureSet {
        self.shared.state.lock().pending.clone()
    }

    pub fn in_flight_features(&self) -> FeatureSet {
        self.shared.state.lock().in_flight.clone()
    }

    pub fn snapshot(&self) -> ReadinessSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Whether `features` are decided, with no scheduling side effect.
    ///
    /// Asking about the core feature alone (or the empty set) requires core to
    /// be satisfied; any other set only has to be decided.
    pub fn is_ready<I, F>(&self, features: I) -> bool
    where
        I: IntoIterator<Item = F>,
        F: Into<FeatureId>,
    {
        let features = normalize(features);
        let state = self.shared.state.lock();
        if features.len() == 1 && features.contains(&FeatureId::CORE) {
            state.satisfied.contains(&FeatureId::CORE)
        } else {
            state.is_decided(&features)
        }
    }

    /// Request `features` and get a handle finishing once they are decided.
    ///
    /// An empty request means the core feature. An outstanding handle for an
    /// equal set is returned instead of a new one.
    #[instrument(skip(self, features), fields(engine = %self.shared.config.label))]
    pub fn become_ready<I, F>(&self, features: I) -> ReadinessResult<PendingReady>
    where
        I: IntoIterator<Item = F>,
        F: Into<FeatureId>,
    {
        let requested = normalize(features);
        if let Some(unknown) = requested
            .iter()
            .find(|feature| !self.shared.registry.contains(**feature))
        {
            return Err(ReadinessError::UnknownFeature(*unknown));
        }

        let mut state = self.shared.state.lock();
        if let Some(error) = &state.invalidated {
            return Err(error.clone());
        }

        if let Some(existing) = state
            .pending_operations
            .iter()
            .find(|operation| operation.requested_features() == &requested)
        {
            debug!(handle = %existing.id(), "joining outstanding become-ready operation");
            return Ok(existing.clone());
        }

        if !state.is_decided(&requested) {
            state.status_ready_announced = false;
        }
        let decided = state.decided();
        state.requested.extend(requested.iter().copied());
        state
            .pending
            .extend(requested.difference(&decided).copied());

        let operation = PendingReady::new(requested);
        debug!(
            handle = %operation.id(),
            requested = ?operation.requested_features(),
            "become-ready operation created"
        );
        state.pending_operations.push(operation.clone());
        self.shared.schedule(&mut state);
        Ok(operation)
    }

    /// Report the outcome of the probe for `feature`.
    ///
    /// Reporting a feature that is not pending and in flight breaks the
    /// engine's contract and is rejected with
    /// [`ReadinessError::InvariantBroken`]. Probes normally report through
    /// [`ProbeContext::complete`] instead.
    pub fn report_probe_result(&self, feature: FeatureId, success: bool) -> ReadinessResult<()> {
        let mut state = self.shared.state.lock();
        self.shared.complete(&mut state, feature, success, None)
    }

    pub(crate) fn report_from_probe(
        &self,
        feature: FeatureId,
        success: bool,
        epoch: u64,
    ) -> ReadinessResult<()> {
        let mut state = self.shared.state.lock();
        self.shared.complete(&mut state, feature, success, Some(epoch))
    }

    /// Tear the engine down: every outstanding handle finishes with
    /// [`ReadinessError::Invalidated`] and later requests fail the same way.
    /// Probes already in flight may still report; their results are dropped.
    #[instrument(skip(self, name, message), fields(engine = %self.shared.config.label))]
    pub fn invalidate(&self, name: impl Into<String>, message: impl Into<String>) {
        let error = ReadinessError::invalidated(name, message);
        let mut state = self.shared.state.lock();
        if state.invalidated.is_some() {
            return;
        }
        let outstanding = std::mem::take(&mut state.pending_operations);
        warn!(%error, outstanding = outstanding.len(), "readiness engine invalidated");
        for operation in outstanding {
            operation.set_finished_with_error(error.clone());
        }
        state.invalidated = Some(error);
    }

    pub fn invalidation(&self) -> Option<ReadinessError> {
        self.shared.state.lock().invalidated.clone()
    }

    pub fn status_ready_hub(&self) -> &StatusReadyHub {
        &self.shared.hub
    }

    pub fn subscribe_status_ready(&self) -> broadcast::Receiver<StatusReady> {
        self.shared.hub.subscribe()
    }
}

impl fmt::Debug for ReadinessHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessHelper")
            .field("label", &self.shared.config.label)
            .field("state", &self.snapshot())
            .finish()
    }
}

impl Shared {
    /// Queue one resolution pass unless one is already queued.
    fn schedule(&self, state: &mut ReadinessState) {
        if state.pass_scheduled {
            return;
        }
        state.pass_scheduled = true;
        if self.passes.send(()).is_err() {
            warn!(engine = %self.config.label, "pass driver stopped; resolution pass dropped");
        }
    }

    fn introspect_core(&self, state: &mut ReadinessState) {
        debug!(engine = %self.config.label, status = %state.current_status, "introspecting core");
        state.requested.insert(FeatureId::CORE);
        state.pending.insert(FeatureId::CORE);
        self.schedule(state);
    }

    fn apply_status(&self, state: &mut ReadinessState, status: Status) {
        if !state.in_flight.is_empty() {
            debug!(
                engine = %self.config.label,
                %status,
                in_flight = state.in_flight.len(),
                "status changed while introspection was running; deferring"
            );
            state.pending_status = Some(status);
            return;
        }

        state.reset_for(status);
        info!(engine = %self.config.label, %status, epoch = state.epoch, "status applied");
        if self.registry.supports(status) {
            self.introspect_core(state);
        } else {
            self.announce_status_ready(state);
        }
    }

    fn complete(
        &self,
        state: &mut ReadinessState,
        feature: FeatureId,
        success: bool,
        epoch: Option<u64>,
    ) -> ReadinessResult<()> {
        if state.invalidated.is_some() {
            state.in_flight.remove(&feature);
            return Ok(());
        }

        if let Some(status) = state.pending_status {
            debug!(
                engine = %self.config.label,
                %feature,
                success,
                "probe finished while a status change is pending; discarding result"
            );
            state.in_flight.remove(&feature);
            if !state.in_flight.is_empty() {
                return Ok(());
            }
            state.pending_status = None;
            self.apply_status(state, status);
            return Ok(());
        }

        if let Some(epoch) = epoch
            && epoch != state.epoch
        {
            let violation = ReadinessError::InvariantBroken(format!(
                "{feature} reported for epoch {epoch} during epoch {}",
                state.epoch
            ));
            error!(engine = %self.config.label, %violation, "stale probe report");
            return Err(violation);
        }

        if let Err(violation) = state.record(feature, success) {
            error!(engine = %self.config.label, %violation, "unexpected probe report");
            return Err(violation);
        }
        debug!(engine = %self.config.label, %feature, success, "feature decided");
        self.schedule(state);
        Ok(())
    }

    fn announce_status_ready(&self, state: &mut ReadinessState) {
        if state.status_ready_announced {
            return;
        }
        state.status_ready_announced = true;
        info!(
            engine = %self.config.label,
            status = %state.current_status,
            epoch = state.epoch,
            satisfied = ?state.satisfied,
            missing = ?state.missing,
            "all requested features decided"
        );
        self.hub.publish(StatusReady::new(
            state.current_status,
            state.epoch,
            state.satisfied.clone(),
            state.missing.clone(),
        ));
    }

    fn iterate_introspection(self: &Arc<Self>) {
        let launches = {
            let mut state = self.state.lock();
            state.pass_scheduled = false;
            self.run_pass(&mut state)
        };

        for launch in launches {
            debug!(engine = %self.config.label, feature = %launch.feature, "starting probe");
            let ctx = ProbeContext::new(
                launch.feature,
                launch.status,
                launch.epoch,
                Arc::downgrade(self),
            );
            launch.probe.introspect(ctx);
        }
    }

    fn run_pass(&self, state: &mut ReadinessState) -> Vec<Launch> {
        if state.invalidated.is_some() {
            return Vec::new();
        }
        if !self.registry.supports(state.current_status) {
            debug!(
                engine = %self.config.label,
                status = %state.current_status,
                "ignoring resolution pass for unsupported status"
            );
            return Vec::new();
        }

        let propagated = state.propagate_missing(&self.registry);
        if propagated > 0 {
            debug!(engine = %self.config.label, propagated, missing = ?state.missing, "missing dependencies propagated");
        }

        for operation in state.take_resolved_operations() {
            let outcome = ReadyOutcome::decide(
                state.current_status,
                state.epoch,
                operation.requested_features(),
                &state.satisfied,
            );
            info!(
                engine = %self.config.label,
                handle = %operation.id(),
                fully_satisfied = outcome.is_fully_satisfied(),
                "become-ready operation finished"
            );
            operation.set_finished(outcome);
        }

        if state.is_decided(&state.requested) {
            self.announce_status_ready(state);
            return Vec::new();
        }

        state.refresh_pending();

        if state.pending_status.is_some() {
            debug!(engine = %self.config.label, "status change pending; not starting new probes");
            return Vec::new();
        }

        let mut launches = Vec::new();
        for feature in state.eligible(&self.registry) {
            let Some(introspectable) = self.registry.get(feature) else {
                continue;
            };
            state.in_flight.insert(feature);

            if !introspectable.makes_sense_for(state.current_status) {
                debug!(
                    engine = %self.config.label,
                    %feature,
                    status = %state.current_status,
                    "feature has nothing to probe in this status; satisfied"
                );
                self.complete_synthetic(state, feature, true);
                break;
            }

            if !feature.is_core()
                && let Some(interface) = introspectable
                    .interface_dependencies()
                    .iter()
                    .find(|interface| !state.interfaces.contains(*interface))
            {
                debug!(
                    engine = %self.config.label,
                    %feature,
                    %interface,
                    "required interface not present; feature missing"
                );
                self.complete_synthetic(state, feature, false);
                break;
            }

            launches.push(Launch {
                feature,
                probe: introspectable.probe(),
                status: state.current_status,
                epoch: state.epoch,
            });
        }
        launches
    }

    fn complete_synthetic(&self, state: &mut ReadinessState, feature: FeatureId, success: bool) {
        if let Err(violation) = self.complete(state, feature, success, None) {
            error!(engine = %self.config.label, %violation, "synthetic completion rejected");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let outstanding = std::mem::take(&mut state.pending_operations);
        if !outstanding.is_empty() {
            warn!(
                engine = %self.config.label,
                outstanding = outstanding.len(),
                in_flight = state.in_flight.len(),
                "readiness helper dropped with outstanding operations"
            );
        }
        for operation in outstanding {
            operation.set_finished_with_error(ReadinessError::HelperDropped);
        }
    }
}

async fn drive_passes(shared: Weak<Shared>, mut passes: mpsc::UnboundedReceiver<()>) {
    while passes.recv().await.is_some() {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.iterate_introspection();
    }
}

fn normalize<I, F>(features: I) -> FeatureSet
where
    I: IntoIterator<Item = F>,
    F: Into<FeatureId>,
{
    let mut features: FeatureSet = features.into_iter().map(Into::into).collect();
    if features.is_empty() {
        features.insert(FeatureId::CORE);
    }
    features
}
