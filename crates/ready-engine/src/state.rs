use std::collections::BTreeSet;

use ready_protocol::{FeatureId, FeatureSet, InterfaceName, ReadinessError, ReadinessResult, Status};
use serde::{Deserialize, Serialize};

use crate::pending::PendingReady;
use crate::registry::FeatureRegistry;

/// Mutable readiness bookkeeping for one proxy.
///
/// `requested ⊇ pending ⊇ in_flight`; `satisfied` and `missing` are disjoint
/// and only describe the current epoch.
#[derive(Debug)]
pub(crate) struct ReadinessState {
    pub(crate) current_status: Status,
    pub(crate) epoch: u64,
    pub(crate) interfaces: BTreeSet<InterfaceName>,
    pub(crate) requested: FeatureSet,
    pub(crate) satisfied: FeatureSet,
    pub(crate) missing: FeatureSet,
    pub(crate) pending: FeatureSet,
    pub(crate) in_flight: FeatureSet,
    pub(crate) pending_operations: Vec<PendingReady>,
    pub(crate) pending_status: Option<Status>,
    pub(crate) status_ready_announced: bool,
    pub(crate) pass_scheduled: bool,
    pub(crate) invalidated: Option<ReadinessError>,
}

impl ReadinessState {
    pub(crate) fn new(status: Status) -> Self {
        Self {
            current_status: status,
            epoch: 0,
            interfaces: BTreeSet::new(),
            requested: FeatureSet::new(),
            satisfied: FeatureSet::new(),
            missing: FeatureSet::new(),
            pending: FeatureSet::new(),
            in_flight: FeatureSet::new(),
            pending_operations: Vec::new(),
            pending_status: None,
            status_ready_announced: false,
            pass_scheduled: false,
            invalidated: None,
        }
    }

    pub(crate) fn decided(&self) -> FeatureSet {
        self.satisfied.union(&self.missing).copied().collect()
    }

    pub(crate) fn is_decided(&self, features: &FeatureSet) -> bool {
        features
            .iter()
            .all(|feature| self.satisfied.contains(feature) || self.missing.contains(feature))
    }

    /// Start a new epoch under `status`. Requested features stay requested.
    pub(crate) fn reset_for(&mut self, status: Status) {
        self.current_status = status;
        self.epoch += 1;
        self.satisfied.clear();
        self.missing.clear();
        self.pending = self.requested.clone();
        self.status_ready_announced = false;
    }

    /// Mark as missing every feature depending on a missing feature, to a
    /// fixed point. Returns how many features were added.
    pub(crate) fn propagate_missing(&mut self, registry: &FeatureRegistry) -> usize {
        let mut added = 0;
        loop {
            let newly_missing: Vec<FeatureId> = registry
                .iter()
                .filter(|(feature, introspectable)| {
                    !self.missing.contains(feature)
                        && !self.satisfied.contains(feature)
                        && !introspectable
                            .feature_dependencies()
                            .is_disjoint(&self.missing)
                })
                .map(|(feature, _)| feature)
                .collect();
            if newly_missing.is_empty() {
                return added;
            }
            added += newly_missing.len();
            self.missing.extend(newly_missing);
        }
    }

    /// Split off every outstanding operation whose requested set is decided.
    pub(crate) fn take_resolved_operations(&mut self) -> Vec<PendingReady> {
        let decided = self.decided();
        let (resolved, outstanding): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending_operations)
                .into_iter()
                .partition(|operation| operation.requested_features().is_subset(&decided));
        self.pending_operations = outstanding;
        resolved
    }

    pub(crate) fn refresh_pending(&mut self) {
        let decided = self.decided();
        self.pending = self.requested.difference(&decided).copied().collect();
    }

    /// Pending features whose feature dependencies are all satisfied and that
    /// are not already being probed, in ascending id order.
    pub(crate) fn eligible(&self, registry: &FeatureRegistry) -> Vec<FeatureId> {
        self.pending
            .iter()
            .copied()
            .filter(|feature| !self.in_flight.contains(feature))
            .filter(|feature| {
                registry.get(*feature).is_some_and(|introspectable| {
                    introspectable
                        .feature_dependencies()
                        .is_subset(&self.satisfied)
                })
            })
            .collect()
    }

    /// Record a probe outcome for the current epoch.
    pub(crate) fn record(&mut self, feature: FeatureId, success: bool) -> ReadinessResult<()> {
        if !self.pending.contains(&feature) || !self.in_flight.contains(&feature) {
            return Err(ReadinessError::InvariantBroken(format!(
                "{feature} reported but it is not pending and in flight"
            )));
        }
        if success {
            self.satisfied.insert(feature);
        } else {
            self.missing.insert(feature);
        }
        self.pending.remove(&feature);
        self.in_flight.remove(&feature);
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> ReadinessSnapshot {
        ReadinessSnapshot {
            current_status: self.current_status,
            epoch: self.epoch,
            interfaces: self.interfaces.clone(),
            requested: self.requested.clone(),
            satisfied: self.satisfied.clone(),
            missing: self.missing.clone(),
            pending: self.pending.clone(),
            in_flight: self.in_flight.clone(),
            pending_status: self.pending_status,
            outstanding_operations: self.pending_operations.len(),
            invalidated: self.invalidated.is_some(),
        }
    }
}

/// Point-in-time copy of an engine's bookkeeping, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessSnapshot {
    pub current_status: Status,
    pub epoch: u64,
    pub interfaces: BTreeSet<InterfaceName>,
    pub requested: FeatureSet,
    pub satisfied: FeatureSet,
    pub missing: FeatureSet,
    pub pending: FeatureSet,
    pub in_flight: FeatureSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_status: Option<Status>,
    pub outstanding_operations: usize,
    pub invalidated: bool,
}

#[cfg(test)]
mod tests {
    use ready_protocol::{FeatureId, ReadinessError, Status, feature_set};

    use super::*;
    use crate::probe::ProbeContext;
    use crate::registry::Introspectable;

    fn chain_registry() -> FeatureRegistry {
        let probe = |ctx: ProbeContext| {
            let _ = ctx.complete(true);
        };
        let statuses = [Status::new(0)];
        FeatureRegistry::new([
            (FeatureId::CORE, Introspectable::new(statuses, probe)),
            (
                FeatureId::new(1),
                Introspectable::new(statuses, probe).depends_on_features([0_u32]),
            ),
            (
                FeatureId::new(2),
                Introspectable::new(statuses, probe).depends_on_features([1_u32]),
            ),
            (
                FeatureId::new(3),
                Introspectable::new(statuses, probe).depends_on_features([2_u32]),
            ),
            (
                FeatureId::new(4),
                Introspectable::new(statuses, probe).depends_on_features([0_u32]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn missing_propagates_transitively_in_one_call() {
        let registry = chain_registry();
        let mut state = ReadinessState::new(Status::new(0));
        state.satisfied.insert(FeatureId::CORE);
        state.missing.insert(FeatureId::new(1));

        let added = state.propagate_missing(&registry);
        assert_eq!(added, 2);
        assert_eq!(state.missing, feature_set([1_u32, 2, 3]));
        assert!(state.satisfied.is_disjoint(&state.missing));
        assert_eq!(state.propagate_missing(&registry), 0);
    }

    #[test]
    fn eligible_requires_satisfied_dependencies_and_not_in_flight() {
        let registry = chain_registry();
        let mut state = ReadinessState::new(Status::new(0));
        state.requested = feature_set([0_u32, 1, 2, 4]);
        state.pending = state.requested.clone();
        assert_eq!(state.eligible(&registry), vec![FeatureId::CORE]);

        state.in_flight.insert(FeatureId::CORE);
        assert!(state.eligible(&registry).is_empty());

        state.record(FeatureId::CORE, true).unwrap();
        assert_eq!(
            state.eligible(&registry),
            vec![FeatureId::new(1), FeatureId::new(4)]
        );
    }

    #[test]
    fn record_rejects_features_not_in_flight() {
        let mut state = ReadinessState::new(Status::new(0));
        state.requested = feature_set([0_u32]);
        state.pending = state.requested.clone();

        let error = state.record(FeatureId::CORE, true).unwrap_err();
        assert!(matches!(error, ReadinessError::InvariantBroken(_)));
        assert!(state.satisfied.is_empty());
    }

    #[test]
    fn reset_starts_new_epoch_with_requested_features_pending() {
        let mut state = ReadinessState::new(Status::new(0));
        state.requested = feature_set([0_u32, 1]);
        state.satisfied = feature_set([0_u32]);
        state.missing = feature_set([1_u32]);
        state.status_ready_announced = true;

        state.reset_for(Status::new(2));
        assert_eq!(state.current_status, Status::new(2));
        assert_eq!(state.epoch, 1);
        assert!(state.decided().is_empty());
        assert_eq!(state.pending, feature_set([0_u32, 1]));
        assert!(!state.status_ready_announced);
    }

    #[test]
    fn resolved_operations_are_split_off() {
        let mut state = ReadinessState::new(Status::new(0));
        state.pending_operations = vec![
            PendingReady::new(feature_set([0_u32])),
            PendingReady::new(feature_set([0_u32, 1])),
        ];
        state.satisfied = feature_set([0_u32]);

        let resolved = state.take_resolved_operations();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].requested_features(), &feature_set([0_u32]));
        assert_eq!(state.pending_operations.len(), 1);
    }

    #[test]
    fn snapshot_serializes() {
        let mut state = ReadinessState::new(Status::new(1));
        state.pending_status = Some(Status::new(2));
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["current_status"], 1);
        assert_eq!(json["pending_status"], 2);
        assert_eq!(json["invalidated"], false);
    }
}
