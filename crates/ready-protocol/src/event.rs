//! Readiness outcomes and notifications.
//!
//! A become-ready handle finishes successfully once every requested feature
//! is *decided*; whether a decided feature is usable is carried per feature in
//! [`ReadyOutcome`], so callers can tell "ready" from "decided-unavailable".

use crate::ids::{FeatureId, FeatureSet, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terminal per-epoch result for a single feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureOutcome {
    Satisfied,
    Missing,
}

/// What a finished become-ready handle resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyOutcome {
    pub status: Status,
    pub epoch: u64,
    pub features: BTreeMap<FeatureId, FeatureOutcome>,
}

impl ReadyOutcome {
    /// Build the outcome for `requested` from the decided sets of an epoch.
    ///
    /// Features found in neither set are reported missing; callers only build
    /// outcomes once everything requested is decided.
    pub fn decide(
        status: Status,
        epoch: u64,
        requested: &FeatureSet,
        satisfied: &FeatureSet,
    ) -> Self {
        let features = requested
            .iter()
            .map(|feature| {
                let outcome = if satisfied.contains(feature) {
                    FeatureOutcome::Satisfied
                } else {
                    FeatureOutcome::Missing
                };
                (*feature, outcome)
            })
            .collect();
        Self {
            status,
            epoch,
            features,
        }
    }

    pub fn satisfied(&self) -> FeatureSet {
        self.with_outcome(FeatureOutcome::Satisfied)
    }

    pub fn missing(&self) -> FeatureSet {
        self.with_outcome(FeatureOutcome::Missing)
    }

    pub fn outcome(&self, feature: FeatureId) -> Option<FeatureOutcome> {
        self.features.get(&feature).copied()
    }

    /// True when no requested feature ended up missing.
    pub fn is_fully_satisfied(&self) -> bool {
        self.features
            .values()
            .all(|outcome| *outcome == FeatureOutcome::Satisfied)
    }

    fn with_outcome(&self, wanted: FeatureOutcome) -> FeatureSet {
        self.features
            .iter()
            .filter(|(_, outcome)| **outcome == wanted)
            .map(|(feature, _)| *feature)
            .collect()
    }
}

/// Emitted when every requested feature of an epoch is decided, or right
/// away when a status is applied for which no feature is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReady {
    pub status: Status,
    pub epoch: u64,
    pub satisfied: FeatureSet,
    pub missing: FeatureSet,
    pub emitted_at: DateTime<Utc>,
}

impl StatusReady {
    pub fn new(status: Status, epoch: u64, satisfied: FeatureSet, missing: FeatureSet) -> Self {
        Self {
            status,
            epoch,
            satisfied,
            missing,
            emitted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::feature_set;

    #[test]
    fn decide_splits_requested_features() {
        let outcome = ReadyOutcome::decide(
            Status::new(0),
            1,
            &feature_set([1_u32, 2]),
            &feature_set([0_u32, 1]),
        );
        assert_eq!(outcome.satisfied(), feature_set([1_u32]));
        assert_eq!(outcome.missing(), feature_set([2_u32]));
        assert_eq!(
            outcome.outcome(FeatureId::new(2)),
            Some(FeatureOutcome::Missing)
        );
        assert_eq!(outcome.outcome(FeatureId::CORE), None);
        assert!(!outcome.is_fully_satisfied());
    }

    #[test]
    fn fully_satisfied_when_nothing_missing() {
        let outcome = ReadyOutcome::decide(
            Status::new(1),
            4,
            &feature_set([0_u32]),
            &feature_set([0_u32]),
        );
        assert!(outcome.is_fully_satisfied());
        assert!(outcome.missing().is_empty());
    }

    #[test]
    fn feature_outcome_uses_snake_case() {
        let json = serde_json::to_string(&FeatureOutcome::Missing).unwrap();
        assert_eq!(json, "\"missing\"");
    }

    #[test]
    fn status_ready_serializes_sets_as_arrays() {
        let ready = StatusReady::new(
            Status::new(0),
            2,
            feature_set([0_u32, 1]),
            feature_set([2_u32]),
        );
        let value = serde_json::to_value(&ready).unwrap();
        assert_eq!(value["status"], 0);
        assert_eq!(value["epoch"], 2);
        assert_eq!(value["satisfied"], serde_json::json!([0, 1]));
        assert_eq!(value["missing"], serde_json::json!([2]));
    }
}
