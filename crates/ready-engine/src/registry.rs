use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use ready_protocol::{FeatureId, FeatureSet, InterfaceName, ReadinessError, ReadinessResult, Status};

use crate::probe::Probe;

/// Registry entry describing how and when a feature is probed.
#[derive(Clone)]
pub struct Introspectable {
    makes_sense_for_statuses: BTreeSet<Status>,
    depends_on_features: FeatureSet,
    depends_on_interfaces: BTreeSet<InterfaceName>,
    probe: Arc<dyn Probe>,
}

impl Introspectable {
    pub fn new<S, P>(statuses: S, probe: P) -> Self
    where
        S: IntoIterator<Item = Status>,
        P: Probe + 'static,
    {
        Self {
            makes_sense_for_statuses: statuses.into_iter().collect(),
            depends_on_features: FeatureSet::new(),
            depends_on_interfaces: BTreeSet::new(),
            probe: Arc::new(probe),
        }
    }

    pub fn depends_on_features<I, F>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FeatureId>,
    {
        self.depends_on_features
            .extend(features.into_iter().map(Into::into));
        self
    }

    pub fn depends_on_interfaces<I, N>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<InterfaceName>,
    {
        self.depends_on_interfaces
            .extend(interfaces.into_iter().map(Into::into));
        self
    }

    pub fn makes_sense_for(&self, status: Status) -> bool {
        self.makes_sense_for_statuses.contains(&status)
    }

    pub fn statuses(&self) -> &BTreeSet<Status> {
        &self.makes_sense_for_statuses
    }

    pub fn feature_dependencies(&self) -> &FeatureSet {
        &self.depends_on_features
    }

    pub fn interface_dependencies(&self) -> &BTreeSet<InterfaceName> {
        &self.depends_on_interfaces
    }

    pub fn probe(&self) -> Arc<dyn Probe> {
        Arc::clone(&self.probe)
    }
}

impl fmt::Debug for Introspectable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Introspectable")
            .field("makes_sense_for_statuses", &self.makes_sense_for_statuses)
            .field("depends_on_features", &self.depends_on_features)
            .field("depends_on_interfaces", &self.depends_on_interfaces)
            .finish_non_exhaustive()
    }
}

/// Immutable feature table shared by an engine and its in-flight probes.
///
/// Construction validates the table: the core feature must be present, every
/// feature dependency must be registered, and the dependency graph must be
/// acyclic (a cycle would otherwise stall resolution forever). Registering
/// the same id twice keeps the last entry.
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    features: IndexMap<FeatureId, Introspectable>,
    supported_statuses: BTreeSet<Status>,
}

impl FeatureRegistry {
    pub fn new<I>(features: I) -> ReadinessResult<Self>
    where
        I: IntoIterator<Item = (FeatureId, Introspectable)>,
    {
        let features: IndexMap<FeatureId, Introspectable> = features.into_iter().collect();

        if !features.contains_key(&FeatureId::CORE) {
            return Err(ReadinessError::MissingCoreFeature);
        }

        for (feature, introspectable) in &features {
            if let Some(dependency) = introspectable
                .depends_on_features
                .iter()
                .find(|dependency| !features.contains_key(*dependency))
            {
                return Err(ReadinessError::UnknownDependency {
                    feature: *feature,
                    dependency: *dependency,
                });
            }
        }

        if let Some(cycle) = find_cycle(&features) {
            return Err(ReadinessError::DependencyCycle(cycle));
        }

        let supported_statuses = features
            .values()
            .flat_map(|introspectable| introspectable.makes_sense_for_statuses.iter().copied())
            .collect();

        Ok(Self {
            features,
            supported_statuses,
        })
    }

    pub fn get(&self, feature: FeatureId) -> Option<&Introspectable> {
        self.features.get(&feature)
    }

    pub fn contains(&self, feature: FeatureId) -> bool {
        self.features.contains_key(&feature)
    }

    /// Union of every feature's meaningful statuses.
    pub fn supported_statuses(&self) -> &BTreeSet<Status> {
        &self.supported_statuses
    }

    pub fn supports(&self, status: Status) -> bool {
        self.supported_statuses.contains(&status)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, &Introspectable)> {
        self.features
            .iter()
            .map(|(feature, introspectable)| (*feature, introspectable))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn find_cycle(features: &IndexMap<FeatureId, Introspectable>) -> Option<Vec<FeatureId>> {
    let mut marks = HashMap::new();
    let mut path = Vec::new();
    features
        .keys()
        .find_map(|feature| visit(*feature, features, &mut marks, &mut path))
}

fn visit(
    feature: FeatureId,
    features: &IndexMap<FeatureId, Introspectable>,
    marks: &mut HashMap<FeatureId, Mark>,
    path: &mut Vec<FeatureId>,
) -> Option<Vec<FeatureId>> {
    match marks.get(&feature) {
        Some(Mark::Done) => return None,
        Some(Mark::Visiting) => {
            let start = path.iter().position(|f| *f == feature).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(feature);
            return Some(cycle);
        }
        None => {}
    }

    marks.insert(feature, Mark::Visiting);
    path.push(feature);
    if let Some(introspectable) = features.get(&feature) {
        for dependency in &introspectable.depends_on_features {
            if let Some(cycle) = visit(*dependency, features, marks, path) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    marks.insert(feature, Mark::Done);
    None
}

#[cfg(test)]
mod tests {
    use ready_protocol::{FeatureId, ReadinessError, Status};

    use super::*;
    use crate::probe::ProbeContext;

    fn noop() -> impl Probe {
        |ctx: ProbeContext| {
            let _ = ctx.complete(true);
        }
    }

    fn feature(id: u32, statuses: &[u32]) -> (FeatureId, Introspectable) {
        (
            FeatureId::new(id),
            Introspectable::new(statuses.iter().copied().map(Status::new), noop()),
        )
    }

    #[test]
    fn registry_requires_core_feature() {
        let error = FeatureRegistry::new([feature(1, &[0])]).unwrap_err();
        assert_eq!(error, ReadinessError::MissingCoreFeature);
    }

    #[test]
    fn supported_statuses_are_the_union() {
        let registry = FeatureRegistry::new([feature(0, &[0, 1]), feature(1, &[2])]).unwrap();
        let statuses: Vec<u32> = registry
            .supported_statuses()
            .iter()
            .map(|s| s.get())
            .collect();
        assert_eq!(statuses, vec![0, 1, 2]);
        assert!(registry.supports(Status::new(2)));
        assert!(!registry.supports(Status::new(3)));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registry_rejects_unknown_dependency() {
        let (id, introspectable) = feature(1, &[0]);
        let error =
            FeatureRegistry::new([feature(0, &[0]), (id, introspectable.depends_on_features([9_u32]))])
                .unwrap_err();
        assert_eq!(
            error,
            ReadinessError::UnknownDependency {
                feature: FeatureId::new(1),
                dependency: FeatureId::new(9),
            }
        );
    }

    #[test]
    fn registry_rejects_dependency_cycle() {
        let (one, first) = feature(1, &[0]);
        let (two, second) = feature(2, &[0]);
        let error = FeatureRegistry::new([
            feature(0, &[0]),
            (one, first.depends_on_features([0_u32, 2])),
            (two, second.depends_on_features([1_u32])),
        ])
        .unwrap_err();
        assert_eq!(
            error,
            ReadinessError::DependencyCycle(vec![
                FeatureId::new(1),
                FeatureId::new(2),
                FeatureId::new(1)
            ])
        );
    }

    #[test]
    fn registry_rejects_self_dependency() {
        let (one, first) = feature(1, &[0]);
        let error =
            FeatureRegistry::new([feature(0, &[0]), (one, first.depends_on_features([1_u32]))])
                .unwrap_err();
        assert!(matches!(error, ReadinessError::DependencyCycle(path) if path.len() == 2));
    }

    #[test]
    fn introspectable_records_dependencies() {
        let (_, introspectable) = feature(3, &[1]);
        let introspectable = introspectable
            .depends_on_features([0_u32])
            .depends_on_interfaces(["org.example.Iface"]);
        assert!(introspectable.makes_sense_for(Status::new(1)));
        assert!(!introspectable.makes_sense_for(Status::new(0)));
        assert!(introspectable.feature_dependencies().contains(&FeatureId::CORE));
        assert!(
            introspectable
                .interface_dependencies()
                .contains(&InterfaceName::new("org.example.Iface"))
        );
    }
}
