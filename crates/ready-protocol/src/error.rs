//! Error types for the readiness contract.

use thiserror::Error;

use crate::ids::FeatureId;

/// Errors surfaced by registries, readiness engines and become-ready handles.
///
/// A feature ending up missing is never an error; it is reported through
/// [`crate::ReadyOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    #[error("registry has no introspectable for the core feature")]
    MissingCoreFeature,
    #[error("feature {feature} depends on unregistered feature {dependency}")]
    UnknownDependency {
        feature: FeatureId,
        dependency: FeatureId,
    },
    #[error("feature dependency cycle: {}", render_path(.0))]
    DependencyCycle(Vec<FeatureId>),
    #[error("unknown feature requested: {0}")]
    UnknownFeature(FeatureId),
    #[error("readiness invariant broken: {0}")]
    InvariantBroken(String),
    #[error("proxy invalidated: {name}: {message}")]
    Invalidated { name: String, message: String },
    #[error("readiness helper has been dropped")]
    HelperDropped,
}

impl ReadinessError {
    pub fn invalidated(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalidated {
            name: name.into(),
            message: message.into(),
        }
    }
}

fn render_path(path: &[FeatureId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Convenience result type for readiness operations.
pub type ReadinessResult<T> = Result<T, ReadinessError>;
