//! # ready-protocol — shared readiness contract
//!
//! This crate defines the value types every readiness component agrees on:
//! feature and status identifiers, the per-feature outcome of a become-ready
//! request, the status-ready notification, and the error taxonomy.
//!
//! It is intentionally dependency-light (no tokio) so proxies, transports and
//! test harnesses can depend on it without pulling in the engine.
//!
//! ## Module Overview
//!
//! - [`ids`] — `FeatureId`, `Status`, interface/bus/object-path names, `FeatureSet`
//! - [`event`] — `FeatureOutcome`, `ReadyOutcome`, `StatusReady`
//! - [`error`] — `ReadinessError`, `ReadinessResult`

pub mod error;
pub mod event;
pub mod ids;

// Re-export the most commonly used types at the crate root.
pub use error::{ReadinessError, ReadinessResult};
pub use event::{FeatureOutcome, ReadyOutcome, StatusReady};
pub use ids::{BusName, FeatureId, FeatureSet, InterfaceName, ObjectPath, Status, feature_set};
