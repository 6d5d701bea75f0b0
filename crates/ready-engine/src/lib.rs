//! # ready-engine — feature readiness engine
//!
//! Tracks which features of a remote object have been requested, probes them
//! in dependency order (independent features concurrently), follows the remote
//! status as it changes, and finishes become-ready handles once their feature
//! set can no longer change in the current status.
//!
//! - [`registry`] — `FeatureRegistry`, `Introspectable`
//! - [`probe`] — `Probe`, `ProbeContext`, `AsyncProbe`
//! - [`pending`] — `PendingReady` become-ready handle
//! - [`helper`] — `ReadinessHelper`, the scheduler and status controller
//! - [`state`] — `ReadinessSnapshot`

pub mod config;
pub mod helper;
pub mod pending;
pub mod probe;
pub mod registry;
pub mod state;

pub use config::ReadinessConfig;
pub use helper::ReadinessHelper;
pub use pending::PendingReady;
pub use probe::{AsyncProbe, Probe, ProbeContext, Spawned, spawned};
pub use registry::{FeatureRegistry, Introspectable};
pub use state::ReadinessSnapshot;
