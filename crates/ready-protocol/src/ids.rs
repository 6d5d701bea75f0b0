//! Identifier types for readiness tracking.
//!
//! Features and statuses are small integers on the wire; interface names,
//! bus names and object paths are opaque strings (serde-transparent).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

macro_rules! typed_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_name!(
    /// Name of a protocol interface implemented by a remote object.
    InterfaceName
);
typed_name!(
    /// Well-known or unique bus name owning a remote object.
    BusName
);
typed_name!(
    /// Object path of a remote object on its bus.
    ObjectPath
);

/// Identifier of a probeable feature. `0` is reserved for the core feature.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FeatureId(u32);

impl FeatureId {
    /// The core feature, implicitly requested whenever the status is supported.
    pub const CORE: FeatureId = FeatureId(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_core(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_core() {
            write!(f, "feature:core")
        } else {
            write!(f, "feature:{}", self.0)
        }
    }
}

impl From<u32> for FeatureId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Remote object lifecycle/connectivity state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Status(u32);

impl Status {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status:{}", self.0)
    }
}

impl From<u32> for Status {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Ordered feature set. Ordering keeps equality and iteration deterministic.
pub type FeatureSet = BTreeSet<FeatureId>;

/// Collect anything convertible into feature ids into a [`FeatureSet`].
pub fn feature_set<I, F>(features: I) -> FeatureSet
where
    I: IntoIterator<Item = F>,
    F: Into<FeatureId>,
{
    features.into_iter().map(Into::into).collect()
}
