//! The set of measurement names the engine will accept.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Measurement names accepted from the transport.
///
/// Anything outside this set is dropped before it can create state, so a
/// malformed or hostile topic cannot grow the registry without bound.
/// Extending the set is a configuration change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnownMeasurements(BTreeSet<String>);

impl KnownMeasurements {
    /// Build a set from any list of names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Check whether a measurement name is known.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Iterate over the known names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of known names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for KnownMeasurements {
    fn default() -> Self {
        Self::new(["temperature", "humidity"])
    }
}
