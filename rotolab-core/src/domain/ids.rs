use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument identifier (ticker or basket code).
///
/// Ordered and hashable. Ascending-id order is the deterministic tie-break of
/// last resort throughout the engine: ranking, centroid assignment, and
/// allocation all fall back to it so that equal inputs produce identical
/// outputs on every run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentId(pub String);

impl InstrumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Cluster identifier within one monthly epoch's cluster set.
///
/// Indices are 0..k and only meaningful alongside the epoch that produced
/// them; cluster 2 in March and cluster 2 in April are unrelated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub usize);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Deterministic configuration hash (BLAKE3 over canonical JSON).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigHash(pub String);

impl ConfigHash {
    /// Hash any serializable config into a content-addressed identifier.
    ///
    /// serde_json serializes struct fields in declaration order, so the same
    /// config value always produces the same hash across builds and platforms.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(value)?;
        let hash = blake3::hash(json.as_bytes());
        Ok(Self(hash.to_hex().to_string()))
    }

    /// Short prefix for display (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
