//! Cluster assignments — epoch-versioned output of the monthly re-clustering.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::{ClusterId, InstrumentId};

/// One instrument's cluster membership within a specific monthly epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub instrument: InstrumentId,
    pub cluster: ClusterId,
    pub label: String,
    /// Squared distance to the owning centroid in standardized feature space.
    pub distance: f64,
}

/// The complete cluster partition for one monthly epoch.
///
/// Versioned record, never mutated: each monthly epoch produces a new set
/// that supersedes the previous one atomically. Assignments are keyed by
/// instrument in a BTreeMap so serialization order (and therefore the
/// content digest) is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSet {
    /// Monthly epoch (the month-end trading date) this partition belongs to.
    pub epoch: NaiveDate,
    pub k: usize,
    pub assignments: BTreeMap<InstrumentId, ClusterAssignment>,
    /// False when Lloyd iteration hit the cap before assignments settled.
    /// A non-converged partition is still used, but every downstream record
    /// carries the degraded flag.
    pub converged: bool,
    pub iterations: usize,
}

impl ClusterSet {
    /// Look up an instrument's cluster in this epoch.
    pub fn cluster_of(&self, id: &InstrumentId) -> Option<ClusterId> {
        self.assignments.get(id).map(|a| a.cluster)
    }

    /// Number of instruments assigned to each cluster, indexed by cluster id.
    pub fn occupancy(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.k];
        for a in self.assignments.values() {
            if a.cluster.0 < self.k {
                counts[a.cluster.0] += 1;
            }
        }
        counts
    }

    /// BLAKE3 digest of the canonical serialization, for audit payloads.
    pub fn digest(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}
