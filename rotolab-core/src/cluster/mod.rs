//! Monthly cluster builder — k-means++ over standardized features.
//!
//! Determinism rules: rows are processed in ascending instrument-id order,
//! the RNG is derived from (config, epoch), and equidistant centroids resolve
//! to the lower cluster index. Given equal inputs the partition is therefore
//! bit-identical across runs and thread counts.
//!
//! Hitting the iteration cap is not an error: the best-effort partition is
//! returned with `converged = false` and downstream records carry the flag.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::Rng;

use crate::config::ClusteringConfig;
use crate::domain::{ClusterAssignment, ClusterId, ClusterSet, InstrumentId};
use crate::error::EngineError;
use crate::features::FeatureVector;

type Row = [f64; 4];

/// Partition the universe for one monthly epoch.
///
/// `features` must already exclude instruments with insufficient history.
/// When the universe is smaller than `k`, the effective k shrinks to match.
pub fn build_clusters(
    features: &BTreeMap<InstrumentId, FeatureVector>,
    clustering: &ClusteringConfig,
    epoch: NaiveDate,
    rng: &mut StdRng,
) -> Result<ClusterSet, EngineError> {
    if features.is_empty() {
        return Err(EngineError::EmptyUniverse);
    }
    let ids: Vec<&InstrumentId> = features.keys().collect();
    let rows = standardize(
        &features
            .values()
            .map(|fv| fv.clustering_row())
            .collect::<Vec<_>>(),
    );
    let n = rows.len();
    let k = clustering.k.min(n);

    let mut centroids = seed_centroids(&rows, k, rng);
    let mut assignment = assign(&rows, &centroids);
    let mut converged = false;
    let mut iterations = 0;

    while iterations < clustering.max_iterations {
        iterations += 1;
        centroids = update_centroids(&rows, &assignment, k);
        let next = assign(&rows, &centroids);
        let changed = next
            .iter()
            .zip(&assignment)
            .filter(|(a, b)| a != b)
            .count();
        assignment = next;
        if (changed as f64 / n as f64) < clustering.shift_tolerance {
            converged = true;
            break;
        }
    }

    let mut assignments = BTreeMap::new();
    for (i, id) in ids.iter().enumerate() {
        let cluster = ClusterId(assignment[i]);
        assignments.insert(
            (*id).clone(),
            ClusterAssignment {
                instrument: (*id).clone(),
                cluster,
                label: clustering.label_for(cluster),
                distance: sq_dist(&rows[i], &centroids[assignment[i]]),
            },
        );
    }

    Ok(ClusterSet {
        epoch,
        k,
        assignments,
        converged,
        iterations,
    })
}

/// Z-score each column over the given rows. A degenerate column (zero
/// variance) standardizes to all zeros rather than dividing by zero.
fn standardize(rows: &[Row]) -> Vec<Row> {
    let n = rows.len();
    if n == 0 {
        return Vec::new();
    }
    let mut out = vec![[0.0; 4]; n];
    for d in 0..4 {
        let mean = rows.iter().map(|r| r[d]).sum::<f64>() / n as f64;
        let var = rows.iter().map(|r| (r[d] - mean).powi(2)).sum::<f64>() / n as f64;
        let sd = var.sqrt();
        if sd > 0.0 {
            for (i, row) in rows.iter().enumerate() {
                out[i][d] = (row[d] - mean) / sd;
            }
        }
    }
    out
}

fn sq_dist(a: &Row, b: &Row) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// k-means++ seeding: first centroid uniform, each next drawn with
/// probability proportional to squared distance from the nearest chosen one.
fn seed_centroids(rows: &[Row], k: usize, rng: &mut StdRng) -> Vec<Row> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(rows[rng.gen_range(0..rows.len())]);

    while centroids.len() < k {
        let weights: Vec<f64> = rows
            .iter()
            .map(|r| {
                centroids
                    .iter()
                    .map(|c| sq_dist(r, c))
                    .fold(f64::MAX, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            // Every row coincides with a centroid (duplicate data); cycle rows.
            let idx = centroids.len() % rows.len();
            centroids.push(rows[idx]);
            continue;
        }
        let mut target = rng.gen::<f64>() * total;
        let mut chosen = rows.len() - 1;
        for (i, &w) in weights.iter().enumerate() {
            if target < w {
                chosen = i;
                break;
            }
            target -= w;
        }
        centroids.push(rows[chosen]);
    }
    centroids
}

/// Nearest-centroid assignment. Strict `<` keeps the lower index on ties.
fn assign(rows: &[Row], centroids: &[Row]) -> Vec<usize> {
    rows.iter()
        .map(|row| {
            let mut best = 0usize;
            let mut best_d = f64::MAX;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = sq_dist(row, centroid);
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            best
        })
        .collect()
}

/// Mean of each cluster's members. An empty cluster is re-seeded at the row
/// farthest from its owning centroid (ties to the lower row index), so k is
/// preserved through the iteration.
fn update_centroids(rows: &[Row], assignment: &[usize], k: usize) -> Vec<Row> {
    let mut sums = vec![[0.0; 4]; k];
    let mut counts = vec![0usize; k];
    for (row, &c) in rows.iter().zip(assignment) {
        for d in 0..4 {
            sums[c][d] += row[d];
        }
        counts[c] += 1;
    }

    let mut centroids = vec![[0.0; 4]; k];
    for c in 0..k {
        if counts[c] > 0 {
            for d in 0..4 {
                centroids[c][d] = sums[c][d] / counts[c] as f64;
            }
        }
    }

    let mut taken: Vec<usize> = Vec::new();
    for c in 0..k {
        if counts[c] > 0 {
            continue;
        }
        let far = rows
            .iter()
            .enumerate()
            .filter(|(i, _)| !taken.contains(i))
            .max_by(|(i, a), (j, b)| {
                let da = sq_dist(a, &centroids[assignment[*i]]);
                let db = sq_dist(b, &centroids[assignment[*j]]);
                da.partial_cmp(&db)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(j.cmp(i))
            });
        if let Some((i, row)) = far {
            centroids[c] = *row;
            taken.push(i);
        }
    }
    centroids
}
