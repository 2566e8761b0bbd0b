//! k-means clustering over session-level embeddings, with dominant-tag (or
//! dominant-project) labeling and a silhouette-score quality metric (§4.12).

use crate::core::{ClusterAssignment, Session};
use crate::error::Result;
use crate::util::atomic_write;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Default cluster count, clamped to the available session count.
pub const DEFAULT_K: usize = 10;
const MAX_ITERATIONS: usize = 50;

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| squared_distance(point, a).total_cmp(&squared_distance(point, b)))
        .map_or(0, |(i, _)| i)
}

fn recompute_centroids(points: &[Vec<f32>], assignments: &[usize], k: usize, dims: usize) -> Vec<Vec<f32>> {
    let mut sums = vec![vec![0.0f32; dims]; k];
    let mut counts = vec![0usize; k];
    for (point, &cluster) in points.iter().zip(assignments.iter()) {
        counts[cluster] += 1;
        for (s, x) in sums[cluster].iter_mut().zip(point.iter()) {
            *s += x;
        }
    }
    sums.into_iter()
        .zip(counts)
        .enumerate()
        .map(|(i, (mut sum, count))| {
            if count == 0 {
                return points.get(i % points.len().max(1)).cloned().unwrap_or_default();
            }
            for s in &mut sum {
                *s /= count as f32;
            }
            sum
        })
        .collect()
}

/// Runs k-means over `points`, returning the 0-based cluster assignment
/// for each input point in order. `k` is clamped to `[1, points.len()]`.
/// Centroids are seeded by a random, non-repeating sample of the points.
#[must_use]
pub fn kmeans(points: &[Vec<f32>], k: usize) -> Vec<usize> {
    if points.is_empty() {
        return Vec::new();
    }
    let k = k.clamp(1, points.len());
    let dims = points[0].len();

    let mut rng = rand::rng();
    let mut centroids: Vec<Vec<f32>> = points.choose_multiple(&mut rng, k).cloned().collect();

    let mut assignments = vec![0usize; points.len()];
    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let nearest = nearest_centroid(point, &centroids);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        centroids = recompute_centroids(points, &assignments, k, dims);
    }
    assignments
}

/// Mean intra-cluster vs. nearest-other-cluster separation, in `[-1, 1]`;
/// higher is better. Returns `0.0` for fewer than 2 clusters or points.
#[must_use]
pub fn silhouette_score(points: &[Vec<f32>], assignments: &[usize], k: usize) -> f64 {
    if points.len() < 2 || k < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut counted = 0usize;
    for (i, point) in points.iter().enumerate() {
        let own_cluster = assignments[i];
        let mut same_cluster_dist = 0.0;
        let mut same_count = 0usize;
        let mut other_cluster_dist: HashMap<usize, (f64, usize)> = HashMap::new();

        for (j, other) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            let dist = f64::from(squared_distance(point, other).sqrt());
            if assignments[j] == own_cluster {
                same_cluster_dist += dist;
                same_count += 1;
            } else {
                let entry = other_cluster_dist.entry(assignments[j]).or_insert((0.0, 0));
                entry.0 += dist;
                entry.1 += 1;
            }
        }

        if same_count == 0 {
            continue;
        }
        let a = same_cluster_dist / same_count as f64;
        let b = other_cluster_dist
            .values()
            .map(|(sum, count)| sum / *count as f64)
            .fold(f64::INFINITY, f64::min);
        if !b.is_finite() {
            continue;
        }
        let s = (b - a) / a.max(b);
        total += s;
        counted += 1;
    }

    if counted == 0 {
        0.0
    } else {
        total / counted as f64
    }
}

fn dominant_label(session: &Session) -> String {
    session.tags.iter().next().cloned().unwrap_or_else(|| session.project.clone())
}

/// Clusters `sessions` (with their session-level embeddings) into `k`
/// groups (clamped to the session count) and returns one assignment per
/// session plus the overall silhouette score.
#[must_use]
pub fn cluster_sessions(sessions: &[(Session, Vec<f32>)], k: usize) -> (Vec<ClusterAssignment>, f64) {
    if sessions.is_empty() {
        return (Vec::new(), 0.0);
    }
    let points: Vec<Vec<f32>> = sessions.iter().map(|(_, v)| v.clone()).collect();
    let k = k.clamp(1, sessions.len());
    let assignments = kmeans(&points, k);
    let score = silhouette_score(&points, &assignments, k);

    let mut labels: HashMap<usize, HashMap<String, usize>> = HashMap::new();
    for ((session, _), &cluster_id) in sessions.iter().zip(assignments.iter()) {
        *labels.entry(cluster_id).or_default().entry(dominant_label(session)).or_insert(0) += 1;
    }
    let cluster_labels: HashMap<usize, String> = labels
        .into_iter()
        .map(|(cluster_id, counts)| {
            let label = counts.into_iter().max_by_key(|(_, count)| *count).map_or_else(String::new, |(label, _)| label);
            (cluster_id, label)
        })
        .collect();

    let result = sessions
        .iter()
        .zip(assignments.iter())
        .map(|((session, _), &cluster_id)| ClusterAssignment {
            session_id: session.session_id.clone(),
            cluster_id,
            label: cluster_labels.get(&cluster_id).cloned().unwrap_or_default(),
        })
        .collect();

    (result, score)
}

/// Snapshot of the most recent clustering run, persisted to `clusters.json`
/// so `get-session-clusters`/`get-cluster-sessions` can serve without
/// recomputing on every call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Every session's cluster assignment as of the last `cluster-sessions` run.
    pub assignments: Vec<ClusterAssignment>,
    /// Silhouette score of that run.
    pub silhouette: f64,
}

impl ClusterSnapshot {
    /// Loads the snapshot from `path`, defaulting to empty if absent/corrupt.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        std::fs::read(path).ok().and_then(|b| serde_json::from_slice(&b).ok()).unwrap_or_default()
    }

    /// Atomically rewrites `path` with this snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the rename fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| crate::error::StorageError::Serialization(e.to_string()))?;
        atomic_write(path, &bytes)?;
        Ok(())
    }
}
