//! Density-based spatial clustering over great-circle distance
//!
//! Classic DBSCAN with the neighborhood defined by haversine distance.
//! Neighbor lists are precomputed in parallel with rayon; the expansion
//! itself runs sequentially in index order, which makes cluster membership
//! deterministic for a fixed input (label numbering follows first-visit
//! order).

use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::core_types::geo::{haversine_distance_m, GeoPoint};

/// Cluster labels per input point; `None` marks noise.
///
/// `min_samples` is the density threshold counting the point itself, so
/// `min_samples = 2` clusters any pair within `epsilon_km`.
pub fn dbscan(points: &[GeoPoint], epsilon_km: f64, min_samples: usize) -> Vec<Option<usize>> {
    let n = points.len();
    if n == 0 {
        return Vec::new();
    }

    let epsilon_m = epsilon_km * 1000.0;
    let neighbors: Vec<Vec<usize>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .filter(|&j| haversine_distance_m(points[i], points[j]) <= epsilon_m)
                .collect()
        })
        .collect();

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited: Vec<bool> = vec![false; n];
    let mut next_label = 0;

    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;

        if neighbors[start].len() < min_samples {
            continue; // noise unless later reached from a core point
        }

        let label = next_label;
        next_label += 1;
        labels[start] = Some(label);

        // Seed set expansion; FxHashSet keeps membership checks cheap
        let mut queue: Vec<usize> = neighbors[start].clone();
        let mut queued: FxHashSet<usize> = queue.iter().copied().collect();
        let mut cursor = 0;

        while cursor < queue.len() {
            let point = queue[cursor];
            cursor += 1;

            if labels[point].is_none() {
                labels[point] = Some(label);
            }
            if visited[point] {
                continue;
            }
            visited[point] = true;

            if neighbors[point].len() >= min_samples {
                for &next in &neighbors[point] {
                    if queued.insert(next) {
                        queue.push(next);
                    }
                }
            }
        }
    }

    labels
}
