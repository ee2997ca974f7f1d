//! Clustering helpers backing the `kmeans` and `kmeans++` reference samplers.
//!
//! This module provides:
//! - `kmeans_lloyd`: full Lloyd k-means through smartcore, returning labels
//! - `kmeans_plus_plus`: D²-weighted seeding that returns the seed rows
//! - centroid, nearest-row and distinct-row utilities
//!
//! **DETERMINISTIC**: every random choice takes an explicit seed or RNG.

use std::collections::HashSet;

use log::{debug, trace};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use rayon::prelude::*;
use smartcore::cluster::kmeans::{KMeans, KMeansParameters};
use smartcore::linalg::basic::arrays::Array2;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::error::{RankMapError, Result};

/// Perform K-Means clustering using Lloyd's algorithm
///
/// # Arguments
/// * `rows` - Input samples, all of the same length
/// * `k` - Number of clusters
/// * `max_iter` - Maximum iterations for convergence
/// * `seed` - Random seed for reproducibility
///
/// # Returns
/// Vector of cluster assignments (0-indexed)
pub fn kmeans_lloyd(rows: &[&[f64]], k: usize, max_iter: usize, seed: u64) -> Result<Vec<usize>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let (n, f) = (rows.len(), rows[0].len());
    let k = k.min(n);

    // Flatten row-major data
    let x: DenseMatrix<f64> =
        DenseMatrix::from_iterator(rows.iter().flat_map(|row| row.iter().copied()), n, f, 0);

    let params = KMeansParameters {
        k,
        max_iter,
        seed: Some(seed),
    };

    let km: KMeans<f64, usize, DenseMatrix<f64>, Vec<usize>> = KMeans::fit(&x, params)
        .map_err(|e| RankMapError::Clustering(format!("fit with k={k}: {e}")))?;

    let labels: Vec<usize> = km
        .predict(&x)
        .map_err(|e| RankMapError::Clustering(format!("predict: {e}")))?;

    debug!("k-means: N={}, F={}, K={} fitted", n, f, k);
    Ok(labels)
}

/// Mean of the rows assigned to each cluster; `None` for empty clusters.
pub fn cluster_centroids(rows: &[&[f64]], assignments: &[usize], k: usize) -> Vec<Option<Vec<f64>>> {
    let f = rows.first().map(|r| r.len()).unwrap_or(0);

    (0..k)
        .into_par_iter()
        .map(|c| {
            let mut centroid = vec![0.0; f];
            let mut count = 0usize;

            for (row, &cluster) in rows.iter().zip(assignments) {
                if cluster == c {
                    for (acc, v) in centroid.iter_mut().zip(row.iter()) {
                        *acc += v;
                    }
                    count += 1;
                }
            }

            if count == 0 {
                return None;
            }
            for val in &mut centroid {
                *val /= count as f64;
            }
            Some(centroid)
        })
        .collect()
}

/// k-means++ seeding: the first seed is uniform, each further seed is drawn
/// with probability proportional to its squared distance to the closest seed
/// chosen so far. Returns the indices of the seed rows.
pub fn kmeans_plus_plus<R: Rng>(rows: &[&[f64]], k: usize, rng: &mut R) -> Result<Vec<usize>> {
    let n = rows.len();
    if k == 0 || n == 0 {
        return Ok(Vec::new());
    }
    if k > n {
        return Err(RankMapError::Configuration(format!(
            "kmeans++ asked for {k} seeds from {n} rows"
        )));
    }

    let first = rng.random_range(0..n);
    let mut seeds = Vec::with_capacity(k);
    seeds.push(first);

    let mut closest: Vec<f64> = rows
        .par_iter()
        .map(|row| squared_euclidean(row, rows[first]))
        .collect();

    while seeds.len() < k {
        let total: f64 = closest.iter().sum();
        if total <= 0.0 {
            return Err(RankMapError::Configuration(format!(
                "kmeans++ ran out of distinct rows after {} of {} seeds",
                seeds.len(),
                k
            )));
        }
        let dist = WeightedIndex::new(&closest)
            .map_err(|e| RankMapError::Configuration(format!("kmeans++ weights: {e}")))?;
        let next = dist.sample(rng);
        trace!(
            "kmeans++ seed {} -> row {} (d²={:.4e})",
            seeds.len(),
            next,
            closest[next]
        );
        seeds.push(next);

        let chosen = rows[next];
        closest
            .par_iter_mut()
            .zip(rows.par_iter())
            .for_each(|(best, row)| {
                let d2 = squared_euclidean(row, chosen);
                if d2 < *best {
                    *best = d2;
                }
            });
    }

    Ok(seeds)
}

/// Index of and squared distance to the row closest to `query`.
pub fn nearest_centroid(query: &[f64], rows: &[&[f64]]) -> (usize, f64) {
    let mut best_idx = 0;
    let mut best_dist2 = f64::INFINITY;

    for (i, c) in rows.iter().enumerate() {
        let d2 = squared_euclidean(query, c);
        if d2 < best_dist2 {
            best_dist2 = d2;
            best_idx = i;
        }
    }

    (best_idx, best_dist2)
}

/// Number of pairwise distinct rows (bitwise comparison).
pub fn distinct_rows(rows: &[&[f64]]) -> usize {
    rows.iter()
        .map(|row| row.iter().map(|v| v.to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

#[inline]
pub fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
