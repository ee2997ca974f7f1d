//! Pairwise rank matrices between all pixels and the reference set.
//!
//! For a reference `r` and a metric, every foreground pixel receives its
//! 0-based position among the foreground pixels sorted by distance to `r`
//! (double argsort per column, stable: equal distances keep pixel-index
//! order). Background pixels are not ranked and hold 0. The optimization
//! target is the element-wise maximum of the cosine and Chebyshev rank
//! matrices, so a pair only counts as close when both metrics agree.
//!
//! ```
//! use rankmap::core::SpectralCube;
//! use rankmap::ranking::TargetRanks;
//!
//! let cube = SpectralCube::from_pixels(
//!     1,
//!     3,
//!     vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![0.0, 1.0]],
//! )
//! .unwrap();
//! let targets = TargetRanks::build(&cube, &[0]).unwrap();
//!
//! assert_eq!(targets.shape(), (3, 1));
//! assert_eq!(targets.combined().get(0, 0), 0);
//! assert_eq!(targets.combined().get(2, 0), 2);
//! ```

use std::cmp::Ordering;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::SpectralCube;
use crate::error::{RankMapError, Result};

/// Dissimilarity between two spectra.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// `1 − cos(a, b)`, clamped to `[0, 2]`; a zero vector is at distance 1
    /// from everything.
    Cosine,
    /// `max_k |a_k − b_k|`.
    Chebyshev,
}

impl Metric {
    #[inline]
    pub fn distance(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Metric::Cosine => {
                let mut dot = 0.0;
                let mut na = 0.0;
                let mut nb = 0.0;
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                if na <= 0.0 || nb <= 0.0 {
                    return 1.0;
                }
                (1.0 - dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 2.0)
            }
            Metric::Chebyshev => a
                .iter()
                .zip(b)
                .fold(0.0_f64, |acc, (x, y)| acc.max((x - y).abs())),
        }
    }
}

/// Dense row-major `rows × cols` matrix of integer ranks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankMatrix {
    rows: usize,
    cols: usize,
    data: Vec<usize>,
}

impl RankMatrix {
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> usize {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[usize] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    #[inline]
    pub fn data(&self) -> &[usize] {
        &self.data
    }

    pub fn column(&self, col: usize) -> Vec<usize> {
        (0..self.rows).map(|r| self.get(r, col)).collect()
    }

    /// Element-wise maximum of two matrices of identical shape.
    pub fn max(&self, other: &RankMatrix) -> Result<RankMatrix> {
        if self.shape() != other.shape() {
            return Err(RankMapError::Shape {
                expected: self.data.len(),
                got: other.data.len(),
            });
        }
        let data = self
            .data
            .par_iter()
            .zip(other.data.par_iter())
            .map(|(a, b)| *a.max(b))
            .collect();
        Ok(RankMatrix {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }
}

/// Double argsort of one vector: position of every entry in the stable
/// ascending order.
pub fn rank_vector(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });
    let mut ranks = vec![0usize; values.len()];
    for (position, &i) in order.iter().enumerate() {
        ranks[i] = position;
    }
    ranks
}

/// Row-major `N × R` distances between every pixel and every reference.
pub fn distance_matrix(cube: &SpectralCube, references: &[usize], metric: Metric) -> Vec<f64> {
    let refs: Vec<&[f64]> = references.iter().map(|&r| cube.pixel(r)).collect();
    cube.data()
        .par_chunks_exact(cube.channels())
        .flat_map_iter(|row| refs.iter().map(move |r| metric.distance(row, r)))
        .collect()
}

/// Ranks of each column of a row-major `rows × cols` matrix.
pub fn column_ranks(values: &[f64], rows: usize, cols: usize) -> RankMatrix {
    masked_column_ranks(values, &vec![true; rows], cols)
}

/// Ranks of each column taken over the rows where `mask` is set.
///
/// Unmasked rows take no part in the ordering and hold rank 0.
pub fn masked_column_ranks(values: &[f64], mask: &[bool], cols: usize) -> RankMatrix {
    let rows = mask.len();
    let members: Vec<usize> = (0..rows).filter(|&r| mask[r]).collect();
    let per_column: Vec<Vec<usize>> = (0..cols)
        .into_par_iter()
        .map(|c| {
            let column: Vec<f64> = members.iter().map(|&r| values[r * cols + c]).collect();
            rank_vector(&column)
        })
        .collect();

    let mut data = vec![0usize; rows * cols];
    for (c, ranks) in per_column.iter().enumerate() {
        for (&r, &rank) in members.iter().zip(ranks) {
            data[r * cols + c] = rank;
        }
    }
    RankMatrix { rows, cols, data }
}

/// Rank matrix of `cube` against `references` under one metric, ranked over
/// the foreground only.
pub fn metric_ranks(cube: &SpectralCube, references: &[usize], metric: Metric) -> RankMatrix {
    let distances = distance_matrix(cube, references, metric);
    masked_column_ranks(&distances, &cube.foreground_mask(), references.len())
}

/// Optimization target, fixed for the lifetime of a bound image.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetRanks {
    combined: RankMatrix,
    cosine: RankMatrix,
    weights: Vec<f64>,
}

impl TargetRanks {
    /// Builds the combined (max of cosine and Chebyshev) rank tensor.
    ///
    /// Background pixels are left out of every ordering; their ranks and
    /// weights are zero. Fails with `DegenerateInput` for an empty reference set.
    pub fn build(cube: &SpectralCube, references: &[usize]) -> Result<Self> {
        if references.is_empty() {
            return Err(RankMapError::DegenerateInput(
                "reference set is empty (no foreground pixel was sampled)".to_string(),
            ));
        }
        let n = cube.npixels();
        if let Some(&bad) = references.iter().find(|&&r| r >= n) {
            return Err(RankMapError::Configuration(format!(
                "reference index {bad} outside an image of {n} pixels"
            )));
        }
        info!(
            "Building target ranks: {} pixels x {} references",
            n,
            references.len()
        );

        let cosine = metric_ranks(cube, references, Metric::Cosine);
        let chebyshev = metric_ranks(cube, references, Metric::Chebyshev);
        let combined = cosine.max(&chebyshev)?;

        let weights: Vec<f64> = combined
            .data()
            .par_iter()
            .map(|&rank| (rank as f64) * (rank as f64))
            .collect();

        debug!(
            "Target ranks built: max rank {}, weight mass {:.4e}",
            combined.data().iter().max().copied().unwrap_or(0),
            weights.iter().sum::<f64>()
        );

        Ok(Self {
            combined,
            cosine,
            weights,
        })
    }

    /// `(N, R)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.combined.shape()
    }

    /// Max of cosine and Chebyshev ranks.
    #[inline]
    pub fn combined(&self) -> &RankMatrix {
        &self.combined
    }

    /// Cosine-only ranks (Spearman target).
    #[inline]
    pub fn cosine(&self) -> &RankMatrix {
        &self.cosine
    }

    /// Squared combined ranks, row-major.
    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}
