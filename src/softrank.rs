//! Differentiable ranks by projection onto the permutahedron.
//!
//! For `θ ∈ ℝⁿ` and a strength `ε > 0` the soft rank is the Euclidean
//! projection of `θ/ε` onto the convex hull of all permutations of
//! `(n, n−1, …, 1)`. The projection reduces to a decreasing isotonic
//! regression on the sorted input, solved exactly by pool-adjacent-violators
//! in `O(n log n)`.
//!
//! Properties relied on by the loss engine:
//! - ranks are 1-based and ascending: the smallest entry gets the smallest rank
//! - the map is monotone in `θ` and keeps `Σ ranks = n(n+1)/2`
//! - `ε → 0` recovers exact ranks, large `ε` flattens towards `(n+1)/2`
//! - the Jacobian is block diagonal over the PAV blocks, so the
//!   vector-Jacobian product is `(g_i − mean_{block(i)} g) / ε`
//!
//! ```
//! use rankmap::softrank::SoftRank;
//!
//! let soft = SoftRank::forward(&[0.3, 0.1, 0.2], 1e-3);
//! let ranks = soft.ranks();
//! assert!((ranks[0] - 3.0).abs() < 1e-9);
//! assert!((ranks[1] - 1.0).abs() < 1e-9);
//! assert!((ranks[2] - 2.0).abs() < 1e-9);
//! ```

use std::cmp::Ordering;

use log::trace;
use rayon::prelude::*;

use crate::error::{RankMapError, Result};

#[derive(Clone, Copy, Debug)]
struct Block {
    sum: f64,
    len: usize,
}

impl Block {
    #[inline]
    fn mean(&self) -> f64 {
        self.sum / self.len as f64
    }
}

/// Non-increasing least-squares fit of `y`, returned as its blocks in order.
fn pav_decreasing(y: &[f64]) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(y.len());
    for &value in y {
        blocks.push(Block { sum: value, len: 1 });
        while blocks.len() > 1 {
            let last = blocks[blocks.len() - 1];
            let prev = blocks[blocks.len() - 2];
            if prev.mean() > last.mean() {
                break;
            }
            blocks.pop();
            if let Some(merged) = blocks.last_mut() {
                merged.sum += last.sum;
                merged.len += last.len;
            }
        }
    }
    blocks
}

/// Soft ranks of one vector together with what the backward pass needs.
#[derive(Clone, Debug)]
pub struct SoftRank {
    ranks: Vec<f64>,
    /// PAV block of every original entry.
    block_of: Vec<usize>,
    block_len: Vec<usize>,
    strength: f64,
}

impl SoftRank {
    /// Soft ranks of `theta` at regularization `strength` (> 0).
    pub fn forward(theta: &[f64], strength: f64) -> Self {
        let n = theta.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            theta[b]
                .partial_cmp(&theta[a])
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });

        let scaled: Vec<f64> = order.iter().map(|&i| theta[i] / strength).collect();
        let residual: Vec<f64> = scaled
            .iter()
            .enumerate()
            .map(|(k, s)| s - (n - k) as f64)
            .collect();
        let blocks = pav_decreasing(&residual);

        let mut ranks = vec![0.0; n];
        let mut block_of = vec![0usize; n];
        let mut block_len = Vec::with_capacity(blocks.len());
        let mut k = 0;
        for (b, block) in blocks.iter().enumerate() {
            let fitted = block.mean();
            for _ in 0..block.len {
                let i = order[k];
                ranks[i] = scaled[k] - fitted;
                block_of[i] = b;
                k += 1;
            }
            block_len.push(block.len);
        }

        Self {
            ranks,
            block_of,
            block_len,
            strength,
        }
    }

    #[inline]
    pub fn ranks(&self) -> &[f64] {
        &self.ranks
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Number of PAV blocks; equals `len()` when ranks are exact.
    pub fn block_count(&self) -> usize {
        self.block_len.len()
    }

    /// Vector-Jacobian product: gradient with respect to `theta`.
    pub fn backward(&self, grad: &[f64]) -> Result<Vec<f64>> {
        if grad.len() != self.ranks.len() {
            return Err(RankMapError::Shape {
                expected: self.ranks.len(),
                got: grad.len(),
            });
        }
        let mut block_sum = vec![0.0; self.block_len.len()];
        for (g, &b) in grad.iter().zip(&self.block_of) {
            block_sum[b] += g;
        }
        Ok(grad
            .iter()
            .zip(&self.block_of)
            .map(|(g, &b)| (g - block_sum[b] / self.block_len[b] as f64) / self.strength)
            .collect())
    }
}

/// Column-wise soft ranks of a row-major `rows × cols` matrix.
///
/// Only member rows are ranked. The others read as rank 0 and receive no
/// gradient.
#[derive(Clone, Debug)]
pub struct SoftRankMatrix {
    rows: usize,
    cols: usize,
    /// Ranked rows in ascending order.
    members: Vec<usize>,
    /// Position of each row within `members`.
    slot: Vec<Option<usize>>,
    columns: Vec<SoftRank>,
}

impl SoftRankMatrix {
    pub fn forward_columns(values: &[f64], rows: usize, cols: usize, strength: f64) -> Result<Self> {
        Self::forward_masked_columns(values, &vec![true; rows], cols, strength)
    }

    /// Soft ranks of every column over the rows where `mask` is set.
    pub fn forward_masked_columns(
        values: &[f64],
        mask: &[bool],
        cols: usize,
        strength: f64,
    ) -> Result<Self> {
        let rows = mask.len();
        if values.len() != rows * cols {
            return Err(RankMapError::Shape {
                expected: rows * cols,
                got: values.len(),
            });
        }
        let members: Vec<usize> = (0..rows).filter(|&r| mask[r]).collect();
        let mut slot = vec![None; rows];
        for (k, &r) in members.iter().enumerate() {
            slot[r] = Some(k);
        }

        let columns: Vec<SoftRank> = (0..cols)
            .into_par_iter()
            .map(|c| {
                let column: Vec<f64> = members.iter().map(|&r| values[r * cols + c]).collect();
                SoftRank::forward(&column, strength)
            })
            .collect();

        trace!(
            "soft ranks: {} of {} rows x {} at strength {}, {} PAV blocks",
            members.len(),
            rows,
            cols,
            strength,
            columns.iter().map(SoftRank::block_count).sum::<usize>()
        );
        Ok(Self {
            rows,
            cols,
            members,
            slot,
            columns,
        })
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Soft rank of `row` in column `col`; 0 for rows left out.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.slot[row].map_or(0.0, |k| self.columns[col].ranks()[k])
    }

    /// Ranks of the member rows of column `col`.
    pub fn column(&self, col: usize) -> &SoftRank {
        &self.columns[col]
    }

    pub fn to_row_major(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.rows * self.cols];
        for (c, column) in self.columns.iter().enumerate() {
            for (&r, &v) in self.members.iter().zip(column.ranks()) {
                out[r * self.cols + c] = v;
            }
        }
        out
    }

    /// Backward pass of a row-major gradient, returned row-major.
    pub fn backward(&self, grad: &[f64]) -> Result<Vec<f64>> {
        if grad.len() != self.rows * self.cols {
            return Err(RankMapError::Shape {
                expected: self.rows * self.cols,
                got: grad.len(),
            });
        }
        let cols = self.cols;
        let per_column: Vec<Vec<f64>> = self
            .columns
            .par_iter()
            .enumerate()
            .map(|(c, column)| {
                let g: Vec<f64> = self.members.iter().map(|&r| grad[r * cols + c]).collect();
                column.backward(&g)
            })
            .collect::<Result<_>>()?;

        let mut out = vec![0.0; self.rows * cols];
        for (c, column) in per_column.iter().enumerate() {
            for (&r, &v) in self.members.iter().zip(column) {
                out[r * cols + c] = v;
            }
        }
        Ok(out)
    }
}
