//! Rank objectives comparing the embedding's soft ranks with the target ranks.
//!
//! Both objectives implement [`RankObjective`] and return the scalar loss
//! together with its gradient with respect to the soft ranks (row-major
//! `N × R`) and any direct gradient with respect to the embedding (`N × C`).
//! Background rows never contribute value or gradient.

use log::{debug, trace};
use rayon::prelude::*;

use crate::config::{EngineConfig, ObjectiveKind};
use crate::error::{RankMapError, Result};
use crate::ranking::TargetRanks;

/// Spread below which a centred rank column counts as constant.
const ZERO_SPREAD: f64 = 1e-12;

/// Borrowed state of one loss evaluation.
pub struct LossInputs<'a> {
    /// Row-major `N × R` soft ranks of the current embedding.
    pub soft_ranks: &'a [f64],
    pub targets: &'a TargetRanks,
    pub mask: &'a [bool],
    /// Row-major `N × C` embedding parameters.
    pub embedding: &'a [f64],
    /// Embedding at the time the image was bound.
    pub initial: &'a [f64],
}

impl LossInputs<'_> {
    fn check(&self) -> Result<()> {
        let (n, r) = self.targets.shape();
        if self.soft_ranks.len() != n * r {
            return Err(RankMapError::Shape {
                expected: n * r,
                got: self.soft_ranks.len(),
            });
        }
        if self.mask.len() != n {
            return Err(RankMapError::Shape {
                expected: n,
                got: self.mask.len(),
            });
        }
        if self.embedding.len() != self.initial.len() {
            return Err(RankMapError::Shape {
                expected: self.embedding.len(),
                got: self.initial.len(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct LossEvaluation {
    pub value: f64,
    /// ∂L/∂soft_ranks, row-major `N × R`.
    pub rank_grad: Vec<f64>,
    /// ∂L/∂embedding from terms that do not go through the ranks.
    pub embedding_grad: Vec<f64>,
}

pub trait RankObjective {
    fn name(&self) -> &'static str;

    fn evaluate(&self, inputs: &LossInputs<'_>) -> Result<LossEvaluation>;
}

/// Weighted hinge on `target − soft + margin`, weights `mask · target²`.
#[derive(Clone, Copy, Debug)]
pub struct MarginRankingLoss {
    pub margin: f64,
    /// λ of the optional `λ · mean((E − E0)²)` pull.
    pub similarity_weight: f64,
}

impl Default for MarginRankingLoss {
    fn default() -> Self {
        Self {
            margin: 0.0,
            similarity_weight: 0.0,
        }
    }
}

impl RankObjective for MarginRankingLoss {
    fn name(&self) -> &'static str {
        "margin-ranking"
    }

    fn evaluate(&self, inputs: &LossInputs<'_>) -> Result<LossEvaluation> {
        inputs.check()?;
        let (_, r) = inputs.targets.shape();
        let targets = inputs.targets.combined().data();
        let weights = inputs.targets.weights();

        let total_weight: f64 = weights
            .par_chunks(r)
            .zip(inputs.mask.par_iter())
            .filter(|(_, fg)| **fg)
            .map(|(row, _)| row.iter().sum::<f64>())
            .sum();
        if total_weight <= 0.0 {
            return Err(RankMapError::DegenerateInput(
                "margin loss weights sum to zero on the foreground".to_string(),
            ));
        }

        let (weighted, rank_grad): (Vec<f64>, Vec<f64>) = (0..inputs.soft_ranks.len())
            .into_par_iter()
            .map(|k| {
                if !inputs.mask[k / r] {
                    return (0.0, 0.0);
                }
                let hinge = targets[k] as f64 - inputs.soft_ranks[k] + self.margin;
                if hinge > 0.0 {
                    (weights[k] * hinge, -weights[k] / total_weight)
                } else {
                    (0.0, 0.0)
                }
            })
            .unzip();
        let mut value = weighted.iter().sum::<f64>() / total_weight;

        let mut embedding_grad = vec![0.0; inputs.embedding.len()];
        if self.similarity_weight > 0.0 && !inputs.embedding.is_empty() {
            let len = inputs.embedding.len() as f64;
            let mut squared = 0.0;
            for ((g, e), e0) in embedding_grad
                .iter_mut()
                .zip(inputs.embedding)
                .zip(inputs.initial)
            {
                let diff = e - e0;
                squared += diff * diff;
                *g = 2.0 * self.similarity_weight * diff / len;
            }
            let pull = self.similarity_weight * squared / len;
            trace!("similarity term {:.6e}", pull);
            value += pull;
        }

        Ok(LossEvaluation {
            value,
            rank_grad,
            embedding_grad,
        })
    }
}

/// Negative mean Spearman correlation between soft ranks and cosine ranks.
///
/// Correlations are taken per reference column over foreground rows. A
/// column whose soft or target ranks are constant contributes zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpearmanLoss;

impl RankObjective for SpearmanLoss {
    fn name(&self) -> &'static str {
        "spearman"
    }

    fn evaluate(&self, inputs: &LossInputs<'_>) -> Result<LossEvaluation> {
        inputs.check()?;
        let (n, r) = inputs.targets.shape();
        let cosine = inputs.targets.cosine();
        let foreground: Vec<usize> = (0..n).filter(|&i| inputs.mask[i]).collect();
        if foreground.is_empty() {
            return Err(RankMapError::DegenerateInput(
                "spearman loss on an image without foreground".to_string(),
            ));
        }

        let per_column: Vec<(f64, Vec<f64>)> = (0..r)
            .into_par_iter()
            .map(|c| {
                let a: Vec<f64> = foreground
                    .iter()
                    .map(|&i| inputs.soft_ranks[i * r + c])
                    .collect();
                let b: Vec<f64> = foreground
                    .iter()
                    .map(|&i| cosine.get(i, c) as f64)
                    .collect();
                column_correlation(&a, &b)
            })
            .collect();

        let mut rank_grad = vec![0.0; n * r];
        let mut total = 0.0;
        for (c, (corr, grad)) in per_column.iter().enumerate() {
            total += corr;
            for (&i, g) in foreground.iter().zip(grad) {
                rank_grad[i * r + c] = -g / r as f64;
            }
        }
        let value = -total / r as f64;
        debug!("spearman: mean correlation {:.4} over {} columns", -value, r);

        Ok(LossEvaluation {
            value,
            rank_grad,
            embedding_grad: vec![0.0; inputs.embedding.len()],
        })
    }
}

/// Pearson correlation of `a` and `b` and its gradient with respect to `a`.
fn column_correlation(a: &[f64], b: &[f64]) -> (f64, Vec<f64>) {
    let len = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / len;
    let mean_b = b.iter().sum::<f64>() / len;
    let ca: Vec<f64> = a.iter().map(|v| v - mean_a).collect();
    let cb: Vec<f64> = b.iter().map(|v| v - mean_b).collect();
    let norm_a = ca.iter().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = cb.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a < ZERO_SPREAD || norm_b < ZERO_SPREAD {
        return (0.0, vec![0.0; a.len()]);
    }
    let corr = ca.iter().zip(&cb).map(|(x, y)| x * y).sum::<f64>() / (norm_a * norm_b);
    let grad = ca
        .iter()
        .zip(&cb)
        .map(|(x, y)| (y / norm_b - corr * x / norm_a) / norm_a)
        .collect();
    (corr, grad)
}

/// Spearman correlation of two equally long samples, ranked exactly.
pub fn spearman_correlation(a: &[f64], b: &[f64]) -> f64 {
    let ra: Vec<f64> = crate::ranking::rank_vector(a)
        .into_iter()
        .map(|v| v as f64)
        .collect();
    let rb: Vec<f64> = crate::ranking::rank_vector(b)
        .into_iter()
        .map(|v| v as f64)
        .collect();
    column_correlation(&ra, &rb).0
}

/// Objective chosen by the configuration.
#[derive(Clone, Copy, Debug)]
pub enum Objective {
    MarginRanking(MarginRankingLoss),
    Spearman(SpearmanLoss),
}

impl Objective {
    pub fn from_config(config: &EngineConfig) -> Self {
        match config.objective {
            ObjectiveKind::MarginRanking => Objective::MarginRanking(MarginRankingLoss {
                margin: 0.0,
                similarity_weight: config.similarity_regularization,
            }),
            ObjectiveKind::Spearman => Objective::Spearman(SpearmanLoss),
        }
    }

    pub fn kind(&self) -> ObjectiveKind {
        match self {
            Objective::MarginRanking(_) => ObjectiveKind::MarginRanking,
            Objective::Spearman(_) => ObjectiveKind::Spearman,
        }
    }
}

impl RankObjective for Objective {
    fn name(&self) -> &'static str {
        match self {
            Objective::MarginRanking(loss) => loss.name(),
            Objective::Spearman(loss) => loss.name(),
        }
    }

    fn evaluate(&self, inputs: &LossInputs<'_>) -> Result<LossEvaluation> {
        match self {
            Objective::MarginRanking(loss) => loss.evaluate(inputs),
            Objective::Spearman(loss) => loss.evaluate(inputs),
        }
    }
}
