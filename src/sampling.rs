//! Reference sampling: reduce N pixels to at most M reference points.
//!
//! Each `SamplingStrategy` resolves once into a concrete `ReferenceSampler`.
//! Whatever the strategy, the drawn indices pass through the same
//! background post-filter, so the returned set can be shorter than requested.

use log::{debug, info, trace};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::clustering::{
    cluster_centroids, distinct_rows, kmeans_lloyd, kmeans_plus_plus, nearest_centroid,
    squared_euclidean,
};
use crate::config::SamplingStrategy;
use crate::core::SpectralCube;
use crate::error::{RankMapError, Result};

/// Stream of the per-engine RNG used for reference draws.
pub const SAMPLING_STREAM: u64 = 1;
/// Stream of the per-engine RNG used for embedding initialization.
pub const INIT_STREAM: u64 = 2;

const KMEANS_MAX_ITER: usize = 100;

/// Deterministic RNG for `(seed, stream)`.
pub fn seeded_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

pub trait ReferenceSampler: Send + Sync {
    fn strategy(&self) -> SamplingStrategy;

    /// Draw up to `count` pixel indices. Background pixels may be returned;
    /// filtering happens in [`sample_references`].
    fn draw(&self, cube: &SpectralCube, count: usize, rng: &mut ChaCha8Rng) -> Result<Vec<usize>>;
}

impl SamplingStrategy {
    pub fn sampler(self) -> Box<dyn ReferenceSampler> {
        match self {
            SamplingStrategy::Random => Box::new(RandomSampler),
            SamplingStrategy::KMeansPlusPlus => Box::new(KMeansPlusPlusSampler),
            SamplingStrategy::KMeans => Box::new(KMeansSampler {
                max_iter: KMEANS_MAX_ITER,
            }),
            SamplingStrategy::Coreset => Box::new(CoresetSampler),
        }
    }
}

/// Uniform draws with replacement.
pub struct RandomSampler;

impl ReferenceSampler for RandomSampler {
    fn strategy(&self) -> SamplingStrategy {
        SamplingStrategy::Random
    }

    fn draw(&self, cube: &SpectralCube, count: usize, rng: &mut ChaCha8Rng) -> Result<Vec<usize>> {
        let n = cube.npixels();
        Ok((0..count).map(|_| rng.random_range(0..n)).collect())
    }
}

/// k-means++ seeds over the full pixel matrix.
pub struct KMeansPlusPlusSampler;

impl ReferenceSampler for KMeansPlusPlusSampler {
    fn strategy(&self) -> SamplingStrategy {
        SamplingStrategy::KMeansPlusPlus
    }

    fn draw(&self, cube: &SpectralCube, count: usize, rng: &mut ChaCha8Rng) -> Result<Vec<usize>> {
        ensure_distinct_foreground(cube, count, self.strategy())?;
        let rows: Vec<&[f64]> = cube.rows().collect();
        kmeans_plus_plus(&rows, count, rng)
    }
}

/// Full k-means; each centroid is replaced by its nearest pixel.
pub struct KMeansSampler {
    pub max_iter: usize,
}

impl ReferenceSampler for KMeansSampler {
    fn strategy(&self) -> SamplingStrategy {
        SamplingStrategy::KMeans
    }

    fn draw(&self, cube: &SpectralCube, count: usize, rng: &mut ChaCha8Rng) -> Result<Vec<usize>> {
        ensure_distinct_foreground(cube, count, self.strategy())?;
        let rows: Vec<&[f64]> = cube.rows().collect();
        let seed: u64 = rng.random();
        let labels = kmeans_lloyd(&rows, count, self.max_iter, seed)?;

        let centroids = cluster_centroids(&rows, &labels, count);
        let picks: Vec<usize> = centroids
            .par_iter()
            .filter_map(|centroid| centroid.as_ref())
            .map(|centroid| nearest_centroid(centroid, &rows).0)
            .collect();

        debug!(
            "k-means sampler: {} non-empty clusters of {} requested",
            picks.len(),
            count
        );
        Ok(picks)
    }
}

/// Importance sampling around the global mean, mixed with uniform.
pub struct CoresetSampler;

impl ReferenceSampler for CoresetSampler {
    fn strategy(&self) -> SamplingStrategy {
        SamplingStrategy::Coreset
    }

    fn draw(&self, cube: &SpectralCube, count: usize, rng: &mut ChaCha8Rng) -> Result<Vec<usize>> {
        let p = coreset_distribution(cube);
        let dist = WeightedIndex::new(&p)
            .map_err(|e| RankMapError::DegenerateInput(format!("coreset distribution: {e}")))?;
        Ok((0..count).map(|_| dist.sample(rng)).collect())
    }
}

/// Proposal `p_i = 0.5·q_i/Σq + 0.5/N` with `q_i = ||x_i − mean||²`.
///
/// When every pixel sits on the mean (Σq = 0) the importance term is taken
/// as uniform, so `p` is exactly uniform.
pub fn coreset_distribution(cube: &SpectralCube) -> Vec<f64> {
    let n = cube.npixels();
    let channels = cube.channels();

    let mut mean = vec![0.0; channels];
    for row in cube.rows() {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    for m in &mut mean {
        *m /= n as f64;
    }

    let q: Vec<f64> = cube
        .data()
        .par_chunks_exact(channels)
        .map(|row| squared_euclidean(row, &mean))
        .collect();
    let total: f64 = q.iter().sum();
    let uniform = 1.0 / n as f64;

    trace!("coreset: Σq = {:.6e} over {} pixels", total, n);

    q.into_iter()
        .map(|qi| {
            let d = if total > 0.0 { qi / total } else { uniform };
            0.5 * (d + uniform)
        })
        .collect()
}

/// Draw references with `sampler` and drop background pixels.
pub fn sample_references(
    cube: &SpectralCube,
    count: usize,
    sampler: &dyn ReferenceSampler,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<usize>> {
    if count == 0 {
        return Err(RankMapError::Configuration(
            "reference count must be positive".to_string(),
        ));
    }
    let drawn = sampler.draw(cube, count, rng)?;
    let kept: Vec<usize> = drawn
        .iter()
        .copied()
        .filter(|&i| cube.is_foreground(i))
        .collect();

    info!(
        "Sampled {} references with {} ({} drawn, {} background dropped)",
        kept.len(),
        sampler.strategy(),
        drawn.len(),
        drawn.len() - kept.len()
    );
    Ok(kept)
}

fn ensure_distinct_foreground(cube: &SpectralCube, count: usize, strategy: SamplingStrategy) -> Result<()> {
    let foreground: Vec<&[f64]> = cube
        .rows()
        .enumerate()
        .filter(|(i, _)| cube.is_foreground(*i))
        .map(|(_, row)| row)
        .collect();
    let available = distinct_rows(&foreground);
    if available == 0 {
        return Err(RankMapError::DegenerateInput(
            "image has no foreground pixels".to_string(),
        ));
    }
    if count > available {
        return Err(RankMapError::Configuration(format!(
            "{strategy} sampling needs {count} clusters but only {available} distinct foreground pixels exist"
        )));
    }
    Ok(())
}
