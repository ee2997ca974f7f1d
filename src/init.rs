//! Starting points for the embedding parameters.

use log::{debug, info};
use rand::Rng;
use rayon::prelude::*;

use crate::config::Initialization;
use crate::core::SpectralCube;
use crate::error::{RankMapError, Result};
use crate::render::{percentile_sorted, sort_ascending};

/// Percentile used to stretch each selected channel.
const TOP_CHANNEL_PERCENTILE: f64 = 99.0;

/// Row-major `N × channels` initial embedding for `cube`.
pub fn initial_embedding<R: Rng>(
    cube: &SpectralCube,
    initialization: &Initialization,
    channels: usize,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let expected = cube.npixels() * channels;
    let embedding = match initialization {
        Initialization::CallerArray(bytes) => {
            if bytes.len() != expected {
                return Err(RankMapError::Configuration(format!(
                    "initial array has {} values, the bound image needs {}x{}x{} = {}",
                    bytes.len(),
                    cube.height(),
                    cube.width(),
                    channels,
                    expected
                )));
            }
            bytes.iter().map(|&v| v as f64 / 255.0 * 10.0 - 5.0).collect()
        }
        Initialization::Random => (0..expected).map(|_| rng.random_range(-5.0..5.0)).collect(),
        Initialization::TopChannels => top_channels(cube, channels),
    };
    info!("Initialized {}x{} embedding ({})", cube.npixels(), channels, initialization);
    Ok(embedding)
}

/// The `channels` spectral channels with the largest foreground sum, each
/// divided by its foreground 99th percentile and clamped to `[0, 1]`.
///
/// Output channels beyond the cube's channel count stay zero, as does the
/// background.
pub fn top_channels(cube: &SpectralCube, channels: usize) -> Vec<f64> {
    let mask = cube.foreground_mask();
    let depth = cube.channels();

    let sums: Vec<f64> = (0..depth)
        .into_par_iter()
        .map(|k| {
            cube.rows()
                .zip(&mask)
                .filter(|(_, fg)| **fg)
                .map(|(row, _)| row[k])
                .sum()
        })
        .collect();

    let mut order: Vec<usize> = (0..depth).collect();
    order.sort_by(|&a, &b| {
        sums[b]
            .partial_cmp(&sums[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });
    order.truncate(channels);
    debug!("top channels by foreground intensity: {:?}", order);

    let scales: Vec<f64> = order
        .par_iter()
        .map(|&k| {
            let mut values: Vec<f64> = cube
                .rows()
                .zip(&mask)
                .filter(|(_, fg)| **fg)
                .map(|(row, _)| row[k])
                .collect();
            sort_ascending(&mut values);
            percentile_sorted(&values, TOP_CHANNEL_PERCENTILE)
        })
        .collect();

    let mut embedding = vec![0.0; cube.npixels() * channels];
    for ((out, row), &fg) in embedding
        .chunks_exact_mut(channels)
        .zip(cube.rows())
        .zip(&mask)
    {
        if !fg {
            continue;
        }
        for (slot, (&k, &scale)) in out.iter_mut().zip(order.iter().zip(&scales)) {
            *slot = if scale > 0.0 {
                (row[k] / scale).clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
    }
    embedding
}
