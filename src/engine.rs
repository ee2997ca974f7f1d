//! The rank-preserving embedding engine.
//!
//! `RankEmbedding` owns one bound image at a time. Binding (`set_image`)
//! derives the foreground mask, draws references, builds the fixed target
//! ranks and initializes the embedding. Each `step` then:
//!
//! 1. measures Euclidean distances between every embedded pixel and the
//!    embedded references (`N × R`)
//! 2. soft-ranks each column over the foreground at the configured
//!    regularization strength
//! 3. evaluates the objective against the target ranks
//! 4. backpropagates through the soft ranks and the distances; background
//!    rows get no gradient
//! 5. applies one Adam update and renders an epoch snapshot
//!
//! State machine: `Uninitialized → Initialized → Running { epoch } → Terminal`.
//! Stepping an unbound or finished engine is an `InvalidState` error;
//! binding a new image always returns to `Initialized`.
//!
//! ```no_run
//! use rankmap::builder::RankEmbeddingBuilder;
//! use rankmap::core::SpectralCube;
//!
//! let cube = SpectralCube::new(2, 2, 4, vec![1.0; 16]).unwrap();
//! let mut engine = RankEmbeddingBuilder::new()
//!     .with_reference_count(2)
//!     .with_epoch_count(10)
//!     .build()
//!     .unwrap();
//! let image = engine.predict(cube).unwrap();
//! assert_eq!(image.shape(), (2, 2, 3));
//! ```

use std::fmt;

use log::{debug, info, trace, warn};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::core::SpectralCube;
use crate::device::ExecutionContext;
use crate::error::{RankMapError, Result};
use crate::init::initial_embedding;
use crate::loss::{LossInputs, Objective, RankObjective};
use crate::optim::Adam;
use crate::ranking::TargetRanks;
use crate::render::{RenderedImage, Renderer};
use crate::sampling::{sample_references, seeded_rng, ReferenceSampler, INIT_STREAM, SAMPLING_STREAM};
use crate::softrank::SoftRankMatrix;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Running { epoch: usize },
    Terminal,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Uninitialized => f.write_str("uninitialized"),
            EngineState::Initialized => f.write_str("initialized"),
            EngineState::Running { epoch } => write!(f, "running (epoch {epoch})"),
            EngineState::Terminal => f.write_str("terminal"),
        }
    }
}

/// Everything derived from one bound image.
struct BoundImage {
    cube: SpectralCube,
    mask: Vec<bool>,
    references: Vec<usize>,
    targets: TargetRanks,
    embedding: Vec<f64>,
    initial: Vec<f64>,
    optimizer: Adam,
    renderer: Renderer,
    epoch: usize,
    last_loss: Option<f64>,
    snapshot: Option<RenderedImage>,
}

impl BoundImage {
    fn channels(&self) -> usize {
        self.embedding.len() / self.mask.len()
    }

    /// Loss at the current parameters and its gradient with respect to them.
    fn loss_and_gradient(&self, objective: &Objective, strength: f64) -> Result<(f64, Vec<f64>)> {
        let c = self.channels();
        let r = self.references.len();

        let distances = embedding_distances(&self.embedding, c, &self.references);
        let soft = SoftRankMatrix::forward_masked_columns(&distances, &self.mask, r, strength)?;
        let soft_ranks = soft.to_row_major();

        let evaluation = objective.evaluate(&LossInputs {
            soft_ranks: &soft_ranks,
            targets: &self.targets,
            mask: &self.mask,
            embedding: &self.embedding,
            initial: &self.initial,
        })?;

        let distance_grad = soft.backward(&evaluation.rank_grad)?;
        let mut grad = evaluation.embedding_grad;
        accumulate_distance_gradient(
            &self.embedding,
            c,
            &self.references,
            &distances,
            &distance_grad,
            &mut grad,
        );
        // background parameters stay at their initial values
        for (row, _) in grad
            .chunks_exact_mut(c)
            .zip(&self.mask)
            .filter(|(_, fg)| !**fg)
        {
            row.fill(0.0);
        }
        Ok((evaluation.value, grad))
    }
}

/// Row-major `N × R` Euclidean distances from every embedded pixel to every
/// embedded reference.
pub fn embedding_distances(embedding: &[f64], channels: usize, references: &[usize]) -> Vec<f64> {
    embedding
        .par_chunks_exact(channels)
        .flat_map_iter(|row| {
            references.iter().map(move |&j| {
                let reference = &embedding[j * channels..(j + 1) * channels];
                row.iter()
                    .zip(reference)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt()
            })
        })
        .collect()
}

/// Adds `∂L/∂E` given `∂L/∂D` for `D_ij = ||E_i − E_ref(j)||`.
///
/// Zero distances have no defined direction and contribute nothing.
fn accumulate_distance_gradient(
    embedding: &[f64],
    channels: usize,
    references: &[usize],
    distances: &[f64],
    distance_grad: &[f64],
    grad: &mut [f64],
) {
    let r = references.len();
    let unit = |i: usize, j: usize| {
        let d = distances[i * r + j];
        let g = distance_grad[i * r + j];
        if d <= 0.0 || g == 0.0 {
            return None;
        }
        let reference = references[j];
        Some((
            g / d,
            &embedding[i * channels..(i + 1) * channels],
            &embedding[reference * channels..(reference + 1) * channels],
        ))
    };

    grad.par_chunks_exact_mut(channels)
        .enumerate()
        .for_each(|(i, out)| {
            for j in 0..r {
                if let Some((scale, row, reference)) = unit(i, j) {
                    for ((o, a), b) in out.iter_mut().zip(row).zip(reference) {
                        *o += scale * (a - b);
                    }
                }
            }
        });

    let n = distances.len() / r.max(1);
    let reference_terms: Vec<Vec<f64>> = (0..r)
        .into_par_iter()
        .map(|j| {
            let mut sum = vec![0.0; channels];
            for i in 0..n {
                if let Some((scale, row, reference)) = unit(i, j) {
                    for ((s, a), b) in sum.iter_mut().zip(row).zip(reference) {
                        *s += scale * (a - b);
                    }
                }
            }
            sum
        })
        .collect();

    for (&reference, term) in references.iter().zip(&reference_terms) {
        for (o, t) in grad[reference * channels..(reference + 1) * channels]
            .iter_mut()
            .zip(term)
        {
            *o -= t;
        }
    }
}

/// Rank-preserving embedding of spectral cubes into a few display channels.
pub struct RankEmbedding {
    config: EngineConfig,
    objective: Objective,
    sampler: Box<dyn ReferenceSampler>,
    ctx: ExecutionContext,
    sampling_rng: ChaCha8Rng,
    state: EngineState,
    bound: Option<BoundImage>,
}

impl RankEmbedding {
    /// Validates `config` and resolves its strategies.
    pub fn new(config: EngineConfig, ctx: ExecutionContext) -> Result<Self> {
        config.validate()?;
        info!("Creating rank embedding engine: {}", config);
        if ctx.is_degraded() {
            warn!("Execution context is degraded; data-parallel stages run on the caller's thread");
        }
        Ok(Self {
            objective: Objective::from_config(&config),
            sampler: config.sampling.sampler(),
            sampling_rng: seeded_rng(config.seed, SAMPLING_STREAM),
            ctx,
            config,
            state: EngineState::Uninitialized,
            bound: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Epochs completed on the bound image.
    pub fn epoch(&self) -> usize {
        self.bound.as_ref().map_or(0, |b| b.epoch)
    }

    /// Loss evaluated by the most recent `step`.
    pub fn loss(&self) -> Option<f64> {
        self.bound.as_ref().and_then(|b| b.last_loss)
    }

    pub fn references(&self) -> Option<&[usize]> {
        self.bound.as_ref().map(|b| b.references.as_slice())
    }

    pub fn targets(&self) -> Option<&TargetRanks> {
        self.bound.as_ref().map(|b| &b.targets)
    }

    /// Row-major `N × C` embedding parameters.
    pub fn embedding(&self) -> Option<&[f64]> {
        self.bound.as_ref().map(|b| b.embedding.as_slice())
    }

    pub fn mask(&self) -> Option<&[bool]> {
        self.bound.as_ref().map(|b| b.mask.as_slice())
    }

    pub fn cube(&self) -> Option<&SpectralCube> {
        self.bound.as_ref().map(|b| &b.cube)
    }

    /// Binds `cube`: mask, references, target ranks, initial embedding and a
    /// fresh optimizer. On failure the engine is left `Uninitialized`.
    pub fn set_image(&mut self, cube: SpectralCube) -> Result<()> {
        self.bound = None;
        self.state = EngineState::Uninitialized;
        self.sampling_rng = seeded_rng(self.config.seed, SAMPLING_STREAM);

        info!(
            "Binding {}x{}x{} cube",
            cube.height(),
            cube.width(),
            cube.channels()
        );
        let config = &self.config;
        let sampler = self.sampler.as_ref();
        let rng = &mut self.sampling_rng;

        let bound = self.ctx.install(move || -> Result<BoundImage> {
            let mask = cube.foreground_mask();
            if !mask.iter().any(|&fg| fg) {
                return Err(RankMapError::DegenerateInput(
                    "image has no foreground pixels".to_string(),
                ));
            }
            let references = sample_references(&cube, config.reference_count, sampler, rng)?;
            let targets = TargetRanks::build(&cube, &references)?;

            let mut init_rng = seeded_rng(config.seed, INIT_STREAM);
            let embedding = initial_embedding(
                &cube,
                &config.initialization,
                config.output_channels,
                &mut init_rng,
            )?;
            let renderer = Renderer::new(
                cube.height(),
                cube.width(),
                config.output_channels,
                config.normalization,
                config.color_conversion,
            );

            Ok(BoundImage {
                optimizer: Adam::new(embedding.len(), config.learning_rate),
                initial: embedding.clone(),
                embedding,
                cube,
                mask,
                references,
                targets,
                renderer,
                epoch: 0,
                last_loss: None,
                snapshot: None,
            })
        })?;

        debug!(
            "Bound image: {} foreground pixels, {} references",
            bound.mask.iter().filter(|&&fg| fg).count(),
            bound.references.len()
        );
        self.bound = Some(bound);
        self.state = EngineState::Initialized;
        Ok(())
    }

    /// Draws a new reference set for the bound image and rebuilds the target
    /// ranks. Embedding, optimizer moments and epoch count are kept.
    pub fn resample(&mut self, count: usize) -> Result<()> {
        let bound = self.bound.as_mut().ok_or_else(|| {
            RankMapError::InvalidState("resample needs a bound image".to_string())
        })?;
        let sampler = self.sampler.as_ref();
        let rng = &mut self.sampling_rng;

        let (references, targets) = self.ctx.install(|| -> Result<(Vec<usize>, TargetRanks)> {
            let references = sample_references(&bound.cube, count, sampler, rng)?;
            let targets = TargetRanks::build(&bound.cube, &references)?;
            Ok((references, targets))
        })?;

        info!("Resampled {} references", references.len());
        bound.references = references;
        bound.targets = targets;
        Ok(())
    }

    /// One optimizer update followed by an epoch snapshot.
    pub fn step(&mut self) -> Result<RenderedImage> {
        match self.state {
            EngineState::Uninitialized => {
                return Err(RankMapError::InvalidState(
                    "step called before set_image".to_string(),
                ))
            }
            EngineState::Terminal => {
                return Err(RankMapError::InvalidState(format!(
                    "all {} epochs already ran; bind an image to start over",
                    self.config.epoch_count
                )))
            }
            EngineState::Initialized | EngineState::Running { .. } => {}
        }
        let epoch_count = self.config.epoch_count;
        let strength = self.config.rank_regularization;
        let objective = &self.objective;
        let bound = self.bound.as_mut().ok_or_else(|| {
            RankMapError::InvalidState("engine has no bound image".to_string())
        })?;
        if bound.epoch >= epoch_count {
            self.state = EngineState::Terminal;
            return Err(RankMapError::InvalidState(format!(
                "epoch budget of {epoch_count} is exhausted"
            )));
        }

        let snapshot = self.ctx.install(|| -> Result<RenderedImage> {
            let (value, grad) = bound.loss_and_gradient(objective, strength)?;
            bound.optimizer.step(&mut bound.embedding, &grad)?;
            bound.last_loss = Some(value);
            trace!("epoch {}: loss {:.6e}", bound.epoch + 1, value);
            bound.renderer.render(&bound.embedding, &bound.mask)
        })?;

        bound.epoch += 1;
        bound.snapshot = Some(snapshot.clone());
        self.state = if bound.epoch >= epoch_count {
            info!(
                "Finished {} epochs, final loss {:.6e}",
                bound.epoch,
                bound.last_loss.unwrap_or(f64::NAN)
            );
            EngineState::Terminal
        } else {
            EngineState::Running { epoch: bound.epoch }
        };
        Ok(snapshot)
    }

    /// Runs every remaining epoch and returns the last snapshot, or the render
    /// of the current embedding when no epoch is left to run. The engine is
    /// `Terminal` afterwards, including with a budget of zero epochs.
    pub fn run(&mut self) -> Result<RenderedImage> {
        if self.bound.is_none() {
            return Err(RankMapError::InvalidState(
                "run called before set_image".to_string(),
            ));
        }
        let mut last = None;
        while self.epoch() < self.config.epoch_count && self.state != EngineState::Terminal {
            last = Some(self.step()?);
        }
        self.state = EngineState::Terminal;
        match last {
            Some(image) => Ok(image),
            None => self.render(),
        }
    }

    /// `set_image` followed by `run`.
    pub fn predict(&mut self, cube: SpectralCube) -> Result<RenderedImage> {
        self.set_image(cube)?;
        self.run()
    }

    /// Renders the current embedding without stepping.
    pub fn render(&self) -> Result<RenderedImage> {
        let bound = self.bound.as_ref().ok_or_else(|| {
            RankMapError::InvalidState("render needs a bound image".to_string())
        })?;
        self.ctx
            .install(|| bound.renderer.render(&bound.embedding, &bound.mask))
    }

    /// Loss at the current embedding, without updating it.
    pub fn evaluate_loss(&self) -> Result<f64> {
        let bound = self.bound.as_ref().ok_or_else(|| {
            RankMapError::InvalidState("loss needs a bound image".to_string())
        })?;
        let objective = &self.objective;
        let strength = self.config.rank_regularization;
        self.ctx
            .install(|| bound.loss_and_gradient(objective, strength).map(|(v, _)| v))
    }

    /// Snapshot of the most recent `step`.
    pub fn snapshot(&self) -> Option<&RenderedImage> {
        self.bound.as_ref().and_then(|b| b.snapshot.as_ref())
    }
}

impl fmt::Display for RankEmbedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RankEmbedding [{}] {} on {} thread(s), state {}",
            self.objective.name(),
            self.config,
            self.ctx.threads(),
            self.state
        )
    }
}

impl fmt::Debug for RankEmbedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankEmbedding")
            .field("config", &self.config)
            .field("sampling", &self.sampler.strategy())
            .field("state", &self.state)
            .field("epoch", &self.epoch())
            .finish()
    }
}
