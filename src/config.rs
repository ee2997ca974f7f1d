//! Configuration surface of the embedding engine.
//!
//! Every strategy that the engine can switch between is a closed enum, parsed
//! once from its name (`FromStr`) and resolved into a concrete handler when the
//! engine is built. Unknown names fail with `RankMapError::Configuration`
//! before any sampling or optimization work begins.
//!
//! ```
//! use rankmap::config::{EngineConfig, SamplingStrategy};
//!
//! let sampling: SamplingStrategy = "kmeans++".parse().unwrap();
//! assert_eq!(sampling, SamplingStrategy::KMeansPlusPlus);
//! assert!("spectral-clustering".parse::<SamplingStrategy>().is_err());
//!
//! let config = EngineConfig::default();
//! assert_eq!(config.reference_count, 500);
//! assert_eq!(config.epoch_count, 200);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RankMapError, Result};

/// How reference points are drawn from the pixel matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SamplingStrategy {
    /// Uniform draws with replacement.
    Random,
    /// k-means++ seeding, returning the seed pixels.
    KMeansPlusPlus,
    /// Full k-means, returning the pixel nearest to each centroid.
    KMeans,
    /// Importance sampling mixed 50/50 with uniform.
    #[default]
    Coreset,
}

impl FromStr for SamplingStrategy {
    type Err = RankMapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "kmeans++" | "kmeans-plus-plus" => Ok(Self::KMeansPlusPlus),
            "kmeans" => Ok(Self::KMeans),
            "coreset" => Ok(Self::Coreset),
            other => Err(RankMapError::Configuration(format!(
                "unknown sampling strategy '{other}' (expected random, kmeans++, kmeans or coreset)"
            ))),
        }
    }
}

impl fmt::Display for SamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => f.write_str("random"),
            Self::KMeansPlusPlus => f.write_str("kmeans++"),
            Self::KMeans => f.write_str("kmeans"),
            Self::Coreset => f.write_str("coreset"),
        }
    }
}

/// Starting point of the embedding parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initialization {
    /// Caller-supplied `height × width × channels` display bytes, mapped to
    /// `v / 255 · 10 − 5`. A previous render can be fed back this way.
    CallerArray(Vec<u8>),
    /// Uniform values in `[-5, 5)`.
    #[default]
    Random,
    /// Brightest spectral channels stretched to `[0, 1]`.
    TopChannels,
}

impl FromStr for Initialization {
    type Err = RankMapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "top3" | "top-channels" | "heuristic" => Ok(Self::TopChannels),
            "caller-array" => Err(RankMapError::Configuration(
                "caller-array initialization needs the array itself; use Initialization::CallerArray"
                    .to_string(),
            )),
            other => Err(RankMapError::Configuration(format!(
                "'{other}' not supported as initialization (expected random or top3)"
            ))),
        }
    }
}

impl fmt::Display for Initialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CallerArray(values) => write!(f, "caller-array[{}]", values.len()),
            Self::Random => f.write_str("random"),
            Self::TopChannels => f.write_str("top3"),
        }
    }
}

/// Which loss drives the optimization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectiveKind {
    /// Weighted margin-ranking loss against the combined cosine/Chebyshev ranks.
    #[default]
    MarginRanking,
    /// Negative Spearman correlation against the cosine ranks.
    Spearman,
}

impl FromStr for ObjectiveKind {
    type Err = RankMapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "margin" | "margin-ranking" | "saliency" => Ok(Self::MarginRanking),
            "spearman" => Ok(Self::Spearman),
            other => Err(RankMapError::Configuration(format!(
                "unknown objective '{other}' (expected margin-ranking or spearman)"
            ))),
        }
    }
}

impl fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarginRanking => f.write_str("margin-ranking"),
            Self::Spearman => f.write_str("spearman"),
        }
    }
}

/// Whether display statistics are gathered per channel or over all channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormalizationScope {
    #[default]
    PerChannel,
    Joint,
}

/// Range used to stretch embedding values onto `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Stretch {
    #[default]
    MinMax,
    /// Percentiles in `[0, 100]`; values outside are clamped.
    Percentile { low: f64, high: f64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub scope: NormalizationScope,
    pub stretch: Stretch,
}

/// Full parameter set of one embedding engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Requested number of reference points (M).
    pub reference_count: usize,
    pub sampling: SamplingStrategy,
    /// Number of optimizer steps; zero renders the initial embedding.
    pub epoch_count: usize,
    /// Soft-rank regularization strength (ε).
    pub rank_regularization: f64,
    pub initialization: Initialization,
    /// Weight of the pull towards the initial embedding (margin loss only).
    pub similarity_regularization: f64,
    /// Embedding channels (C).
    pub output_channels: usize,
    /// Reinterpret three rendered channels as CIELab and convert to sRGB.
    pub color_conversion: bool,
    pub objective: ObjectiveKind,
    pub learning_rate: f64,
    pub seed: u64,
    pub normalization: Normalization,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_count: 500,
            sampling: SamplingStrategy::Coreset,
            epoch_count: 200,
            rank_regularization: 0.005,
            initialization: Initialization::Random,
            similarity_regularization: 0.0,
            output_channels: 3,
            color_conversion: true,
            objective: ObjectiveKind::MarginRanking,
            learning_rate: 1.0,
            seed: 0,
            normalization: Normalization::default(),
        }
    }
}

// Floats compare with relative tolerance, everything else exactly
impl PartialEq for EngineConfig {
    fn eq(&self, other: &Self) -> bool {
        self.reference_count == other.reference_count
            && self.sampling == other.sampling
            && self.epoch_count == other.epoch_count
            && approx::relative_eq!(self.rank_regularization, other.rank_regularization)
            && self.initialization == other.initialization
            && approx::relative_eq!(
                self.similarity_regularization,
                other.similarity_regularization
            )
            && self.output_channels == other.output_channels
            && self.color_conversion == other.color_conversion
            && self.objective == other.objective
            && approx::relative_eq!(self.learning_rate, other.learning_rate)
            && self.seed == other.seed
            && self.normalization == other.normalization
    }
}

impl EngineConfig {
    /// Checks every numeric parameter; called before an engine is built.
    pub fn validate(&self) -> Result<()> {
        if self.reference_count == 0 {
            return Err(RankMapError::Configuration(
                "reference_count must be positive".to_string(),
            ));
        }
        if self.output_channels == 0 {
            return Err(RankMapError::Configuration(
                "output_channels must be positive".to_string(),
            ));
        }
        if !(self.rank_regularization.is_finite() && self.rank_regularization > 0.0) {
            return Err(RankMapError::Configuration(format!(
                "rank_regularization must be a positive finite number, got {}",
                self.rank_regularization
            )));
        }
        if !(self.similarity_regularization.is_finite() && self.similarity_regularization >= 0.0)
        {
            return Err(RankMapError::Configuration(format!(
                "similarity_regularization must be non-negative, got {}",
                self.similarity_regularization
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RankMapError::Configuration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if let Stretch::Percentile { low, high } = self.normalization.stretch {
            if !(0.0..=100.0).contains(&low) || !(0.0..=100.0).contains(&high) || low >= high {
                return Err(RankMapError::Configuration(format!(
                    "percentile stretch needs 0 <= low < high <= 100, got [{low}, {high}]"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} optimization: epochs: {} regularization_strength: {} sampling: {} reference_count: {} init: {}",
            self.objective,
            self.epoch_count,
            self.rank_regularization,
            self.sampling,
            self.reference_count,
            self.initialization
        )
    }
}
