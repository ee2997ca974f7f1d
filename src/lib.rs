//! # rankmap
//!
//! Rank-preserving embedding of hyperspectral images (one high-dimensional
//! spectrum per pixel) into a few display channels.
//!
//! The pipeline, leaves first:
//! - [`sampling`]: reduce N pixels to at most M reference points
//! - [`ranking`]: combined cosine/Chebyshev target ranks of every pixel
//!   against every reference
//! - [`softrank`]: differentiable ranks of the evolving embedding
//! - [`loss`]: margin-ranking or Spearman objectives with gradients
//! - [`engine`]: fixed-epoch Adam optimization with one snapshot per epoch
//! - [`render`] and [`color`]: masking, normalization and Lab → sRGB
//!
//! ```
//! use rankmap::builder::RankEmbeddingBuilder;
//! use rankmap::config::SamplingStrategy;
//! use rankmap::core::SpectralCube;
//! use rankmap::device::ExecutionContext;
//!
//! let pixels = vec![
//!     vec![0.0, 0.0, 0.0],
//!     vec![1.0, 0.0, 0.0],
//!     vec![0.0, 1.0, 0.0],
//!     vec![0.0, 0.0, 1.0],
//! ];
//! let cube = SpectralCube::from_pixels(2, 2, pixels).unwrap();
//!
//! let mut engine = RankEmbeddingBuilder::new()
//!     .with_reference_count(3)
//!     .with_sampling(SamplingStrategy::KMeansPlusPlus)
//!     .with_epoch_count(5)
//!     .with_context(ExecutionContext::host())
//!     .build()
//!     .unwrap();
//!
//! let image = engine.predict(cube).unwrap();
//! assert_eq!(image.shape(), (2, 2, 3));
//! assert_eq!(image.pixel(0), &[0, 0, 0]);
//! ```

pub mod builder;
pub mod clustering;
pub mod color;
pub mod config;
pub mod core;
pub mod device;
pub mod engine;
pub mod error;
pub mod init;
pub mod loss;
pub mod optim;
pub mod ranking;
pub mod render;
pub mod sampling;
pub mod softrank;

pub use builder::RankEmbeddingBuilder;
pub use config::EngineConfig;
pub use engine::{EngineState, RankEmbedding};
pub use error::{RankMapError, Result};

#[cfg(test)]
mod tests;
