//! Spectral cube: the dense per-pixel input of the embedding pipeline.
//!
//! A `SpectralCube` stores `height × width` pixels, each a vector of
//! `channels` non-negative intensities, in a single row-major buffer. The
//! flattened pixel matrix (N = height·width rows, one per pixel) is never
//! materialised separately: rows are handed out as borrowed slices.
//!
//! Pixels whose intensities are all zero are *background*. They are kept in
//! the matrix (so that indices map back onto the image grid) but are excluded
//! from reference sampling, loss mass and rendering.
//!
//! # Examples
//!
//! ```
//! use rankmap::core::SpectralCube;
//!
//! let cube = SpectralCube::from_pixels(
//!     1,
//!     3,
//!     vec![vec![0.0, 0.0], vec![1.0, 0.5], vec![0.0, 2.0]],
//! )
//! .unwrap();
//!
//! assert_eq!(cube.npixels(), 3);
//! assert_eq!(cube.pixel(1), &[1.0, 0.5]);
//! assert_eq!(cube.foreground_mask(), vec![false, true, true]);
//! ```
//!
//! # Panics
//!
//! - `pixel` panics on out-of-bounds pixel indices.

use log::debug;

use crate::error::{RankMapError, Result};

/// Immutable `height × width × channels` cube of non-negative intensities.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralCube {
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<f64>,
}

impl SpectralCube {
    /// Wraps a row-major `height × width × channels` buffer.
    ///
    /// Fails with `Shape` when the buffer length disagrees with the
    /// dimensions, `DegenerateInput` when a dimension is zero, and
    /// `Configuration` for negative or non-finite intensities.
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<f64>) -> Result<Self> {
        if height == 0 || width == 0 || channels == 0 {
            return Err(RankMapError::DegenerateInput(format!(
                "spectral cube has a zero dimension ({height}x{width}x{channels})"
            )));
        }
        let expected = height * width * channels;
        if data.len() != expected {
            return Err(RankMapError::Shape {
                expected,
                got: data.len(),
            });
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite() || *v < 0.0) {
            return Err(RankMapError::Configuration(format!(
                "intensity at flat position {pos} is {} (must be finite and non-negative)",
                data[pos]
            )));
        }
        debug!(
            "SpectralCube {}x{} with {} channels",
            height, width, channels
        );
        Ok(Self {
            height,
            width,
            channels,
            data,
        })
    }

    /// Builds a cube from one vector per pixel, in row-major pixel order.
    pub fn from_pixels(height: usize, width: usize, pixels: Vec<Vec<f64>>) -> Result<Self> {
        if pixels.len() != height * width {
            return Err(RankMapError::Shape {
                expected: height * width,
                got: pixels.len(),
            });
        }
        let channels = pixels.first().map(|p| p.len()).unwrap_or(0);
        if let Some(bad) = pixels.iter().find(|p| p.len() != channels) {
            return Err(RankMapError::Shape {
                expected: channels,
                got: bad.len(),
            });
        }
        let data = pixels.into_iter().flatten().collect();
        Self::new(height, width, channels, data)
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of pixels, i.e. rows of the flattened pixel matrix.
    #[inline]
    pub fn npixels(&self) -> usize {
        self.height * self.width
    }

    /// Raw row-major buffer.
    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Zero-copy view of pixel `i`'s spectrum.
    #[inline]
    pub fn pixel(&self, i: usize) -> &[f64] {
        let start = i * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Iterator over all pixel spectra in flattened order.
    #[inline]
    pub fn rows(&self) -> std::slice::ChunksExact<'_, f64> {
        self.data.chunks_exact(self.channels)
    }

    /// A pixel is foreground when its largest intensity is strictly positive.
    #[inline]
    pub fn is_foreground(&self, i: usize) -> bool {
        self.pixel(i).iter().fold(0.0_f64, |acc, &v| acc.max(v)) > 0.0
    }

    /// Foreground mask over the flattened pixel matrix.
    pub fn foreground_mask(&self) -> Vec<bool> {
        self.rows()
            .map(|row| row.iter().fold(0.0_f64, |acc, &v| acc.max(v)) > 0.0)
            .collect()
    }

    /// Count of foreground pixels.
    pub fn foreground_count(&self) -> usize {
        self.foreground_mask().iter().filter(|&&m| m).count()
    }
}
