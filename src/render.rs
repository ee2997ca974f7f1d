//! Post-processing of an embedding into a displayable 8-bit image.
//!
//! Rendering is a pure function of `(embedding, mask)`: background pixels
//! are zeroed, foreground values are stretched onto `[0, 1]` with statistics
//! gathered over foreground entries only, scaled to bytes, optionally read as
//! 8-bit CIELab and converted to sRGB, and background is zeroed once more.

use std::cmp::Ordering;

use log::{debug, trace};

use crate::color::lab8_to_rgb8;
use crate::config::{Normalization, NormalizationScope, Stretch};
use crate::error::{RankMapError, Result};

/// Range below which a channel is treated as constant and rendered black.
const FLAT_RANGE: f64 = 1e-12;

/// `height × width × channels` bytes, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedImage {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl RenderedImage {
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    #[inline]
    pub fn pixel(&self, i: usize) -> &[u8] {
        &self.data[i * self.channels..(i + 1) * self.channels]
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Linear-interpolated percentile (`q ∈ [0, 100]`) of an ascending slice.
pub(crate) fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

pub(crate) fn sort_ascending(values: &mut [f64]) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
}

#[derive(Clone, Debug)]
pub struct Renderer {
    height: usize,
    width: usize,
    channels: usize,
    normalization: Normalization,
    color_conversion: bool,
}

impl Renderer {
    pub fn new(
        height: usize,
        width: usize,
        channels: usize,
        normalization: Normalization,
        color_conversion: bool,
    ) -> Self {
        Self {
            height,
            width,
            channels,
            normalization,
            color_conversion,
        }
    }

    /// Whether bytes go through the Lab → sRGB conversion.
    pub fn converts_color(&self) -> bool {
        self.color_conversion && self.channels == 3
    }

    /// `(lo, hi)` of the stretch over the given foreground values.
    fn bounds(&self, mut values: Vec<f64>) -> (f64, f64) {
        if values.is_empty() {
            return (0.0, 0.0);
        }
        sort_ascending(&mut values);
        match self.normalization.stretch {
            Stretch::MinMax => (values[0], values[values.len() - 1]),
            Stretch::Percentile { low, high } => (
                percentile_sorted(&values, low),
                percentile_sorted(&values, high),
            ),
        }
    }

    pub fn render(&self, embedding: &[f64], mask: &[bool]) -> Result<RenderedImage> {
        let n = self.height * self.width;
        let c = self.channels;
        if embedding.len() != n * c {
            return Err(RankMapError::Shape {
                expected: n * c,
                got: embedding.len(),
            });
        }
        if mask.len() != n {
            return Err(RankMapError::Shape {
                expected: n,
                got: mask.len(),
            });
        }

        let foreground_values = |channel: Option<usize>| -> Vec<f64> {
            embedding
                .chunks_exact(c)
                .zip(mask)
                .filter(|(_, fg)| **fg)
                .flat_map(|(row, _)| match channel {
                    Some(k) => row[k..k + 1].to_vec(),
                    None => row.to_vec(),
                })
                .collect()
        };

        let bounds: Vec<(f64, f64)> = match self.normalization.scope {
            NormalizationScope::PerChannel => {
                (0..c).map(|k| self.bounds(foreground_values(Some(k)))).collect()
            }
            NormalizationScope::Joint => vec![self.bounds(foreground_values(None)); c],
        };
        trace!("render bounds {:?}", bounds);

        let mut data = vec![0u8; n * c];
        for ((out, row), &fg) in data.chunks_exact_mut(c).zip(embedding.chunks_exact(c)).zip(mask) {
            if !fg {
                continue;
            }
            for (k, (o, &v)) in out.iter_mut().zip(row).enumerate() {
                let (lo, hi) = bounds[k];
                let unit = if hi - lo > FLAT_RANGE {
                    ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                *o = (unit * 255.0) as u8;
            }
        }

        if self.converts_color() {
            for (px, &fg) in data.chunks_exact_mut(3).zip(mask) {
                if fg {
                    let rgb = lab8_to_rgb8([px[0], px[1], px[2]]);
                    px.copy_from_slice(&rgb);
                }
            }
        }

        for (px, &fg) in data.chunks_exact_mut(c).zip(mask) {
            if !fg {
                px.fill(0);
            }
        }

        debug!(
            "Rendered {}x{}x{} image (color conversion: {})",
            self.height,
            self.width,
            c,
            self.converts_color()
        );
        Ok(RenderedImage {
            height: self.height,
            width: self.width,
            channels: c,
            data,
        })
    }
}
