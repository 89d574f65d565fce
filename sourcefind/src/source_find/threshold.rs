//! Two-level threshold masks relative to the background statistics.
//!
//! A pixel is marked when its signed deviation from the background mean
//! strictly exceeds `n_sigma * sigma`. Invalid (non-finite) pixels are never
//! marked. Masks are bit-packed ([`BitBuffer2`]) and filled row-parallel.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::island::Sign;
use crate::common::bit_buffer2::BITS_PER_WORD;
use crate::common::{BitBuffer2, Buffer2};
use crate::math::statistics::DataStats;

/// Absolute threshold levels derived from the background statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Background level (clipped mean).
    pub background: f64,
    /// Noise level used for both thresholds.
    pub sigma: f64,
    pub detection_n_sigma: f64,
    pub analysis_n_sigma: f64,
}

impl Thresholds {
    pub fn new(stats: &DataStats, detection_n_sigma: f64, analysis_n_sigma: f64) -> Self {
        Self {
            background: stats.mean,
            sigma: stats.sigma,
            detection_n_sigma,
            analysis_n_sigma,
        }
    }

    /// Absolute detection level for the given sign: `mean ± n·σ`.
    #[inline]
    pub fn detection_level(&self, sign: Sign) -> f64 {
        self.background + sign.value() * self.detection_n_sigma * self.sigma
    }

    /// Absolute analysis level for the given sign: `mean ± n·σ`.
    #[inline]
    pub fn analysis_level(&self, sign: Sign) -> f64 {
        self.background + sign.value() * self.analysis_n_sigma * self.sigma
    }
}

/// Analysis and detection masks for one sign.
#[derive(Debug, Clone)]
pub struct ThresholdMasks {
    pub analysis: BitBuffer2,
    pub detection: BitBuffer2,
}

/// Build both masks for `sign` in a single pass over the image.
pub fn threshold_masks(image: &Buffer2<f32>, thresholds: &Thresholds, sign: Sign) -> ThresholdMasks {
    let width = image.width();
    let height = image.height();
    let mut analysis = BitBuffer2::new_default(width, height);
    let mut detection = BitBuffer2::new_default(width, height);
    let words_per_row = analysis.words_per_row();
    if words_per_row == 0 {
        return ThresholdMasks {
            analysis,
            detection,
        };
    }

    let background = thresholds.background;
    let s = sign.value();
    let analysis_limit = thresholds.analysis_n_sigma * thresholds.sigma;
    let detection_limit = thresholds.detection_n_sigma * thresholds.sigma;

    analysis
        .words_mut()
        .par_chunks_mut(words_per_row)
        .zip(detection.words_mut().par_chunks_mut(words_per_row))
        .enumerate()
        .for_each(|(y, (analysis_row, detection_row))| {
            let pixels = image.row(y);
            for (word_idx, (a_word, d_word)) in analysis_row
                .iter_mut()
                .zip(detection_row.iter_mut())
                .enumerate()
            {
                let start = word_idx * BITS_PER_WORD;
                let end = (start + BITS_PER_WORD).min(width);
                let mut a_bits = 0u64;
                let mut d_bits = 0u64;
                for (bit, &px) in pixels[start..end].iter().enumerate() {
                    if !px.is_finite() {
                        continue;
                    }
                    let deviation = s * (px as f64 - background);
                    if deviation > analysis_limit {
                        a_bits |= 1u64 << bit;
                    }
                    if deviation > detection_limit {
                        d_bits |= 1u64 << bit;
                    }
                }
                *a_word = a_bits;
                *d_word = d_bits;
            }
        });

    ThresholdMasks {
        analysis,
        detection,
    }
}
