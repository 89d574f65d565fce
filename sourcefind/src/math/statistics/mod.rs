//! Robust image statistics: exact and bin-approximate medians and
//! iteratively sigma-clipped mean / standard deviation.
//!
//! All accumulation is done in f64. Non-finite pixels (NaN, ±inf) mark
//! missing data and never take part in any moment.

use serde::{Deserialize, Serialize};

/// Clipping multiplier: values further than `SIGMA_CLIP_KAPPA * sigma` from
/// the median are rejected on every iteration.
pub const SIGMA_CLIP_KAPPA: f64 = 3.0;

/// Smallest clipped population that still yields a usable sigma.
pub const MIN_CLIP_POPULATION: usize = 2;

/// Default number of bins for [`MedianMethod::BinApprox`].
pub const DEFAULT_MEDIAN_BINS: usize = 1000;

/// Algorithm used to compute the median during sigma clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MedianMethod {
    /// Exact median via quickselect. Averages the two middle values for even counts.
    #[default]
    Exact,
    /// Histogram approximation over `[mean - sigma, mean + sigma]` (binapprox).
    /// The result is within one bin width (`2 * sigma / bins`) of the exact median, so `bins`
    /// is the accuracy knob. O(n) with no reordering of the data.
    BinApprox { bins: usize },
}

impl MedianMethod {
    /// Bin-approximate median with the default accuracy.
    pub const fn bin_approx() -> Self {
        Self::BinApprox {
            bins: DEFAULT_MEDIAN_BINS,
        }
    }
}

/// Background statistics of an image.
///
/// With no finite input value there is nothing to estimate: `mean`, `sigma`
/// and `median` are NaN and `sigma_valid` is false. Every other degenerate
/// population keeps its last finite estimate. Check `sigma_valid` before
/// using the numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataStats {
    pub mean: f64,
    pub sigma: f64,
    pub median: f64,
    /// False if the estimate is degenerate (no valid pixels, zero variance,
    /// or clipped down to fewer than [`MIN_CLIP_POPULATION`] values).
    pub sigma_valid: bool,
    /// Number of pixels that contributed to the final estimate.
    pub valid_count: usize,
}

impl DataStats {
    fn empty() -> Self {
        Self {
            mean: f64::NAN,
            sigma: f64::NAN,
            median: f64::NAN,
            sigma_valid: false,
            valid_count: 0,
        }
    }
}

/// Population mean and standard deviation. `None` for an empty slice.
pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    Some((mean, variance.sqrt()))
}

/// Exact median. Reorders `values`; returns NaN for an empty slice.
pub fn median_exact(values: &mut [f64]) -> f64 {
    let len = values.len();
    if len == 0 {
        return f64::NAN;
    }
    let mid = len / 2;
    let (left, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if len % 2 == 1 {
        upper
    } else {
        let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        0.5 * (lower + upper)
    }
}

/// Bin-approximate median of `values` given their `mean` and `std`.
///
/// Values below `mean - std` are only counted; the interval
/// `[mean - std, mean + std]` is split into `bins` equal bins and the centre of
/// the bin holding the median rank is returned. Falls back to the exact median
/// when the spread is zero or the median rank lies outside the binned interval.
pub fn median_binapprox(values: &[f64], mean: f64, std: f64, bins: usize) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    if bins == 0 || std.is_nan() || std <= 0.0 || n < 3 {
        return median_exact(&mut values.to_vec());
    }

    let low = mean - std;
    let scale = bins as f64 / (2.0 * std);
    let mut below = 0usize;
    let mut counts = vec![0usize; bins];
    for &v in values {
        if v < low {
            below += 1;
        } else {
            let bin = ((v - low) * scale) as usize;
            if bin < bins {
                counts[bin] += 1;
            }
        }
    }

    let target = n.div_ceil(2);
    let mut cumulative = below;
    if cumulative >= target {
        return median_exact(&mut values.to_vec());
    }
    for (bin, &count) in counts.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return low + (bin as f64 + 0.5) / scale;
        }
    }

    median_exact(&mut values.to_vec())
}

#[derive(Debug, Clone, Copy)]
struct Estimate {
    mean: f64,
    sigma: f64,
    median: f64,
    count: usize,
}

impl Estimate {
    fn is_degenerate(&self) -> bool {
        self.count < MIN_CLIP_POPULATION
            || !self.sigma.is_finite()
            || self.sigma <= f64::EPSILON * self.mean.abs().max(1.0)
    }

    fn into_stats(self, sigma_valid: bool) -> DataStats {
        DataStats {
            mean: self.mean,
            sigma: self.sigma,
            median: self.median,
            sigma_valid,
            valid_count: self.count,
        }
    }
}

fn estimate(values: &[f64], method: MedianMethod, scratch: &mut Vec<f64>) -> Option<Estimate> {
    let (mean, sigma) = mean_and_std(values)?;
    let median = match method {
        MedianMethod::Exact => {
            scratch.clear();
            scratch.extend_from_slice(values);
            median_exact(scratch)
        }
        MedianMethod::BinApprox { bins } => median_binapprox(values, mean, sigma, bins),
    };
    Some(Estimate {
        mean,
        sigma,
        median,
        count: values.len(),
    })
}

/// Iteratively sigma-clipped statistics of the finite values in `pixels`.
///
/// Each iteration keeps values within [`SIGMA_CLIP_KAPPA`] standard deviations
/// of the current median and re-estimates. Stops early once an iteration
/// removes nothing. If clipping collapses the population or its variance,
/// the last valid estimate is returned with `sigma_valid = false`.
pub fn sigma_clipped_stats(pixels: &[f32], iterations: usize, method: MedianMethod) -> DataStats {
    let mut values: Vec<f64> = pixels
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| v as f64)
        .collect();
    let mut scratch = Vec::with_capacity(values.len());

    let Some(mut current) = estimate(&values, method, &mut scratch) else {
        return DataStats::empty();
    };
    if current.is_degenerate() {
        return current.into_stats(false);
    }

    for _ in 0..iterations {
        let centre = current.median;
        let limit = SIGMA_CLIP_KAPPA * current.sigma;
        let before = values.len();
        values.retain(|&v| (v - centre).abs() <= limit);
        if values.len() == before {
            break;
        }

        match estimate(&values, method, &mut scratch) {
            Some(next) if !next.is_degenerate() => current = next,
            _ => return current.into_stats(false),
        }
    }

    current.into_stats(true)
}

#[cfg(test)]
mod tests;
