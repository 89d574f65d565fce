//! Source finding: detection and Gaussian characterisation of significant
//! signal in a 2D intensity image.
//!
//! # Algorithm Overview
//!
//! 1. **Background statistics**: Iteratively sigma-clipped mean, sigma and
//!    median of all finite pixels. A caller-supplied `rms_estimate` replaces
//!    the clipped sigma.
//!
//! 2. **Thresholding**: Bit masks of pixels deviating from the background by
//!    more than `analysis_n_sigma` and `detection_n_sigma` (positive and,
//!    optionally, negative deviations).
//!
//! 3. **Labeling**: Connected components of the analysis masks that contain at
//!    least one detection pixel become islands, numbered in raster order.
//!
//! 4. **Filtering**: Islands below `source_min_area` pixels are dropped.
//!
//! 5. **Fitting**: Optionally fit a rotated 2D Gaussian to every island.
//!
//! Configuration errors are reported by [`SourceFindImage::new`]; everything
//! that can go wrong for a single island is recorded on that island's
//! [`Source`] and never aborts the run.

pub mod config;
pub mod error;
pub mod fitting;
pub mod island;
pub mod labeling;
pub mod threshold;


use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use self::fitting::fit_islands;
use self::island::{extract_islands, filter_by_area, Islands};
use self::threshold::threshold_masks;
use crate::common::Buffer2;
use crate::math::statistics::{sigma_clipped_stats, DataStats};

pub use config::{Config, Connectivity, DiffMethod, FitConfig, SolverType};
pub use error::{image_from_rows, SourceFindError};
pub use fitting::{FitFailure, Gaussian2dFit, Termination};
pub use island::{IslandParams, Sign};
pub use threshold::Thresholds;

/// Pipeline stage. Stages run once each, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize)]
pub enum Stage {
    Uninitialized,
    StatisticsComputed,
    Thresholded,
    Labeled,
    Filtered,
    Fit,
    Done,
}

/// Outcome of the Gaussian fit of one island.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FitStatus {
    /// Fitting was disabled.
    NotAttempted,
    Fitted(Gaussian2dFit),
    Failed(FitFailure),
}

impl FitStatus {
    pub fn fit(&self) -> Option<&Gaussian2dFit> {
        match self {
            FitStatus::Fitted(fit) => Some(fit),
            _ => None,
        }
    }
}

/// One detected island and its fit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub island: IslandParams,
    pub fit: FitStatus,
}

/// Wall-clock duration of every stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimings {
    pub statistics: Duration,
    pub thresholding: Duration,
    pub labeling: Duration,
    pub filtering: Duration,
    pub fitting: Duration,
    pub total: Duration,
}

/// Counts collected along the pipeline for debugging and tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFindDiagnostics {
    /// Pixels above the analysis threshold (both signs).
    pub analysis_pixels: usize,
    /// Pixels above the detection threshold (both signs).
    pub detection_pixels: usize,
    /// Islands before area filtering.
    pub islands_found: usize,
    /// Islands removed by the area filter.
    pub rejected_small: usize,
    pub fits_succeeded: usize,
    pub fits_failed: usize,
}

/// Result of source finding on one image.
///
/// # Example
///
/// ```rust,ignore
/// use sourcefind::{Config, SourceFindImage};
///
/// let mut config = Config::fitting();
/// config.rms_estimate = Some(1.0);
/// let result = SourceFindImage::new(&image, &config)?;
/// for fit in result.fits() {
///     println!("{:.2} at ({:.2}, {:.2})", fit.amplitude, fit.x_centre, fit.y_centre);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SourceFindImage {
    sources: Vec<Source>,
    stats: DataStats,
    thresholds: Thresholds,
    label_map: Option<Buffer2<u32>>,
    stage: Stage,
    timings: Option<StageTimings>,
    diagnostics: SourceFindDiagnostics,
}

impl SourceFindImage {
    /// Run the whole pipeline on `image`.
    ///
    /// Fails only on an empty image or an invalid configuration.
    pub fn new(image: &Buffer2<f32>, config: &Config) -> Result<Self, SourceFindError> {
        if image.is_empty() {
            return Err(SourceFindError::EmptyImage);
        }
        config.validate()?;

        let total_start = Instant::now();
        let mut timings = StageTimings::default();
        let mut diagnostics = SourceFindDiagnostics::default();
        let mut stage = Stage::Uninitialized;

        // Step 1: Background statistics
        let start = Instant::now();
        let mut stats = sigma_clipped_stats(
            image.pixels(),
            config.sigma_clip_iters,
            config.median_method,
        );
        if let Some(rms) = config.rms_estimate {
            stats.sigma = rms;
            stats.sigma_valid = true;
        } else if !stats.sigma_valid {
            tracing::warn!(
                "Degenerate background statistics (mean={}, sigma={}, {} valid pixels), continuing with last estimate",
                stats.mean,
                stats.sigma,
                stats.valid_count
            );
        }
        timings.statistics = start.elapsed();
        stage = advance(stage, Stage::StatisticsComputed);
        tracing::debug!(
            "Background mean={:.4e} sigma={:.4e} median={:.4e}",
            stats.mean,
            stats.sigma,
            stats.median
        );

        // Step 2: Threshold masks
        let start = Instant::now();
        let thresholds = Thresholds::new(&stats, config.detection_n_sigma, config.analysis_n_sigma);
        let positive = threshold_masks(image, &thresholds, Sign::Positive);
        let negative = config
            .find_negative_sources
            .then(|| threshold_masks(image, &thresholds, Sign::Negative));
        for masks in std::iter::once(&positive).chain(negative.as_ref()) {
            diagnostics.analysis_pixels += masks.analysis.count_ones();
            diagnostics.detection_pixels += masks.detection.count_ones();
        }
        timings.thresholding = start.elapsed();
        stage = advance(stage, Stage::Thresholded);
        tracing::debug!(
            "{} analysis pixels, {} detection pixels",
            diagnostics.analysis_pixels,
            diagnostics.detection_pixels
        );

        // Step 3: Islands
        let start = Instant::now();
        let mut islands = extract_islands(
            image,
            &positive,
            negative.as_ref(),
            &thresholds,
            config.connectivity,
        );
        drop(positive);
        drop(negative);
        diagnostics.islands_found = islands.islands.len();
        timings.labeling = start.elapsed();
        stage = advance(stage, Stage::Labeled);
        tracing::debug!("Found {} islands", diagnostics.islands_found);

        // Step 4: Area filter
        let start = Instant::now();
        diagnostics.rejected_small = filter_by_area(&mut islands, config.source_min_area);
        timings.filtering = start.elapsed();
        stage = advance(stage, Stage::Filtered);
        if diagnostics.rejected_small > 0 {
            tracing::debug!(
                "Removed {} islands smaller than {} pixels",
                diagnostics.rejected_small,
                config.source_min_area
            );
        }

        // Step 5: Gaussian fits
        let fits = if config.gaussian_fitting {
            let start = Instant::now();
            let fits = fit_islands(image, &islands, thresholds.background, config);
            timings.fitting = start.elapsed();
            stage = advance(stage, Stage::Fit);

            diagnostics.fits_succeeded = fits.iter().filter(|f| f.is_ok()).count();
            diagnostics.fits_failed = fits.len() - diagnostics.fits_succeeded;
            tracing::debug!(
                "Fitted {} islands with {}/{}, {} failed",
                diagnostics.fits_succeeded,
                config.solver_type,
                config.diff_method,
                diagnostics.fits_failed
            );
            Some(fits)
        } else {
            None
        };

        let Islands { islands, labels } = islands;
        let sources = match fits {
            Some(fits) => islands
                .into_iter()
                .zip(fits)
                .map(|(island, fit)| Source {
                    island,
                    fit: match fit {
                        Ok(fit) => FitStatus::Fitted(fit),
                        Err(failure) => FitStatus::Failed(failure),
                    },
                })
                .collect(),
            None => islands
                .into_iter()
                .map(|island| Source {
                    island,
                    fit: FitStatus::NotAttempted,
                })
                .collect(),
        };

        timings.total = total_start.elapsed();
        let stage = advance(stage, Stage::Done);

        Ok(Self {
            sources,
            stats,
            thresholds,
            label_map: config.generate_labelmap.then_some(labels),
            stage,
            timings: config.record_timings.then_some(timings),
            diagnostics,
        })
    }

    /// All sources in label order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn into_sources(self) -> Vec<Source> {
        self.sources
    }

    /// Successful fits in label order.
    pub fn fits(&self) -> impl Iterator<Item = &Gaussian2dFit> + '_ {
        self.sources.iter().filter_map(|s| s.fit.fit())
    }

    /// Background statistics used for thresholding.
    pub fn stats(&self) -> &DataStats {
        &self.stats
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Final label map (0 = background), if `generate_labelmap` was set.
    pub fn label_map(&self) -> Option<&Buffer2<u32>> {
        self.label_map.as_ref()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Stage durations, if `record_timings` was set.
    pub fn timings(&self) -> Option<&StageTimings> {
        self.timings.as_ref()
    }

    pub fn diagnostics(&self) -> &SourceFindDiagnostics {
        &self.diagnostics
    }

    pub fn num_positive(&self) -> usize {
        self.count_sign(Sign::Positive)
    }

    pub fn num_negative(&self) -> usize {
        self.count_sign(Sign::Negative)
    }

    fn count_sign(&self, sign: Sign) -> usize {
        self.sources.iter().filter(|s| s.island.sign == sign).count()
    }
}

#[inline]
fn advance(from: Stage, to: Stage) -> Stage {
    debug_assert!(from < to, "stage {from} -> {to}");
    tracing::trace!("Stage {from} -> {to}");
    to
}
