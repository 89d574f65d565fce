//! Configuration types for source finding.
//!
//! This module defines the flat [`Config`] struct and associated enums used by
//! the source finding pipeline. All parameters are grouped by comments into
//! logical sections.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use super::error::SourceFindError;
use crate::math::statistics::MedianMethod;

// ============================================================================
// Enums
// ============================================================================

/// Pixel connectivity for connected component labeling.
///
/// Determines which pixels are considered neighbors when grouping
/// above-threshold pixels into islands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connectivity {
    /// 4-connectivity: only horizontal and vertical neighbors.
    /// Pixels at (x±1, y) and (x, y±1) are connected.
    /// Diagonal pixels are NOT connected.
    #[default]
    Four,
    /// 8-connectivity: includes diagonal neighbors.
    /// Merges diagonal chains into one island.
    Eight,
}

/// How the Jacobian of the Gaussian residuals is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum DiffMethod {
    /// Closed-form derivatives, normal equations accumulated one pixel at a time.
    Analytic,
    /// Closed-form derivatives evaluated over all pixels as a single dense block.
    #[default]
    AnalyticSingleBlock,
    /// Central finite differences, one pixel residual at a time.
    Numeric,
    /// Central finite differences of the whole residual vector.
    NumericSingleBlock,
}

/// Minimization algorithm used for Gaussian fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum SolverType {
    /// BFGS quasi-Newton with a backtracking (Armijo) line search.
    #[default]
    LineSearchBfgs,
    /// Limited-memory BFGS with a backtracking (Armijo) line search.
    LineSearchLbfgs,
    /// Levenberg-Marquardt damped Gauss-Newton.
    TrustRegion,
}

// ============================================================================
// Fit Configuration
// ============================================================================

/// Stopping rules and damping for the Gaussian fit solvers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Maximum solver iterations. Hitting the cap marks the fit as not converged.
    pub max_iterations: usize,
    /// Stop when the relative cost decrease falls below this value.
    pub function_tolerance: f64,
    /// Stop when the largest gradient component falls below this value.
    pub gradient_tolerance: f64,
    /// Stop when the step is smaller than `parameter_tolerance * (|x| + parameter_tolerance)`.
    pub parameter_tolerance: f64,
    /// Initial Levenberg-Marquardt damping.
    pub initial_lambda: f64,
    /// Damping multiplier after a rejected step.
    pub lambda_up: f64,
    /// Damping multiplier after an accepted step.
    pub lambda_down: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            function_tolerance: 1e-10,
            gradient_tolerance: 1e-10,
            parameter_tolerance: 1e-10,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

impl FitConfig {
    /// Validate the fit configuration.
    pub fn validate(&self) -> Result<(), SourceFindError> {
        if self.max_iterations == 0 {
            return Err(SourceFindError::InvalidFitConfig(
                "max_iterations must be at least 1",
            ));
        }
        let tolerances = [
            self.function_tolerance,
            self.gradient_tolerance,
            self.parameter_tolerance,
        ];
        if tolerances.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return Err(SourceFindError::InvalidFitConfig(
                "tolerances must be finite and positive",
            ));
        }
        if !self.initial_lambda.is_finite() || self.initial_lambda <= 0.0 {
            return Err(SourceFindError::InvalidFitConfig(
                "initial_lambda must be finite and positive",
            ));
        }
        if !self.lambda_up.is_finite() || self.lambda_up <= 1.0 {
            return Err(SourceFindError::InvalidFitConfig(
                "lambda_up must be greater than 1",
            ));
        }
        if !(self.lambda_down > 0.0 && self.lambda_down < 1.0) {
            return Err(SourceFindError::InvalidFitConfig(
                "lambda_down must be in (0, 1)",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Source Finding Configuration
// ============================================================================

/// Configuration for the source finding pipeline.
///
/// Single flat struct with all parameters grouped by pipeline stage.
/// Use a preset, then customize individual fields as needed.
/// Deserializing fills missing fields from [`Config::default`].
///
/// # Example
///
/// ```rust,ignore
/// use sourcefind::Config;
///
/// let mut config = Config::fitting();
/// config.detection_n_sigma = 4.0;
/// config.find_negative_sources = false;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -- Background estimation --
    /// Fixed noise level. When set, sigma clipping is still run for the
    /// background mean but thresholds use this value as sigma.
    pub rms_estimate: Option<f64>,
    /// Maximum number of sigma-clipping iterations.
    pub sigma_clip_iters: usize,
    /// Median algorithm used while clipping.
    pub median_method: MedianMethod,

    // -- Detection --
    /// Seed threshold in sigma from the background.
    pub detection_n_sigma: f64,
    /// Island boundary threshold in sigma from the background.
    pub analysis_n_sigma: f64,
    /// Also detect islands below the background.
    pub find_negative_sources: bool,
    /// Pixel connectivity for island labeling.
    pub connectivity: Connectivity,
    /// Keep the final label map in the result.
    pub generate_labelmap: bool,

    // -- Island filtering --
    /// Minimum island size in pixels.
    pub source_min_area: usize,

    // -- Gaussian fitting --
    /// Fit a 2D Gaussian to every island.
    pub gaussian_fitting: bool,
    /// Pixels added around the island bounding box when sampling the fit.
    pub fit_padding: usize,
    pub diff_method: DiffMethod,
    pub solver_type: SolverType,
    pub fit: FitConfig,

    // -- Diagnostics --
    /// Record wall-clock durations of every stage.
    pub record_timings: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Background estimation
            rms_estimate: None,
            sigma_clip_iters: 5,
            median_method: MedianMethod::Exact,

            // Detection
            detection_n_sigma: 5.0,
            analysis_n_sigma: 3.0,
            find_negative_sources: true,
            connectivity: Connectivity::Four,
            generate_labelmap: true,

            // Island filtering
            source_min_area: 1,

            // Gaussian fitting
            gaussian_fitting: false,
            fit_padding: 1,
            diff_method: DiffMethod::AnalyticSingleBlock,
            solver_type: SolverType::LineSearchBfgs,
            fit: FitConfig::default(),

            // Diagnostics
            record_timings: false,
        }
    }
}

impl Config {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SourceFindError> {
        // Detection
        for (name, value) in [
            ("detection_n_sigma", self.detection_n_sigma),
            ("analysis_n_sigma", self.analysis_n_sigma),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SourceFindError::InvalidSigma { name, value });
            }
        }
        if self.detection_n_sigma < self.analysis_n_sigma {
            return Err(SourceFindError::ThresholdOrder {
                detection: self.detection_n_sigma,
                analysis: self.analysis_n_sigma,
            });
        }

        // Background estimation
        if let Some(rms) = self.rms_estimate {
            if !rms.is_finite() || rms <= 0.0 {
                return Err(SourceFindError::InvalidRmsEstimate(rms));
            }
        }
        if let MedianMethod::BinApprox { bins: 0 } = self.median_method {
            return Err(SourceFindError::InvalidMedianBins);
        }

        // Gaussian fitting
        self.fit.validate()
    }

    // =========================================================================
    // Preset Constructors
    // =========================================================================

    /// Detection and Gaussian characterisation of every island.
    pub fn fitting() -> Self {
        Self {
            gaussian_fitting: true,
            ..Self::default()
        }
    }

    /// Islands only: no fitting and no label map.
    pub fn detection_only() -> Self {
        Self {
            gaussian_fitting: false,
            generate_labelmap: false,
            ..Self::default()
        }
    }
}
