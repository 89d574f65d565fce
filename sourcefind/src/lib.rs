//! Sourcefind - source detection for astronomical images.
//!
//! Given a calibrated 2D intensity image this library:
//! - Estimates the background level and noise with iterative sigma clipping
//! - Finds islands of significant positive (and optionally negative) signal
//! - Characterises every island with a rotated 2D Gaussian fit
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sourcefind::{Config, SourceFindImage, image_from_rows};
//!
//! let image = image_from_rows(&rows)?;
//!
//! let mut config = Config::fitting();
//! config.detection_n_sigma = 5.0;
//! config.analysis_n_sigma = 3.0;
//! let result = SourceFindImage::new(&image, &config)?;
//!
//! println!("Found {} sources", result.sources().len());
//! ```

pub mod common;
pub mod math;
pub mod source_find;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Core types
// ============================================================================

pub use common::{BitBuffer2, Buffer2};
pub use math::statistics::{DataStats, MedianMethod};
pub use math::BoundingBox;

// ============================================================================
// Source finding
// ============================================================================

pub use source_find::{
    // Configuration
    Config,
    Connectivity,
    DiffMethod,
    FitConfig,
    // Results
    FitFailure,
    FitStatus,
    Gaussian2dFit,
    IslandParams,
    Sign,
    SolverType,
    Source,
    SourceFindDiagnostics,
    SourceFindError,
    // Main API
    SourceFindImage,
    Stage,
    StageTimings,
    Termination,
    Thresholds,
    image_from_rows,
};
