use thiserror::Error;

use crate::common::Buffer2;

/// Errors raised while validating the input image or configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceFindError {
    #[error("Image has no pixels")]
    EmptyImage,

    #[error("Image row {row} has {found} columns, expected {expected}")]
    NonRectangular {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Detection threshold ({detection} sigma) must be >= analysis threshold ({analysis} sigma)")]
    ThresholdOrder { detection: f64, analysis: f64 },

    #[error("{name} must be finite and positive, got {value}")]
    InvalidSigma { name: &'static str, value: f64 },

    #[error("rms_estimate must be finite and positive, got {0}")]
    InvalidRmsEstimate(f64),

    #[error("Bin-approximate median needs at least one bin")]
    InvalidMedianBins,

    #[error("Invalid fit configuration: {0}")]
    InvalidFitConfig(&'static str),
}

/// Build an image from nested rows (`rows[row][col]`).
///
/// Rejects an empty image and rows of differing length.
pub fn image_from_rows(rows: &[Vec<f32>]) -> Result<Buffer2<f32>, SourceFindError> {
    let height = rows.len();
    let width = rows.first().map_or(0, Vec::len);
    if height == 0 || width == 0 {
        return Err(SourceFindError::EmptyImage);
    }

    let mut pixels = Vec::with_capacity(width * height);
    for (row, values) in rows.iter().enumerate() {
        if values.len() != width {
            return Err(SourceFindError::NonRectangular {
                row,
                expected: width,
                found: values.len(),
            });
        }
        pixels.extend_from_slice(values);
    }

    Ok(Buffer2::new(width, height, pixels))
}
