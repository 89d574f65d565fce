//! 2D Gaussian characterisation of islands.
//!
//! Every island is fitted with a rotated elliptical Gaussian
//! `[A, x0, y0, σx, σy, θ]` over the pixels of its padded
//! bounding box. Pixels of other islands and non-finite pixels are left out.
//! Values are background-subtracted and multiplied by the island sign, so
//! negative islands are fitted as positive bumps and their amplitude is
//! negated afterwards.
//!
//! Differentiation ([`DiffMethod`](super::config::DiffMethod)) and solver
//! ([`SolverType`](super::config::SolverType)) are chosen from [`Config`];
//! every combination goes through the same minimize contract.

mod diff;
mod linear_solver;
mod model;
mod solver;

#[cfg(test)]
mod tests;

use std::f64::consts::{FRAC_PI_2, PI};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use self::diff::DiffProblem;
use self::model::{FitSamples, GaussianResiduals, NUM_PARAMS};
use super::config::Config;
use super::island::{IslandParams, Islands};
use crate::common::Buffer2;
use crate::math::BoundingBox;

pub use self::solver::{Termination, LBFGS_MEMORY};

/// Why an island could not be characterised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FitFailure {
    #[error("Fewer samples than model parameters")]
    TooFewSamples,

    #[error("All island pixels have the same value")]
    FlatIsland,

    #[error("Solver did not converge within {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("Normal equations are singular")]
    SingularSystem,

    #[error("Non-finite value during minimization")]
    NonFinite,

    #[error("Fitted Gaussian is degenerate")]
    Degenerate,
}

/// A fitted 2D Gaussian.
///
/// `x` is the column axis and `y` the row axis. `theta` is the angle of the
/// semimajor axis from +x towards +y, in `(-π/2, π/2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gaussian2dFit {
    /// Peak value above the background, negative for negative islands.
    pub amplitude: f64,
    pub x_centre: f64,
    pub y_centre: f64,
    /// Larger of the two standard deviations, in pixels.
    pub semimajor: f64,
    /// Smaller of the two standard deviations, in pixels.
    pub semiminor: f64,
    pub theta: f64,
    pub termination: Termination,
    pub iterations: usize,
    /// Final `½ Σ r²`.
    pub cost: f64,
}

/// Collect the fit samples of `island`.
///
/// Returns the samples and whether the island's own pixels are all equal.
fn collect_samples(
    image: &Buffer2<f32>,
    labels: &Buffer2<u32>,
    island: &IslandParams,
    background: f64,
    padding: usize,
) -> (FitSamples, bool) {
    let bbox = island
        .bounding_box
        .padded(padding, image.height(), image.width());
    let s = island.sign.value();

    let mut samples = FitSamples::with_capacity(bbox.area());
    let mut member_min = f32::INFINITY;
    let mut member_max = f32::NEG_INFINITY;

    for row in bbox.min_row..=bbox.max_row {
        let pixels = &image.row(row)[bbox.min_col..=bbox.max_col];
        let row_labels = &labels.row(row)[bbox.min_col..=bbox.max_col];
        for (offset, (&value, &label)) in pixels.iter().zip(row_labels).enumerate() {
            if label != 0 && label != island.label {
                continue;
            }
            if !value.is_finite() {
                continue;
            }
            if label == island.label {
                member_min = member_min.min(value);
                member_max = member_max.max(value);
            }
            let col = bbox.min_col + offset;
            samples.push(col as f64, row as f64, s * (value as f64 - background));
        }
    }

    let flat = island.pixel_count > 1 && member_min == member_max;
    (samples, flat)
}

/// Starting point: peak at the extremum, widths from the island extent.
fn initial_guess(island: &IslandParams, background: f64) -> [f64; NUM_PARAMS] {
    let bbox = &island.bounding_box;
    [
        (island.extremum_value - background).abs(),
        island.extremum_col as f64,
        island.extremum_row as f64,
        (bbox.width() as f64 / 3.0).max(0.5),
        (bbox.height() as f64 / 3.0).max(0.5),
        0.0,
    ]
}

/// Map `theta` into `(-π/2, π/2]`.
#[inline]
fn normalize_angle(theta: f64) -> f64 {
    let t = theta.rem_euclid(PI);
    if t > FRAC_PI_2 {
        t - PI
    } else {
        t
    }
}

/// Fit a Gaussian to one island.
///
/// `labels` is the final label map, used to keep neighbouring islands out of
/// the samples.
///
/// A single-pixel island constrains only the amplitude and the centre. Its
/// fitted widths shrink below a pixel until the solver stops and depend on the
/// solver, so they carry no shape information.
pub fn fit_island(
    image: &Buffer2<f32>,
    labels: &Buffer2<u32>,
    island: &IslandParams,
    background: f64,
    config: &Config,
) -> Result<Gaussian2dFit, FitFailure> {
    let (samples, flat) = collect_samples(image, labels, island, background, config.fit_padding);
    if samples.len() < NUM_PARAMS {
        return Err(FitFailure::TooFewSamples);
    }
    if flat {
        return Err(FitFailure::FlatIsland);
    }

    let residuals = GaussianResiduals::new(&samples);
    let problem = DiffProblem::new(&residuals, config.diff_method);
    let minimum = solver::minimize(
        config.solver_type,
        &problem,
        initial_guess(island, background),
        &config.fit,
    )?;

    let bbox = island
        .bounding_box
        .padded(config.fit_padding, image.height(), image.width());
    validate_result(&minimum.params, &bbox)?;

    let [amplitude, x_centre, y_centre, sigma_x, sigma_y, theta] = minimum.params;
    let sigma_x = sigma_x.abs();
    let sigma_y = sigma_y.abs();
    let (semimajor, semiminor, theta) = if sigma_y > sigma_x {
        (sigma_y, sigma_x, theta + FRAC_PI_2)
    } else {
        (sigma_x, sigma_y, theta)
    };

    Ok(Gaussian2dFit {
        amplitude: island.sign.value() * amplitude,
        x_centre,
        y_centre,
        semimajor,
        semiminor,
        theta: normalize_angle(theta),
        termination: minimum.termination,
        iterations: minimum.iterations,
        cost: minimum.cost,
    })
}

/// Reject fits with a non-positive amplitude, a zero width, or a centre more
/// than one pixel outside the sampled box.
fn validate_result(params: &[f64; NUM_PARAMS], bbox: &BoundingBox) -> Result<(), FitFailure> {
    let [amplitude, x_centre, y_centre, sigma_x, sigma_y, _] = *params;
    if !(sigma_x.abs() > 0.0 && sigma_y.abs() > 0.0 && amplitude > 0.0) {
        return Err(FitFailure::Degenerate);
    }

    let inside_x = x_centre >= bbox.min_col as f64 - 1.0 && x_centre <= bbox.max_col as f64 + 1.0;
    let inside_y = y_centre >= bbox.min_row as f64 - 1.0 && y_centre <= bbox.max_row as f64 + 1.0;
    if !(inside_x && inside_y) {
        return Err(FitFailure::Degenerate);
    }
    Ok(())
}

/// Fit every island in parallel. Results are in island order.
pub fn fit_islands(
    image: &Buffer2<f32>,
    islands: &Islands,
    background: f64,
    config: &Config,
) -> Vec<Result<Gaussian2dFit, FitFailure>> {
    islands
        .islands
        .par_iter()
        .map(|island| {
            let result = fit_island(image, &islands.labels, island, background, config);
            if let Err(failure) = &result {
                tracing::trace!(label = island.label, %failure, "Gaussian fit failed");
            }
            result
        })
        .collect()
}
