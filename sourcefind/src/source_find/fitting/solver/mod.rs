//! Nonlinear least-squares minimizers.
//!
//! Every solver minimizes `½ Σ rᵢ²` of a [`LeastSquares`] problem behind the
//! same [`minimize`] contract and stops on the first of:
//! - largest gradient component `<= gradient_tolerance`
//! - relative cost decrease `<= function_tolerance`
//! - step norm `<= parameter_tolerance * (|x| + parameter_tolerance)`
//! - no step decreases the cost any further
//!
//! Running out of iterations is a [`FitFailure::NotConverged`].

mod line_search;
mod lm;


use serde::{Deserialize, Serialize};
use strum_macros::Display;

use super::FitFailure;
use crate::source_find::config::{FitConfig, SolverType};

pub use line_search::LBFGS_MEMORY;

/// Cost, gradient and Gauss-Newton Hessian at one parameter vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalEquations<const N: usize> {
    pub cost: f64,
    /// `Jᵀr`
    pub gradient: [f64; N],
    /// `JᵀJ`
    pub hessian: [[f64; N]; N],
}

/// A least-squares problem with `N` parameters.
pub trait LeastSquares<const N: usize> {
    /// `½ Σ rᵢ²`
    fn cost(&self, params: &[f64; N]) -> f64;

    /// Cost and its gradient `Jᵀr`.
    fn cost_gradient(&self, params: &[f64; N]) -> (f64, [f64; N]);

    fn normal_equations(&self, params: &[f64; N]) -> NormalEquations<N>;
}

/// Why a solver stopped at a minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Termination {
    GradientTolerance,
    FunctionTolerance,
    ParameterTolerance,
    /// No trial step lowered the cost.
    NoFurtherDescent,
}

/// Result of a successful minimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Minimum<const N: usize> {
    pub params: [f64; N],
    pub cost: f64,
    pub iterations: usize,
    pub termination: Termination,
}

impl<const N: usize> Minimum<N> {
    fn new(params: [f64; N], cost: f64, iterations: usize, termination: Termination) -> Self {
        Self {
            params,
            cost,
            iterations,
            termination,
        }
    }
}

/// Minimize `problem` from `initial` with the chosen solver.
pub fn minimize<const N: usize, P: LeastSquares<N>>(
    solver: SolverType,
    problem: &P,
    initial: [f64; N],
    config: &FitConfig,
) -> Result<Minimum<N>, FitFailure> {
    if !all_finite(&initial) {
        return Err(FitFailure::NonFinite);
    }
    let minimum = match solver {
        SolverType::TrustRegion => lm::minimize(problem, initial, config),
        SolverType::LineSearchBfgs => {
            line_search::minimize(problem, initial, config, line_search::Bfgs::new())
        }
        SolverType::LineSearchLbfgs => {
            line_search::minimize(problem, initial, config, line_search::Lbfgs::new())
        }
    }?;

    if !all_finite(&minimum.params) || !minimum.cost.is_finite() {
        return Err(FitFailure::NonFinite);
    }
    Ok(minimum)
}

// ============================================================================
// Vector helpers
// ============================================================================

#[inline]
fn all_finite<const N: usize>(v: &[f64; N]) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[inline]
fn dot<const N: usize>(a: &[f64; N], b: &[f64; N]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
fn norm<const N: usize>(v: &[f64; N]) -> f64 {
    dot(v, v).sqrt()
}

#[inline]
fn max_abs<const N: usize>(v: &[f64; N]) -> f64 {
    v.iter().fold(0.0f64, |acc, x| acc.max(x.abs()))
}

/// `x + alpha * d`
#[inline]
fn axpy<const N: usize>(x: &[f64; N], alpha: f64, d: &[f64; N]) -> [f64; N] {
    std::array::from_fn(|i| x[i] + alpha * d[i])
}

#[inline]
fn sub<const N: usize>(a: &[f64; N], b: &[f64; N]) -> [f64; N] {
    std::array::from_fn(|i| a[i] - b[i])
}

// ============================================================================
// Stopping rules
// ============================================================================

#[inline]
fn gradient_converged<const N: usize>(gradient: &[f64; N], config: &FitConfig) -> bool {
    max_abs(gradient) <= config.gradient_tolerance
}

#[inline]
fn cost_converged(old_cost: f64, new_cost: f64, config: &FitConfig) -> bool {
    old_cost - new_cost <= config.function_tolerance * old_cost
}

#[inline]
fn step_converged<const N: usize>(step: &[f64; N], params: &[f64; N], config: &FitConfig) -> bool {
    let tol = config.parameter_tolerance;
    norm(step) <= tol * (norm(params) + tol)
}
