//! Quasi-Newton minimizers (BFGS and L-BFGS) with a backtracking line search.

use std::collections::VecDeque;

use super::{
    axpy, cost_converged, dot, gradient_converged, norm, step_converged, sub, LeastSquares,
    Minimum, Termination,
};
use crate::source_find::config::FitConfig;
use crate::source_find::fitting::FitFailure;

/// Number of correction pairs kept by L-BFGS.
pub const LBFGS_MEMORY: usize = 8;

/// Sufficient-decrease constant of the Armijo condition.
const ARMIJO_C1: f64 = 1e-4;
const BACKTRACK_FACTOR: f64 = 0.5;
const MAX_BACKTRACKS: usize = 60;

/// Inverse-Hessian approximation driving the search direction.
pub(super) trait QuasiNewton<const N: usize> {
    /// Search direction `-H⁻¹ g`.
    fn direction(&self, gradient: &[f64; N]) -> [f64; N];

    /// Incorporate the step `s` and gradient change `y`.
    fn update(&mut self, s: &[f64; N], y: &[f64; N]);

    /// Forget all curvature information.
    fn reset(&mut self);

    /// True until the first curvature pair has been accepted.
    fn is_fresh(&self) -> bool;
}

/// Curvature pairs with `sᵀy` too small relative to `|s||y|` are skipped.
#[inline]
fn curvature_ok<const N: usize>(s: &[f64; N], y: &[f64; N]) -> Option<f64> {
    let sy = dot(s, y);
    (sy > f64::EPSILON * norm(s) * norm(y)).then_some(sy)
}

// ============================================================================
// BFGS
// ============================================================================

/// Dense BFGS inverse-Hessian approximation.
#[derive(Debug, Clone)]
pub(super) struct Bfgs<const N: usize> {
    inverse_hessian: [[f64; N]; N],
    fresh: bool,
}

impl<const N: usize> Bfgs<N> {
    pub(super) fn new() -> Self {
        Self {
            inverse_hessian: identity(1.0),
            fresh: true,
        }
    }
}

fn identity<const N: usize>(scale: f64) -> [[f64; N]; N] {
    std::array::from_fn(|i| std::array::from_fn(|j| if i == j { scale } else { 0.0 }))
}

impl<const N: usize> QuasiNewton<N> for Bfgs<N> {
    fn direction(&self, gradient: &[f64; N]) -> [f64; N] {
        std::array::from_fn(|i| -dot(&self.inverse_hessian[i], gradient))
    }

    fn update(&mut self, s: &[f64; N], y: &[f64; N]) {
        let Some(sy) = curvature_ok(s, y) else {
            return;
        };
        if self.fresh {
            self.inverse_hessian = identity(sy / dot(y, y));
            self.fresh = false;
        }

        // H' = (I - ρ s yᵀ) H (I - ρ y sᵀ) + ρ s sᵀ, with H symmetric.
        let rho = 1.0 / sy;
        let hy: [f64; N] = std::array::from_fn(|i| dot(&self.inverse_hessian[i], y));
        let yhy = dot(y, &hy);
        let ss_scale = rho * rho * yhy + rho;
        for i in 0..N {
            for j in 0..N {
                self.inverse_hessian[i][j] +=
                    ss_scale * s[i] * s[j] - rho * (hy[i] * s[j] + s[i] * hy[j]);
            }
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn is_fresh(&self) -> bool {
        self.fresh
    }
}

// ============================================================================
// L-BFGS
// ============================================================================

/// Limited-memory BFGS keeping the last [`LBFGS_MEMORY`] correction pairs.
#[derive(Debug, Clone)]
pub(super) struct Lbfgs<const N: usize> {
    /// `(s, y, 1 / sᵀy)`, oldest first.
    history: VecDeque<([f64; N], [f64; N], f64)>,
}

impl<const N: usize> Lbfgs<N> {
    pub(super) fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(LBFGS_MEMORY),
        }
    }
}

impl<const N: usize> QuasiNewton<N> for Lbfgs<N> {
    /// Two-loop recursion.
    fn direction(&self, gradient: &[f64; N]) -> [f64; N] {
        let mut q = *gradient;
        let mut alphas = [0.0; LBFGS_MEMORY];

        for (k, (s, y, rho)) in self.history.iter().enumerate().rev() {
            let alpha = rho * dot(s, &q);
            alphas[k] = alpha;
            q = axpy(&q, -alpha, y);
        }

        if let Some((s, y, _)) = self.history.back() {
            let gamma = dot(s, y) / dot(y, y);
            q = q.map(|v| v * gamma);
        }

        for (k, (s, y, rho)) in self.history.iter().enumerate() {
            let beta = rho * dot(y, &q);
            q = axpy(&q, alphas[k] - beta, s);
        }

        q.map(|v| -v)
    }

    fn update(&mut self, s: &[f64; N], y: &[f64; N]) {
        let Some(sy) = curvature_ok(s, y) else {
            return;
        };
        if self.history.len() == LBFGS_MEMORY {
            self.history.pop_front();
        }
        self.history.push_back((*s, *y, 1.0 / sy));
    }

    fn reset(&mut self) {
        self.history.clear();
    }

    fn is_fresh(&self) -> bool {
        self.history.is_empty()
    }
}

// ============================================================================
// Line search loop
// ============================================================================

/// Backtrack from `step` until the Armijo condition holds.
///
/// Returns the accepted parameters and the number of halvings needed.
fn backtrack<const N: usize, P: LeastSquares<N>>(
    problem: &P,
    params: &[f64; N],
    cost: f64,
    direction: &[f64; N],
    slope: f64,
    mut step: f64,
) -> Option<([f64; N], usize)> {
    for halvings in 0..MAX_BACKTRACKS {
        let candidate = axpy(params, step, direction);
        let candidate_cost = problem.cost(&candidate);
        if candidate_cost.is_finite() && candidate_cost <= cost + ARMIJO_C1 * step * slope {
            return Some((candidate, halvings));
        }
        step *= BACKTRACK_FACTOR;
    }
    None
}

pub(super) fn minimize<const N: usize, P: LeastSquares<N>, Q: QuasiNewton<N>>(
    problem: &P,
    initial: [f64; N],
    config: &FitConfig,
    mut quasi_newton: Q,
) -> Result<Minimum<N>, FitFailure> {
    let mut params = initial;
    let (mut cost, mut gradient) = problem.cost_gradient(&params);
    if !cost.is_finite() || gradient.iter().any(|g| !g.is_finite()) {
        return Err(FitFailure::NonFinite);
    }

    for iter in 0..config.max_iterations {
        if gradient_converged(&gradient, config) {
            return Ok(Minimum::new(
                params,
                cost,
                iter,
                Termination::GradientTolerance,
            ));
        }

        let mut direction = quasi_newton.direction(&gradient);
        let mut slope = dot(&gradient, &direction);
        if !(slope < 0.0) {
            quasi_newton.reset();
            direction = gradient.map(|g| -g);
            slope = -dot(&gradient, &gradient);
        }

        // Without curvature information the direction has the gradient's
        // scale, so the first trial step is limited to unit length.
        let initial_step = if quasi_newton.is_fresh() {
            (1.0 / norm(&direction)).min(1.0)
        } else {
            1.0
        };

        let Some((next, halvings)) =
            backtrack(problem, &params, cost, &direction, slope, initial_step)
        else {
            return Ok(Minimum::new(
                params,
                cost,
                iter + 1,
                Termination::NoFurtherDescent,
            ));
        };

        let (next_cost, next_gradient) = problem.cost_gradient(&next);
        if next_gradient.iter().any(|g| !g.is_finite()) {
            return Err(FitFailure::NonFinite);
        }

        let s = sub(&next, &params);
        let y = sub(&next_gradient, &gradient);
        quasi_newton.update(&s, &y);

        let old_cost = cost;
        params = next;
        cost = next_cost;
        gradient = next_gradient;

        // A cost change is only meaningful for a full, unshortened step.
        if halvings == 0 && cost_converged(old_cost, cost, config) {
            return Ok(Minimum::new(
                params,
                cost,
                iter + 1,
                Termination::FunctionTolerance,
            ));
        }
        if step_converged(&s, &params, config) {
            return Ok(Minimum::new(
                params,
                cost,
                iter + 1,
                Termination::ParameterTolerance,
            ));
        }
    }

    Err(FitFailure::NotConverged {
        iterations: config.max_iterations,
    })
}
