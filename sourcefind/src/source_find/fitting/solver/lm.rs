//! Levenberg-Marquardt: damped Gauss-Newton steps on the normal equations.

use super::{
    axpy, cost_converged, gradient_converged, step_converged, LeastSquares, Minimum, Termination,
};
use crate::source_find::config::FitConfig;
use crate::source_find::fitting::linear_solver::solve;
use crate::source_find::fitting::FitFailure;

/// Bounds on the Hessian diagonal used to scale the damping term.
const MIN_DIAGONAL: f64 = 1e-6;
const MAX_DIAGONAL: f64 = 1e32;

const MIN_LAMBDA: f64 = 1e-16;
const MAX_LAMBDA: f64 = 1e16;

pub(super) fn minimize<const N: usize, P: LeastSquares<N>>(
    problem: &P,
    initial: [f64; N],
    config: &FitConfig,
) -> Result<Minimum<N>, FitFailure> {
    let mut params = initial;
    let mut equations = problem.normal_equations(&params);
    if !equations.cost.is_finite() {
        return Err(FitFailure::NonFinite);
    }
    let mut lambda = config.initial_lambda;

    for iter in 0..config.max_iterations {
        if gradient_converged(&equations.gradient, config) {
            return Ok(Minimum::new(
                params,
                equations.cost,
                iter,
                Termination::GradientTolerance,
            ));
        }

        let mut damped = equations.hessian;
        for (i, row) in damped.iter_mut().enumerate() {
            row[i] += lambda * row[i].clamp(MIN_DIAGONAL, MAX_DIAGONAL);
        }
        let rhs = equations.gradient.map(|g| -g);

        let Some(step) = solve(&damped, &rhs) else {
            lambda *= config.lambda_up;
            if lambda > MAX_LAMBDA {
                return Err(FitFailure::SingularSystem);
            }
            continue;
        };

        if step_converged(&step, &params, config) {
            return Ok(Minimum::new(
                params,
                equations.cost,
                iter + 1,
                Termination::ParameterTolerance,
            ));
        }

        let candidate = axpy(&params, 1.0, &step);
        let candidate_cost = problem.cost(&candidate);

        if candidate_cost.is_finite() && candidate_cost < equations.cost {
            let old_cost = equations.cost;
            params = candidate;
            equations = problem.normal_equations(&params);
            lambda = (lambda * config.lambda_down).max(MIN_LAMBDA);

            if cost_converged(old_cost, equations.cost, config) {
                return Ok(Minimum::new(
                    params,
                    equations.cost,
                    iter + 1,
                    Termination::FunctionTolerance,
                ));
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > MAX_LAMBDA {
                return Ok(Minimum::new(
                    params,
                    equations.cost,
                    iter + 1,
                    Termination::NoFurtherDescent,
                ));
            }
        }
    }

    Err(FitFailure::NotConverged {
        iterations: config.max_iterations,
    })
}
