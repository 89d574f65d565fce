//! Differentiation strategies that turn per-sample residuals into the cost,
//! gradient and Gauss-Newton normal equations the solvers consume.

use super::solver::{LeastSquares, NormalEquations};
use crate::source_find::config::DiffMethod;

/// Residuals of a model against `len()` samples.
pub trait ResidualModel<const N: usize>: Sync {
    fn len(&self) -> usize;

    /// Residual of sample `i`.
    fn residual(&self, i: usize, params: &[f64; N]) -> f64;

    /// Residual of sample `i` and its closed-form derivatives.
    fn residual_with_jacobian(&self, i: usize, params: &[f64; N]) -> (f64, [f64; N]);
}

/// Central-difference step for a parameter of magnitude `value`.
#[inline]
fn numeric_step(value: f64) -> f64 {
    f64::EPSILON.cbrt() * value.abs().max(1.0)
}

/// Jacobian row of one residual by central differences.
fn numeric_row<const N: usize, M: ResidualModel<N>>(
    model: &M,
    i: usize,
    params: &[f64; N],
) -> [f64; N] {
    let mut row = [0.0; N];
    for (k, out) in row.iter_mut().enumerate() {
        let step = numeric_step(params[k]);
        let mut plus = *params;
        let mut minus = *params;
        plus[k] += step;
        minus[k] -= step;
        *out = (model.residual(i, &plus) - model.residual(i, &minus)) / (plus[k] - minus[k]);
    }
    row
}

/// Full Jacobian by perturbing one parameter at a time over all residuals.
fn numeric_block<const N: usize, M: ResidualModel<N>>(
    model: &M,
    params: &[f64; N],
    jacobian: &mut Vec<[f64; N]>,
) {
    jacobian.clear();
    jacobian.resize(model.len(), [0.0; N]);
    for k in 0..N {
        let step = numeric_step(params[k]);
        let mut plus = *params;
        let mut minus = *params;
        plus[k] += step;
        minus[k] -= step;
        let width = plus[k] - minus[k];
        for (i, row) in jacobian.iter_mut().enumerate() {
            row[k] = (model.residual(i, &plus) - model.residual(i, &minus)) / width;
        }
    }
}

/// Add one residual block to `JᵀJ` (upper triangle) and `Jᵀr`.
#[inline]
#[allow(clippy::needless_range_loop)]
fn accumulate<const N: usize>(
    hessian: &mut [[f64; N]; N],
    gradient: &mut [f64; N],
    row: &[f64; N],
    residual: f64,
) {
    for i in 0..N {
        gradient[i] += row[i] * residual;
        for j in i..N {
            hessian[i][j] += row[i] * row[j];
        }
    }
}

/// Mirror the accumulated upper triangle into the lower one.
#[inline]
fn mirror<const N: usize>(hessian: &mut [[f64; N]; N]) {
    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }
}

/// Compute `JᵀJ` and `Jᵀr` for a dense Jacobian block.
pub fn compute_hessian_gradient<const N: usize>(
    jacobian: &[[f64; N]],
    residuals: &[f64],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];
    for (row, &r) in jacobian.iter().zip(residuals) {
        accumulate(&mut hessian, &mut gradient, row, r);
    }
    mirror(&mut hessian);
    (hessian, gradient)
}

/// A residual model differentiated with a chosen [`DiffMethod`].
///
/// The cost is `½ Σ rᵢ²`, so the gradient is `Jᵀr` and the Gauss-Newton
/// Hessian is `JᵀJ`.
#[derive(Debug)]
pub struct DiffProblem<'a, M> {
    model: &'a M,
    method: DiffMethod,
}

impl<'a, M> DiffProblem<'a, M> {
    pub fn new(model: &'a M, method: DiffMethod) -> Self {
        Self { model, method }
    }

    fn is_single_block(&self) -> bool {
        matches!(
            self.method,
            DiffMethod::AnalyticSingleBlock | DiffMethod::NumericSingleBlock
        )
    }
}

/// Residuals and dense Jacobian of the whole sample set.
fn dense_block<const N: usize, M: ResidualModel<N>>(
    model: &M,
    method: DiffMethod,
    params: &[f64; N],
) -> (Vec<f64>, Vec<[f64; N]>) {
    let len = model.len();
    match method {
        DiffMethod::AnalyticSingleBlock | DiffMethod::Analytic => (0..len)
            .map(|i| model.residual_with_jacobian(i, params))
            .unzip(),
        DiffMethod::NumericSingleBlock | DiffMethod::Numeric => {
            let residuals = (0..len).map(|i| model.residual(i, params)).collect();
            let mut jacobian = Vec::with_capacity(len);
            numeric_block(model, params, &mut jacobian);
            (residuals, jacobian)
        }
    }
}

/// Residual and Jacobian row of one sample.
#[inline]
fn sample_block<const N: usize, M: ResidualModel<N>>(
    model: &M,
    method: DiffMethod,
    i: usize,
    params: &[f64; N],
) -> (f64, [f64; N]) {
    match method {
        DiffMethod::Numeric | DiffMethod::NumericSingleBlock => {
            (model.residual(i, params), numeric_row(model, i, params))
        }
        DiffMethod::Analytic | DiffMethod::AnalyticSingleBlock => {
            model.residual_with_jacobian(i, params)
        }
    }
}

impl<const N: usize, M: ResidualModel<N>> LeastSquares<N> for DiffProblem<'_, M> {
    fn cost(&self, params: &[f64; N]) -> f64 {
        0.5 * (0..self.model.len())
            .map(|i| {
                let r = self.model.residual(i, params);
                r * r
            })
            .sum::<f64>()
    }

    fn cost_gradient(&self, params: &[f64; N]) -> (f64, [f64; N]) {
        let mut cost = 0.0;
        let mut gradient = [0.0; N];
        if self.is_single_block() {
            let (residuals, jacobian) = dense_block(self.model, self.method, params);
            for (row, &r) in jacobian.iter().zip(&residuals) {
                cost += r * r;
                for (g, &j) in gradient.iter_mut().zip(row) {
                    *g += j * r;
                }
            }
        } else {
            for i in 0..self.model.len() {
                let (r, row) = sample_block(self.model, self.method, i, params);
                cost += r * r;
                for (g, &j) in gradient.iter_mut().zip(&row) {
                    *g += j * r;
                }
            }
        }
        (0.5 * cost, gradient)
    }

    fn normal_equations(&self, params: &[f64; N]) -> NormalEquations<N> {
        if self.is_single_block() {
            let (residuals, jacobian) = dense_block(self.model, self.method, params);
            let (hessian, gradient) = compute_hessian_gradient(&jacobian, &residuals);
            let cost = 0.5 * residuals.iter().map(|r| r * r).sum::<f64>();
            return NormalEquations {
                cost,
                gradient,
                hessian,
            };
        }

        let mut hessian = [[0.0; N]; N];
        let mut gradient = [0.0; N];
        let mut cost = 0.0;
        for i in 0..self.model.len() {
            let (r, row) = sample_block(self.model, self.method, i, params);
            cost += r * r;
            accumulate(&mut hessian, &mut gradient, &row, r);
        }
        mirror(&mut hessian);
        NormalEquations {
            cost: 0.5 * cost,
            gradient,
            hessian,
        }
    }
}
