//! Rotated elliptical 2D Gaussian and its residuals against image samples.
//!
//! ```text
//! f(x, y) = A · exp(-(a·dx² + 2b·dx·dy + c·dy²))
//! a = cos²θ / (2σx²) + sin²θ / (2σy²)
//! b = sin2θ / (4σy²) - sin2θ / (4σx²)
//! c = sin²θ / (2σx²) + cos²θ / (2σy²)
//! ```
//!
//! Evaluated in the rotated frame `u = dx·cosθ + dy·sinθ`,
//! `v = -dx·sinθ + dy·cosθ`, where the exponent is `u²/(2σx²) + v²/(2σy²)`.

use super::diff::ResidualModel;

/// Parameter order of the model: `[A, x0, y0, σx, σy, θ]`.
pub const NUM_PARAMS: usize = 6;

pub const AMPLITUDE: usize = 0;
pub const X_CENTRE: usize = 1;
pub const Y_CENTRE: usize = 2;
pub const SIGMA_X: usize = 3;
pub const SIGMA_Y: usize = 4;
pub const THETA: usize = 5;

/// Value of the Gaussian at `(x, y)`.
#[inline]
pub fn evaluate(x: f64, y: f64, params: &[f64; NUM_PARAMS]) -> f64 {
    let [amplitude, x0, y0, sigma_x, sigma_y, theta] = *params;
    let (sin_t, cos_t) = theta.sin_cos();
    let dx = x - x0;
    let dy = y - y0;
    let u = dx * cos_t + dy * sin_t;
    let v = -dx * sin_t + dy * cos_t;
    amplitude * (-0.5 * (u * u / (sigma_x * sigma_x) + v * v / (sigma_y * sigma_y))).exp()
}

/// Value and partial derivatives of the Gaussian at `(x, y)`.
#[inline]
pub fn evaluate_with_jacobian(
    x: f64,
    y: f64,
    params: &[f64; NUM_PARAMS],
) -> (f64, [f64; NUM_PARAMS]) {
    let [amplitude, x0, y0, sigma_x, sigma_y, theta] = *params;
    let (sin_t, cos_t) = theta.sin_cos();
    let dx = x - x0;
    let dy = y - y0;
    let u = dx * cos_t + dy * sin_t;
    let v = -dx * sin_t + dy * cos_t;
    let inv_sx2 = 1.0 / (sigma_x * sigma_x);
    let inv_sy2 = 1.0 / (sigma_y * sigma_y);

    let exp_term = (-0.5 * (u * u * inv_sx2 + v * v * inv_sy2)).exp();
    let f = amplitude * exp_term;

    // dQ/dx0 = -(u/σx²)·cosθ + (v/σy²)·sinθ, likewise for y0.
    let du = u * inv_sx2;
    let dv = v * inv_sy2;
    let jacobian = [
        exp_term,
        f * (du * cos_t - dv * sin_t),
        f * (du * sin_t + dv * cos_t),
        f * u * u * inv_sx2 / sigma_x,
        f * v * v * inv_sy2 / sigma_y,
        -f * u * v * (inv_sx2 - inv_sy2),
    ];
    (f, jacobian)
}

/// Image samples a Gaussian is fitted to (struct of arrays).
#[derive(Debug, Clone, Default)]
pub struct FitSamples {
    /// Column coordinates.
    pub x: Vec<f64>,
    /// Row coordinates.
    pub y: Vec<f64>,
    /// Background-subtracted, sign-corrected values.
    pub z: Vec<f64>,
}

impl FitSamples {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, x: f64, y: f64, z: f64) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.z.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }
}

/// Residuals `model(x_i, y_i) - z_i` of a Gaussian against samples.
#[derive(Debug, Clone, Copy)]
pub struct GaussianResiduals<'a> {
    samples: &'a FitSamples,
}

impl<'a> GaussianResiduals<'a> {
    pub fn new(samples: &'a FitSamples) -> Self {
        Self { samples }
    }
}

impl ResidualModel<NUM_PARAMS> for GaussianResiduals<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    fn residual(&self, i: usize, params: &[f64; NUM_PARAMS]) -> f64 {
        evaluate(self.samples.x[i], self.samples.y[i], params) - self.samples.z[i]
    }

    #[inline]
    fn residual_with_jacobian(
        &self,
        i: usize,
        params: &[f64; NUM_PARAMS],
    ) -> (f64, [f64; NUM_PARAMS]) {
        let (f, jacobian) = evaluate_with_jacobian(self.samples.x[i], self.samples.y[i], params);
        (f - self.samples.z[i], jacobian)
    }
}
