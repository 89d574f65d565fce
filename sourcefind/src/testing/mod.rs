//! Synthetic image generators shared by the unit tests and benches.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::Buffer2;

/// Elliptical Gaussian source to paint into a synthetic image.
///
/// `x_centre` is the column coordinate, `y_centre` the row coordinate.
/// `theta` rotates the `sigma_x` axis from +x towards +y.
#[derive(Debug, Clone, Copy)]
pub struct GaussianSource {
    pub x_centre: f64,
    pub y_centre: f64,
    pub amplitude: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub theta: f64,
}

impl GaussianSource {
    /// Circular source.
    pub fn circular(x_centre: f64, y_centre: f64, amplitude: f64, sigma: f64) -> Self {
        Self {
            x_centre,
            y_centre,
            amplitude,
            sigma_x: sigma,
            sigma_y: sigma,
            theta: 0.0,
        }
    }

    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let (sin_t, cos_t) = self.theta.sin_cos();
        let dx = x - self.x_centre;
        let dy = y - self.y_centre;
        let u = dx * cos_t + dy * sin_t;
        let v = -dx * sin_t + dy * cos_t;
        let q = u * u / (self.sigma_x * self.sigma_x) + v * v / (self.sigma_y * self.sigma_y);
        self.amplitude * (-0.5 * q).exp()
    }
}

/// Add a Gaussian source to every pixel of `image`.
pub fn add_gaussian(image: &mut Buffer2<f32>, source: &GaussianSource) {
    let width = image.width();
    for (idx, p) in image.pixels_mut().iter_mut().enumerate() {
        let x = (idx % width) as f64;
        let y = (idx / width) as f64;
        *p += source.evaluate(x, y) as f32;
    }
}

/// Add deterministic zero-mean Gaussian noise (Box-Muller on a seeded `StdRng`).
pub fn add_gaussian_noise(pixels: &mut [f32], sigma: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for p in pixels.iter_mut() {
        let u1: f64 = 1.0 - rng.random::<f64>();
        let u2: f64 = rng.random::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        *p += (z * sigma) as f32;
    }
}

/// Image of pure zero-mean Gaussian noise.
pub fn noise_image(width: usize, height: usize, sigma: f64, seed: u64) -> Buffer2<f32> {
    let mut image = Buffer2::new_filled(width, height, 0.0f32);
    add_gaussian_noise(image.pixels_mut(), sigma, seed);
    image
}

/// Noise image with the given sources painted on top.
pub fn field(
    width: usize,
    height: usize,
    noise_sigma: f64,
    seed: u64,
    sources: &[GaussianSource],
) -> Buffer2<f32> {
    let mut image = noise_image(width, height, noise_sigma, seed);
    for source in sources {
        add_gaussian(&mut image, source);
    }
    image
}

/// Build a mask-shaped test image from an ASCII picture.
///
/// `#` becomes `high`, `-` becomes `-high`, anything else `0.0`.
pub fn from_ascii(rows: &[&str], high: f32) -> Buffer2<f32> {
    let height = rows.len();
    let width = rows.first().map_or(0, |r| r.len());
    Buffer2::from_fn(width, height, |x, y| match rows[y].as_bytes()[x] {
        b'#' => high,
        b'-' => -high,
        _ => 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::statistics::mean_and_std;

    #[test]
    fn test_noise_has_requested_sigma() {
        let image = noise_image(200, 200, 2.0, 7);
        let values: Vec<f64> = image.pixels().iter().map(|&v| v as f64).collect();
        let (mean, std) = mean_and_std(&values).unwrap();
        assert!(mean.abs() < 0.05, "mean = {mean}");
        assert!((std - 2.0).abs() < 0.05, "std = {std}");
    }

    #[test]
    fn test_noise_is_deterministic() {
        assert_eq!(noise_image(16, 16, 1.0, 3), noise_image(16, 16, 1.0, 3));
        assert_ne!(noise_image(16, 16, 1.0, 3), noise_image(16, 16, 1.0, 4));
    }

    #[test]
    fn test_gaussian_peak_at_centre() {
        let source = GaussianSource::circular(4.0, 6.0, 10.0, 1.5);
        let mut image = Buffer2::new_filled(10, 10, 0.0f32);
        add_gaussian(&mut image, &source);
        assert!((image[(4, 6)] - 10.0).abs() < 1e-6);
        assert!(image[(5, 6)] < image[(4, 6)]);
    }
}
