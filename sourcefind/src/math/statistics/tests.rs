use super::*;
use crate::testing::noise_image;

#[test]
fn test_mean_and_std_population() {
    let (mean, std) = mean_and_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
    assert!((mean - 5.0).abs() < 1e-12);
    assert!((std - 2.0).abs() < 1e-12);
    assert!(mean_and_std(&[]).is_none());
}

#[test]
fn test_median_exact_odd_and_even() {
    assert_eq!(median_exact(&mut [3.0, 1.0, 2.0]), 2.0);
    assert_eq!(median_exact(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    assert_eq!(median_exact(&mut [7.0]), 7.0);
    assert!(median_exact(&mut []).is_nan());
}

#[test]
fn test_binapprox_within_tolerance_of_exact() {
    let image = noise_image(128, 128, 3.0, 11);
    let values: Vec<f64> = image.pixels().iter().map(|&v| v as f64 + 10.0).collect();
    let (mean, std) = mean_and_std(&values).unwrap();
    let exact = median_exact(&mut values.clone());

    for bins in [10, 100, 1000] {
        let approx = median_binapprox(&values, mean, std, bins);
        let tolerance = 2.0 * std / bins as f64;
        assert!(
            (approx - exact).abs() <= tolerance,
            "bins={bins}: approx={approx}, exact={exact}, tolerance={tolerance}"
        );
    }
}

#[test]
fn test_binapprox_zero_spread_falls_back() {
    let values = [5.0; 9];
    assert_eq!(median_binapprox(&values, 5.0, 0.0, 100), 5.0);
}

#[test]
fn test_clipped_stats_of_pure_noise() {
    let image = noise_image(256, 256, 1.5, 5);
    let stats = sigma_clipped_stats(image.pixels(), 5, MedianMethod::Exact);

    assert!(stats.sigma_valid);
    assert!(stats.mean.abs() < 0.05, "mean = {}", stats.mean);
    assert!(stats.median.abs() < 0.05, "median = {}", stats.median);
    // 3-sigma clipping trims the tails, so sigma ends slightly below 1.5.
    assert!((stats.sigma - 1.5).abs() < 0.1, "sigma = {}", stats.sigma);
    assert!(stats.valid_count > 60_000);
}

#[test]
fn test_single_outlier_does_not_move_clipped_stats() {
    let clean = noise_image(100, 100, 1.0, 17);
    let mut dirty = clean.clone();
    dirty[(50, 50)] = 1.0e6;

    let clean_stats = sigma_clipped_stats(clean.pixels(), 20, MedianMethod::Exact);
    let dirty_stats = sigma_clipped_stats(dirty.pixels(), 20, MedianMethod::Exact);

    // Removing the outlier first only shifts the clipping sequence by one
    // iteration; once both have converged the surviving sets are identical.
    let without_outlier: Vec<f32> = clean
        .pixels()
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != 50 * 100 + 50)
        .map(|(_, &v)| v)
        .collect();
    let reference = sigma_clipped_stats(&without_outlier, 20, MedianMethod::Exact);

    assert!((dirty_stats.mean - reference.mean).abs() < 1e-12);
    assert!((dirty_stats.sigma - reference.sigma).abs() < 1e-12);
    assert!((dirty_stats.mean - clean_stats.mean).abs() < 0.01);
    assert!((dirty_stats.sigma - clean_stats.sigma).abs() < 0.01);
}

#[test]
fn test_outlier_dominates_without_clipping() {
    let mut image = noise_image(100, 100, 1.0, 17);
    image[(10, 10)] = 1.0e6;
    let stats = sigma_clipped_stats(image.pixels(), 0, MedianMethod::Exact);
    assert!(stats.sigma > 1000.0);
    assert!(stats.sigma_valid);
}

#[test]
fn test_invalid_values_are_ignored() {
    let mut image = noise_image(64, 64, 1.0, 23);
    let reference = sigma_clipped_stats(image.pixels(), 5, MedianMethod::Exact);

    let mut extended = image.pixels().to_vec();
    extended.extend([f32::NAN, f32::INFINITY, f32::NEG_INFINITY]);
    let stats = sigma_clipped_stats(&extended, 5, MedianMethod::Exact);
    assert_eq!(stats, reference);

    image[(0, 0)] = f32::NAN;
    let stats = sigma_clipped_stats(image.pixels(), 5, MedianMethod::Exact);
    assert!(stats.mean.is_finite());
    assert!(stats.sigma.is_finite());
}

#[test]
fn test_empty_and_all_invalid_input() {
    let stats = sigma_clipped_stats(&[], 5, MedianMethod::Exact);
    assert!(!stats.sigma_valid);
    assert_eq!(stats.valid_count, 0);

    let stats = sigma_clipped_stats(&[f32::NAN; 16], 5, MedianMethod::Exact);
    assert!(!stats.sigma_valid);
    assert_eq!(stats.valid_count, 0);
    assert!(stats.mean.is_nan());
    assert!(stats.sigma.is_nan());
    assert!(stats.median.is_nan());
}

#[test]
fn test_constant_image_is_degenerate() {
    let stats = sigma_clipped_stats(&[4.0; 100], 5, MedianMethod::Exact);
    assert!(!stats.sigma_valid);
    assert_eq!(stats.mean, 4.0);
    assert_eq!(stats.median, 4.0);
    assert_eq!(stats.sigma, 0.0);
}

#[test]
fn test_clipping_to_zero_variance_keeps_last_valid_estimate() {
    // One hot pixel on an exactly flat background: the first clip removes it
    // and leaves zero variance behind.
    let mut pixels = vec![0.0f32; 100];
    pixels[37] = 1.0;

    let stats = sigma_clipped_stats(&pixels, 10, MedianMethod::Exact);
    assert!(!stats.sigma_valid);
    assert_eq!(stats.valid_count, 100);
    assert!(stats.sigma > 0.0);
    assert!((stats.mean - 0.01).abs() < 1e-12);
}

#[test]
fn test_binapprox_method_close_to_exact() {
    let image = noise_image(128, 128, 2.0, 31);
    let exact = sigma_clipped_stats(image.pixels(), 5, MedianMethod::Exact);
    let approx = sigma_clipped_stats(image.pixels(), 5, MedianMethod::bin_approx());

    assert!(approx.sigma_valid);
    assert!((approx.median - exact.median).abs() < 0.01);
    assert!((approx.sigma - exact.sigma).abs() < 0.01);
}
