use std::f64::consts::{FRAC_PI_2, PI};

use super::*;
use super::model::{AMPLITUDE, SIGMA_X, SIGMA_Y, THETA, X_CENTRE, Y_CENTRE};
use crate::math::BoundingBox;
use crate::source_find::config::{Connectivity, DiffMethod, SolverType};
use crate::source_find::island::{extract_islands, IslandParams, Sign};
use crate::source_find::threshold::{threshold_masks, Thresholds};
use crate::testing::{add_gaussian, field, from_ascii, GaussianSource};

const ALL_SOLVERS: [SolverType; 3] = [
    SolverType::LineSearchBfgs,
    SolverType::LineSearchLbfgs,
    SolverType::TrustRegion,
];

const ALL_DIFF_METHODS: [DiffMethod; 4] = [
    DiffMethod::Analytic,
    DiffMethod::AnalyticSingleBlock,
    DiffMethod::Numeric,
    DiffMethod::NumericSingleBlock,
];

/// Islands at 5σ / 3σ over a zero background.
fn find_islands(image: &Buffer2<f32>, sigma: f64, negative: bool) -> Islands {
    let thresholds = Thresholds {
        background: 0.0,
        sigma,
        detection_n_sigma: 5.0,
        analysis_n_sigma: 3.0,
    };
    let positive = threshold_masks(image, &thresholds, Sign::Positive);
    let negative = negative.then(|| threshold_masks(image, &thresholds, Sign::Negative));
    extract_islands(
        image,
        &positive,
        negative.as_ref(),
        &thresholds,
        Connectivity::Four,
    )
}

fn elliptical_source() -> GaussianSource {
    GaussianSource {
        x_centre: 20.3,
        y_centre: 17.6,
        amplitude: 20.0,
        sigma_x: 2.5,
        sigma_y: 1.5,
        theta: 0.4,
    }
}

fn noiseless(sources: &[GaussianSource]) -> Buffer2<f32> {
    let mut image = Buffer2::new_filled(40, 36, 0.0f32);
    for source in sources {
        add_gaussian(&mut image, source);
    }
    image
}

fn fit_single(image: &Buffer2<f32>, config: &Config) -> Result<Gaussian2dFit, FitFailure> {
    let islands = find_islands(image, 1.0, config.find_negative_sources);
    assert_eq!(islands.islands.len(), 1);
    fit_island(image, &islands.labels, &islands.islands[0], 0.0, config)
}

#[test]
fn test_every_solver_and_diff_method_recovers_noiseless_source() {
    let source = elliptical_source();
    let image = noiseless(&[source]);

    for solver_type in ALL_SOLVERS {
        for diff_method in ALL_DIFF_METHODS {
            let config = Config {
                solver_type,
                diff_method,
                ..Config::fitting()
            };
            let fit = fit_single(&image, &config)
                .unwrap_or_else(|e| panic!("{solver_type}/{diff_method}: {e}"));

            let context = format!("{solver_type}/{diff_method}: {fit:?}");
            assert!((fit.amplitude - 20.0).abs() < 1e-3, "{context}");
            assert!((fit.x_centre - 20.3).abs() < 1e-3, "{context}");
            assert!((fit.y_centre - 17.6).abs() < 1e-3, "{context}");
            assert!((fit.semimajor - 2.5).abs() < 1e-3, "{context}");
            assert!((fit.semiminor - 1.5).abs() < 1e-3, "{context}");
            assert!((fit.theta - 0.4).abs() < 1e-3, "{context}");
        }
    }
}

#[test]
fn test_recovers_source_in_noise() {
    let source = GaussianSource {
        x_centre: 31.4,
        y_centre: 30.7,
        amplitude: 30.0,
        sigma_x: 2.0,
        sigma_y: 1.6,
        theta: 0.3,
    };
    let image = field(64, 64, 1.0, 11, &[source]);
    let islands = find_islands(&image, 1.0, false);
    let island = islands
        .islands
        .iter()
        .find(|i| i.bounding_box.contains(31, 31))
        .expect("source island");

    let fit = fit_island(&image, &islands.labels, island, 0.0, &Config::fitting()).unwrap();
    assert!((fit.amplitude - 30.0).abs() < 1.5, "{fit:?}");
    assert!((fit.x_centre - 31.4).abs() < 0.5, "{fit:?}");
    assert!((fit.y_centre - 30.7).abs() < 0.5, "{fit:?}");
    assert!(fit.semimajor >= fit.semiminor);
}

#[test]
fn test_negative_island_mirrors_positive_fit() {
    let source = elliptical_source();
    let mirrored = GaussianSource {
        amplitude: -source.amplitude,
        ..source
    };
    let config = Config::fitting();

    let positive = fit_single(&noiseless(&[source]), &config).unwrap();
    let negative = fit_single(&noiseless(&[mirrored]), &config).unwrap();

    assert_eq!(negative.amplitude, -positive.amplitude);
    assert_eq!(negative.x_centre, positive.x_centre);
    assert_eq!(negative.y_centre, positive.y_centre);
    assert_eq!(negative.semimajor, positive.semimajor);
    assert_eq!(negative.semiminor, positive.semiminor);
    assert_eq!(negative.theta, positive.theta);
}

#[test]
fn test_axes_swap_when_y_is_wider() {
    let source = GaussianSource {
        sigma_x: 1.4,
        sigma_y: 2.6,
        theta: 0.0,
        ..elliptical_source()
    };
    let fit = fit_single(&noiseless(&[source]), &Config::fitting()).unwrap();
    assert!((fit.semimajor - 2.6).abs() < 1e-3, "{fit:?}");
    assert!((fit.semiminor - 1.4).abs() < 1e-3, "{fit:?}");
    assert!((fit.theta.abs() - FRAC_PI_2).abs() < 1e-3, "{fit:?}");
}

#[test]
fn test_flat_island_fails() {
    let image = from_ascii(
        &[
            ".........",
            ".........",
            "...###...",
            "...###...",
            "...###...",
            ".........",
            ".........",
        ],
        10.0,
    );
    assert_eq!(
        fit_single(&image, &Config::fitting()),
        Err(FitFailure::FlatIsland)
    );
}

#[test]
fn test_dip_fitted_as_positive_island_is_degenerate() {
    let image = noiseless(&[GaussianSource::circular(20.3, 17.6, -20.0, 2.0)]);
    let islands = find_islands(&image, 1.0, true);
    assert_eq!(islands.islands.len(), 1);
    assert_eq!(islands.islands[0].sign, Sign::Negative);

    // Same pixels, wrong polarity: the best Gaussian has a negative amplitude.
    let island = IslandParams {
        sign: Sign::Positive,
        ..islands.islands[0]
    };
    let config = Config {
        solver_type: SolverType::TrustRegion,
        ..Config::fitting()
    };
    assert_eq!(
        fit_island(&image, &islands.labels, &island, 0.0, &config),
        Err(FitFailure::Degenerate)
    );
}

#[test]
fn test_validate_result_rejects_degenerate_parameters() {
    let bbox = BoundingBox::new(10, 14, 20, 26);
    let good = [5.0, 23.0, 12.0, 1.5, 1.0, 0.3];
    assert_eq!(validate_result(&good, &bbox), Ok(()));

    // Widths may come out negative; only their magnitude matters.
    let mut flipped = good;
    flipped[SIGMA_X] = -1.5;
    assert_eq!(validate_result(&flipped, &bbox), Ok(()));

    let mut cases = Vec::new();
    for (index, value) in [
        (AMPLITUDE, -5.0),
        (AMPLITUDE, 0.0),
        (SIGMA_X, 0.0),
        (SIGMA_Y, 0.0),
        (X_CENTRE, 18.5),
        (X_CENTRE, 27.5),
        (Y_CENTRE, 8.9),
        (Y_CENTRE, 15.1),
    ] {
        let mut params = good;
        params[index] = value;
        cases.push(params);
    }
    for params in cases {
        assert_eq!(
            validate_result(&params, &bbox),
            Err(FitFailure::Degenerate),
            "{params:?}"
        );
    }

    // Up to one pixel outside the box is tolerated.
    let mut edge = good;
    edge[X_CENTRE] = 19.0;
    edge[Y_CENTRE] = 15.0;
    assert_eq!(validate_result(&edge, &bbox), Ok(()));
}

#[test]
fn test_single_pixel_island_fits_amplitude_and_centre() {
    let mut image = Buffer2::new_filled(25, 21, 0.0f32);
    *image.get_mut(12, 10) = 10.0;
    let islands = find_islands(&image, 1.0, false);
    assert_eq!(islands.islands.len(), 1);
    assert_eq!(islands.islands[0].pixel_count, 1);

    for solver_type in [SolverType::TrustRegion, SolverType::LineSearchBfgs] {
        let config = Config {
            solver_type,
            ..Config::fitting()
        };
        let fit = fit_island(&image, &islands.labels, &islands.islands[0], 0.0, &config)
            .unwrap_or_else(|e| panic!("{solver_type}: {e}"));
        assert!((fit.x_centre - 12.0).abs() < 1e-6, "{solver_type}: {fit:?}");
        assert!((fit.y_centre - 10.0).abs() < 1e-6, "{solver_type}: {fit:?}");
        assert!((fit.amplitude - 10.0).abs() < 1e-3, "{solver_type}: {fit:?}");
        assert!(fit.semimajor < 0.5, "{solver_type}: {fit:?}");
    }
}

#[test]
fn test_too_few_samples() {
    let image = Buffer2::new(3, 1, vec![0.0, 10.0, 0.0]);
    assert_eq!(
        fit_single(&image, &Config::fitting()),
        Err(FitFailure::TooFewSamples)
    );
}

#[test]
fn test_neighbouring_island_is_excluded_from_samples() {
    let image = from_ascii(&[".......", ".##.##.", "......."], 10.0);
    let islands = find_islands(&image, 1.0, false);
    assert_eq!(islands.islands.len(), 2);
    let left = &islands.islands[0];

    let (samples, flat) = collect_samples(&image, &islands.labels, left, 0.0, 3);
    // Padded box is 3 x 6; the two pixels of the right island are skipped.
    assert_eq!(samples.len(), 16);
    assert!(flat);
    assert_eq!(samples.z.iter().filter(|&&z| z == 10.0).count(), 2);
    for (&x, &y) in samples.x.iter().zip(&samples.y) {
        assert!(!(y == 1.0 && (x == 4.0 || x == 5.0)), "({x}, {y})");
    }
}

#[test]
fn test_non_finite_pixels_are_skipped() {
    let mut image = noiseless(&[elliptical_source()]);
    *image.get_mut(0, 0) = f32::NAN;
    *image.get_mut(18, 15) = f32::NAN;
    let islands = find_islands(&image, 1.0, false);
    let island = &islands.islands[0];

    let (samples, _) = collect_samples(&image, &islands.labels, island, 0.0, 1);
    let bbox = island.bounding_box.padded(1, image.height(), image.width());
    let expected = bbox.area() - usize::from(bbox.contains(15, 18));
    assert_eq!(samples.len(), expected);
    assert!(samples.z.iter().all(|z| z.is_finite()));
}

#[test]
fn test_fits_follow_island_order() {
    let first = GaussianSource::circular(8.0, 6.0, 15.0, 1.5);
    let second = GaussianSource::circular(30.0, 25.0, 25.0, 1.8);
    let image = noiseless(&[second, first]);
    let islands = find_islands(&image, 1.0, false);
    assert_eq!(islands.islands.len(), 2);

    let fits = fit_islands(&image, &islands, 0.0, &Config::fitting());
    assert_eq!(fits.len(), 2);
    let a = fits[0].as_ref().unwrap();
    let b = fits[1].as_ref().unwrap();
    assert!((a.x_centre - 8.0).abs() < 1e-3 && (a.y_centre - 6.0).abs() < 1e-3);
    assert!((b.x_centre - 30.0).abs() < 1e-3 && (b.y_centre - 25.0).abs() < 1e-3);
    assert!((b.amplitude - 25.0).abs() < 1e-3);
}

#[test]
fn test_normalize_angle_range() {
    assert_eq!(normalize_angle(0.0), 0.0);
    assert!((normalize_angle(FRAC_PI_2) - FRAC_PI_2).abs() < 1e-12);
    assert!((normalize_angle(-FRAC_PI_2) - FRAC_PI_2).abs() < 1e-12);
    assert!((normalize_angle(0.4 + PI) - 0.4).abs() < 1e-12);
    assert!((normalize_angle(2.0) - (2.0 - PI)).abs() < 1e-12);
    assert!((normalize_angle(-7.0 * PI + 0.1) - 0.1).abs() < 1e-9);
}

#[test]
fn test_initial_guess_from_island() {
    let image = noiseless(&[elliptical_source()]);
    let islands = find_islands(&image, 1.0, false);
    let island = &islands.islands[0];
    let guess = initial_guess(island, 0.0);

    assert_eq!(guess[AMPLITUDE], island.extremum_value);
    assert_eq!(guess[X_CENTRE], island.extremum_col as f64);
    assert_eq!(guess[Y_CENTRE], island.extremum_row as f64);
    assert_eq!(guess[SIGMA_X], island.bounding_box.width() as f64 / 3.0);
    assert_eq!(guess[SIGMA_Y], island.bounding_box.height() as f64 / 3.0);
    assert_eq!(guess[THETA], 0.0);
}
