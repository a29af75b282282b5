//! Spillover coefficient fitting tests
//!
//! Synthetic controls are generated from a known coefficient matrix and intercept
//! vector, so the fit has an exact answer to recover.

use approx::assert_abs_diff_eq;
use flow_compensation::{
    ChannelSet, CompensationError, ControlDataset, NelderMeadMinimizer, SpilloverFitConfig,
    SubsampleConfig, compensate, compute_coefficients, compute_coefficients_with,
    fit_prepared_controls,
};
use ndarray::{Array1, Array2, Axis, array, concatenate};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Noise-free single-color controls: control `c` has signal only in channel `c`
fn synthetic_controls(
    coefficients: &Array2<f64>,
    intercepts: &Array1<f64>,
    signals: &[f64],
) -> Vec<Array2<f64>> {
    let n = coefficients.nrows();
    (0..n)
        .map(|c| {
            let mut truth = Array2::<f64>::zeros((signals.len(), n));
            for (row, &s) in signals.iter().enumerate() {
                truth[[row, c]] = s;
            }
            truth.dot(&coefficients.t()) + intercepts
        })
        .collect()
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
        .collect()
}

#[test]
fn test_recovers_two_channel_model() {
    init_tracing();

    let k = array![[1.0, 0.05], [0.02, 1.0]];
    let a = array![5.0, 8.0];
    let controls = synthetic_controls(&k, &a, &linspace(200.0, 2000.0, 40));
    let dataset = ControlDataset::from_named([
        ("FITC", controls[0].clone()),
        ("PE", controls[1].clone()),
    ])
    .unwrap();

    let config = SpilloverFitConfig {
        subsample: SubsampleConfig::seeded(1),
        ..Default::default()
    };
    let minimizer = NelderMeadMinimizer::default().with_max_iterations(20_000);
    let fit = compute_coefficients_with(&dataset, &config, &minimizer, None).unwrap();

    let fitted = fit.coefficients();
    assert!((fitted[[0, 1]] - 0.05).abs() < 1e-5, "K[0,1] = {}", fitted[[0, 1]]);
    assert!((fitted[[1, 0]] - 0.02).abs() < 1e-5, "K[1,0] = {}", fitted[[1, 0]]);
    assert!((fit.intercepts()[0] - 5.0).abs() < 1e-3, "A[0] = {}", fit.intercepts()[0]);
    assert!((fit.intercepts()[1] - 8.0).abs() < 1e-3, "A[1] = {}", fit.intercepts()[1]);
    assert!(fit.objective < 1e-4);
}

#[test]
fn test_recovers_three_channel_model() {
    init_tracing();

    let k = array![[1.0, 0.08, 0.01], [0.15, 1.0, 0.04], [0.02, 0.1, 1.0]];
    let a = array![4.0, 2.0, 6.0];
    let controls = synthetic_controls(&k, &a, &linspace(20.0, 400.0, 30));
    let dataset = ControlDataset::new(ChannelSet::new(["FITC", "PE", "APC"]).unwrap(), controls)
        .unwrap();

    let minimizer = NelderMeadMinimizer {
        max_iterations: Some(60_000),
        restarts: 6,
        ..Default::default()
    };
    let fit = fit_prepared_controls(&dataset, &SpilloverFitConfig::default(), &minimizer, None)
        .unwrap();

    for ((i, j), &expected) in k.indexed_iter() {
        let actual = fit.coefficients()[[i, j]];
        assert!(
            (actual - expected).abs() < 1e-3,
            "K[{i},{j}] expected {expected}, got {actual}"
        );
    }
    for (actual, expected) in fit.intercepts().iter().zip(a.iter()) {
        assert!((actual - expected).abs() < 0.1, "intercept {actual} vs {expected}");
    }
}

#[test]
fn test_outlier_rows_do_not_bias_fit() {
    let k = array![[1.0, 0.05], [0.02, 1.0]];
    let a = array![5.0, 8.0];
    let mut controls = synthetic_controls(&k, &a, &linspace(200.0, 2000.0, 40));

    // Carryover event in the FITC tube: huge PE, tiny FITC
    controls[0] = concatenate(
        Axis(0),
        &[controls[0].view(), array![[12.0, 40_000.0]].view()],
    )
    .unwrap();

    let dataset = ControlDataset::from_named([
        ("FITC", controls[0].clone()),
        ("PE", controls[1].clone()),
    ])
    .unwrap();
    let config = SpilloverFitConfig {
        subsample: SubsampleConfig::seeded(3),
        ..Default::default()
    };
    let minimizer = NelderMeadMinimizer::default().with_max_iterations(20_000);
    let fit = compute_coefficients_with(&dataset, &config, &minimizer, None).unwrap();

    assert!((fit.coefficients()[[1, 0]] - 0.02).abs() < 1e-4);
    assert!((fit.coefficients()[[0, 1]] - 0.05).abs() < 1e-4);
}

#[test]
fn test_seeded_fit_is_reproducible() {
    let k = array![[1.0, 0.05], [0.02, 1.0]];
    let a = array![5.0, 8.0];
    let mut controls = synthetic_controls(&k, &a, &linspace(200.0, 2000.0, 40));
    controls[1] = controls[1].slice(ndarray::s![..25, ..]).to_owned();

    let channels = ChannelSet::new(["FITC", "PE"]).unwrap();
    let config = SpilloverFitConfig {
        subsample: SubsampleConfig::seeded(99),
        ..Default::default()
    };

    let first = compute_coefficients(&controls, &channels, &config).unwrap();
    let second = compute_coefficients(&controls, &channels, &config).unwrap();
    assert_eq!(first.coefficients(), second.coefficients());
    assert_eq!(first.intercepts(), second.intercepts());
}

#[test]
fn test_fitc_pe_scenario() {
    init_tracing();

    let channels = ChannelSet::new(["FITC", "PE"]).unwrap();
    let controls = vec![
        array![[100.0, 5.0], [200.0, 8.0], [150.0, 6.0]],
        array![[6.0, 110.0], [5.0, 95.0], [7.0, 130.0]],
    ];

    let fit = compute_coefficients(&controls, &channels, &SpilloverFitConfig::default()).unwrap();
    let k = fit.coefficients();

    assert_eq!(k[[0, 0]], 1.0);
    assert_eq!(k[[1, 1]], 1.0);
    for (i, j) in [(0, 1), (1, 0)] {
        assert!(
            k[[i, j]] > 0.02 && k[[i, j]] < 0.07,
            "bleed coefficient K[{i},{j}] = {} outside the expected range",
            k[[i, j]]
        );
    }

    // Three events per control pin each off-target line exactly: regressing PE on FITC in
    // the FITC control gives slope 0.03 and offset 1.83, FITC on PE in the PE control gives
    // slope 0.0568 and offset -0.34. Solving the two offsets for A gives A = [-0.23, 1.83].
    let dataset = ControlDataset::new(channels.clone(), controls.clone()).unwrap();
    let minimizer = NelderMeadMinimizer::default().with_max_iterations(20_000);
    let precise =
        compute_coefficients_with(&dataset, &SpilloverFitConfig::default(), &minimizer, None)
            .unwrap();
    let pk = precise.coefficients();
    assert_abs_diff_eq!(pk[[1, 0]], 0.03, epsilon = 1e-3);
    assert_abs_diff_eq!(pk[[0, 1]], 35.0 / 616.667, epsilon = 1e-3);
    let a = precise.intercepts();
    assert_abs_diff_eq!(a[0], -0.234, epsilon = 0.05);
    assert_abs_diff_eq!(a[1], 1.826, epsilon = 0.05);

    // Compensated controls read close to zero off their own channel
    for (c, control) in controls.iter().enumerate() {
        let corrected = fit.mapping.apply_events(control.view()).unwrap();
        for value in corrected.column(1 - c) {
            assert!(value.abs() < 1.0, "residual {value} in control {c}");
        }
    }

    // FITC bleed into PE is removed from a new observation
    let observed = array![[120.0], [10.0]];
    let compensated = compensate(&observed, k).unwrap();
    assert!(compensated[[1, 0]] < 10.0);
}

#[test]
fn test_control_count_mismatch_rejected() {
    let channels = ChannelSet::new(["FITC", "PE"]).unwrap();
    let control = array![[100.0, 5.0], [200.0, 8.0]];
    let controls = vec![control.clone(), control.clone(), control];

    let err = compute_coefficients(&controls, &channels, &SpilloverFitConfig::default())
        .unwrap_err();
    assert!(matches!(err, CompensationError::InputShape { .. }));
}

#[test]
fn test_column_count_mismatch_rejected() {
    let channels = ChannelSet::new(["FITC", "PE"]).unwrap();
    let controls = vec![array![[100.0, 5.0, 1.0]], array![[6.0, 110.0, 1.0]]];

    let err = compute_coefficients(&controls, &channels, &SpilloverFitConfig::default())
        .unwrap_err();
    assert!(matches!(err, CompensationError::InputShape { .. }));
}

#[test]
fn test_control_emptied_by_outlier_filter() {
    let channels = ChannelSet::new(["FITC", "PE"]).unwrap();
    let controls = vec![
        array![[100.0, 5.0], [200.0, 8.0]],
        array![[5000.0, 110.0], [4000.0, 95.0]],
    ];

    let err = compute_coefficients(&controls, &channels, &SpilloverFitConfig::default())
        .unwrap_err();
    assert!(matches!(err, CompensationError::DegenerateData { .. }));
}
