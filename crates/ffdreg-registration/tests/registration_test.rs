use std::sync::Arc;

use ffdreg_core::{BSplineTransform, Point3, Spacing3, Volume, VolumeGeometry};
use ffdreg_registration::{
    HistoryCallback, LoggingCallback, OptimizerKind, RegistrationConfig, RegistrationSession,
    TerminationReason,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn geometry(dims: [usize; 3]) -> VolumeGeometry {
    VolumeGeometry::axis_aligned(dims, Point3::origin(), Spacing3::repeat(1.0)).unwrap()
}

fn blob(dims: [usize; 3], centre: [f64; 3]) -> Volume {
    Volume::from_fn(geometry(dims), |i, j, k| {
        let d2 = (i as f64 - centre[0]).powi(2)
            + (j as f64 - centre[1]).powi(2)
            + (k as f64 - centre[2]).powi(2);
        (100.0 * (-d2 / 8.0).exp()) as f32
    })
}

fn shifted_pair() -> (Volume, Volume) {
    (
        blob([12, 12, 12], [5.5, 5.5, 5.5]),
        blob([12, 12, 12], [6.5, 5.5, 5.5]),
    )
}

/// Coefficients for a uniform shift away from voxel boundaries.
fn start_coefficients(session: &RegistrationSession<'_>) -> Vec<f32> {
    vec![0.25; session.transform().num_coefficients()]
}

fn blob_config(optimizer: OptimizerKind) -> RegistrationConfig {
    RegistrationConfig::default()
        .with_bins(16)
        .with_knot_spacing([6.0; 3])
        .with_optimizer(optimizer)
        .with_max_iterations(15)
        .with_max_evaluations(60)
        .with_coefficient_bound(2.0)
        .with_initial_step(0.5)
}

#[test]
fn test_constant_volumes_with_perturbed_moving_voxel() {
    init_tracing();
    let fixed = Volume::filled(geometry([8, 8, 8]), 10.0);
    let mut moving = Volume::filled(geometry([8, 8, 8]), 10.0);
    moving.set_value([3, 4, 5], 25.0);

    let config = RegistrationConfig::default()
        .with_bins(8)
        .with_knot_spacing([8.0; 3])
        .with_max_iterations(20);
    let mut session = RegistrationSession::new(config, &fixed, &moving).unwrap();
    assert_eq!(session.transform().num_regions(), 1);

    let report = session.run().unwrap();
    assert_eq!(report.reason, TerminationReason::Converged);
    assert!(report.iterations <= 20);
    assert!(report.best_score <= report.initial_score);

    let t = session.transform();
    assert!(t.coefficients().iter().all(|c| c.abs() < 1e-3));
    let field = ffdreg_core::displacement_field(t);
    for component in &field {
        assert!(component.data().iter().all(|v| v.abs() < 1e-3));
    }
}

#[test]
fn test_identical_volumes_with_outlier_stay_at_identity() {
    init_tracing();
    let g = geometry([8, 8, 8]);
    let mut volume = Volume::filled(g, 10.0);
    volume.set_value([4, 4, 4], 20.0);

    let config = RegistrationConfig::default()
        .with_bins(8)
        .with_knot_spacing([8.0; 3])
        .with_coefficient_bound(0.45)
        .with_max_iterations(30);
    let mut session = RegistrationSession::new(config, &volume, &volume).unwrap();
    assert_eq!(session.transform().num_regions(), 1);
    assert_eq!(session.transform().num_control_points(), 64);

    let report = session.run().unwrap();
    assert!(report.evaluations <= 500);
    assert!(report.best_score <= report.initial_score);
    assert!(report.best_score >= report.initial_score - 1e-9);

    let t = session.transform();
    assert!(t.coefficients().iter().all(|c| c.abs() <= 0.45 + 1e-6));
    let u = t.displacement_at_voxel([4, 4, 4]).unwrap();
    assert!(u.amax() < 1e-2, "displacement at the perturbed voxel: {:?}", u);
}

#[test]
fn test_lbfgsb_improves_shifted_blob() {
    init_tracing();
    let (fixed, moving) = shifted_pair();
    let session = RegistrationSession::new(blob_config(OptimizerKind::Lbfgsb), &fixed, &moving).unwrap();
    let start = start_coefficients(&session);
    let mut session = session.with_initial_coefficients(&start).unwrap();
    session.add_callback(Arc::new(LoggingCallback::new(5)));

    let report = session.run().unwrap();
    assert!(report.best_score < report.initial_score, "{:?}", report);
    assert!(report.iterations >= 1);
    assert!(report.trace.windows(2).all(|w| w[1] <= w[0]));
    assert!(report.improvement() > 0.0);
}

#[test]
fn test_steepest_descent_improves_shifted_blob() {
    init_tracing();
    let (fixed, moving) = shifted_pair();
    let session =
        RegistrationSession::new(blob_config(OptimizerKind::SteepestDescent), &fixed, &moving).unwrap();
    let start = start_coefficients(&session);
    let mut session = session.with_initial_coefficients(&start).unwrap();
    let history = HistoryCallback::new();
    session.add_callback(Arc::new(history.clone()));

    let report = session.run().unwrap();
    assert!(report.best_score < report.initial_score, "{:?}", report);
    assert!(report.evaluations <= 60);
    assert_eq!(history.scores(), report.trace);
    let recorded = history.history();
    assert_eq!(recorded.len(), report.iterations);
    assert!(recorded.iter().all(|p| p.best_score <= report.initial_score));
}

#[test]
fn test_saved_transform_reproduces_best_score() {
    init_tracing();
    let (fixed, moving) = shifted_pair();
    let session = RegistrationSession::new(blob_config(OptimizerKind::Lbfgsb), &fixed, &moving).unwrap();
    let start = start_coefficients(&session);
    let mut session = session.with_initial_coefficients(&start).unwrap();
    let report = session.run().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.ffd");
    session.transform().save(&path).unwrap();
    let loaded = BSplineTransform::load(&path).unwrap();
    assert_eq!(loaded.coefficients(), session.transform().coefficients());

    let mut resumed = RegistrationSession::new(blob_config(OptimizerKind::Lbfgsb), &fixed, &moving)
        .unwrap()
        .with_transform(loaded)
        .unwrap();
    let evaluation = resumed.evaluate().unwrap();
    assert!((evaluation.score - report.best_score).abs() < 1e-9);
}

#[test]
fn test_config_defaults_from_empty_json() {
    let config: RegistrationConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, RegistrationConfig::default());

    let partial: RegistrationConfig =
        serde_json::from_str(r#"{"fixed_bins": 64, "optimizer": "steepest_descent", "strategy": "per_bin_lock"}"#)
            .unwrap();
    assert_eq!(partial.fixed_bins, 64);
    assert_eq!(partial.moving_bins, RegistrationConfig::default().moving_bins);
    assert_eq!(partial.optimizer, OptimizerKind::SteepestDescent);

    let text = serde_json::to_string(&partial).unwrap();
    let back: RegistrationConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, partial);
}

#[test]
fn test_histograms_written_as_csv() -> anyhow::Result<()> {
    let (fixed, moving) = shifted_pair();
    let mut session = RegistrationSession::new(RegistrationConfig::default().with_bins(4), &fixed, &moving)?;
    session.evaluate()?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("hist.csv");
    session.histograms().write_csv(&path)?;
    let text = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "table,fixed_bin,moving_bin,mass");
    assert_eq!(lines.len(), 1 + 4 + 4 + 16);
    Ok(())
}
