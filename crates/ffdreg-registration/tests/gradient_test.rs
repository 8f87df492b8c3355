use ffdreg_core::{BSplineTransform, Point3, Roi, RoiMask, Spacing3, Volume, VolumeGeometry};
use ffdreg_registration::{
    AccumulationStrategy, Evaluator, HistogramAccumulator, HistogramKind, HistogramSet,
};

fn blob(dims: [usize; 3], centre: [f64; 3]) -> Volume {
    let g = VolumeGeometry::axis_aligned(dims, Point3::origin(), Spacing3::repeat(1.0)).unwrap();
    Volume::from_fn(g, |i, j, k| {
        let d2 = (i as f64 - centre[0]).powi(2)
            + (j as f64 - centre[1]).powi(2)
            + (k as f64 - centre[2]).powi(2);
        (100.0 * (-d2 / 10.0).exp()) as f32
    })
}

fn evaluator<'a>(fixed: &'a Volume, moving: &'a Volume, hist: &HistogramSet) -> Evaluator<'a> {
    Evaluator::new(
        fixed,
        moving,
        None,
        None,
        hist,
        HistogramAccumulator::new(AccumulationStrategy::PrivateMerge),
    )
    .unwrap()
}

fn uniform(transform: &mut BSplineTransform, shift: [f32; 3]) {
    for c in transform.coefficients_mut().chunks_mut(3) {
        c.copy_from_slice(&shift);
    }
}

#[test]
fn test_gradient_matches_finite_differences() {
    let fixed = blob([12, 12, 12], [5.5, 5.5, 5.5]);
    let moving = blob([12, 12, 12], [6.2, 5.8, 5.5]);
    let mut hist = HistogramSet::new(HistogramKind::EqualSpaced, 16, 16, &fixed, &moving);
    let eval = evaluator(&fixed, &moving, &hist);

    // Interior ROI and a shift of 0.3 along every axis keep all samples
    // inside the moving volume and away from voxel boundaries.
    let mut transform =
        BSplineTransform::new(fixed.geometry(), Roi::new([2, 2, 2], [8, 8, 8]), [4.0; 3]).unwrap();
    uniform(&mut transform, [0.3; 3]);

    let analytic = eval.evaluate(&transform, &mut hist);
    assert_eq!(analytic.num_samples, 512);
    assert!(analytic.gradient_max > 0.0);

    let eps = 1e-3f32;
    let tol = 2e-2 * analytic.gradient_max + 1e-8;
    for cp in [[1, 1, 1], [2, 2, 2], [3, 2, 1], [2, 3, 3]] {
        for axis in 0..3 {
            let idx = 3 * transform.control_point_index(cp) + axis;
            let base = transform.coefficients()[idx];

            let mut plus = transform.clone();
            plus.coefficients_mut()[idx] = base + eps;
            let mut minus = transform.clone();
            minus.coefficients_mut()[idx] = base - eps;
            let delta = f64::from(plus.coefficients()[idx]) - f64::from(minus.coefficients()[idx]);

            let fd = (eval.accumulate(&plus, &mut hist) - eval.accumulate(&minus, &mut hist)) / delta;
            let g = analytic.gradient[idx];
            assert!(
                (g - fd).abs() <= tol,
                "control point {:?} axis {}: analytic {:.6e} vs finite difference {:.6e}",
                cp,
                axis,
                g,
                fd
            );
        }
    }
}

#[test]
fn test_identical_volumes_extremal_at_identity() {
    let volume = blob([10, 10, 10], [4.5, 4.5, 4.5]);
    let mut hist = HistogramSet::new(HistogramKind::EqualSpaced, 12, 12, &volume, &volume);
    let eval = evaluator(&volume, &volume, &hist);
    let mut transform =
        BSplineTransform::new(volume.geometry(), Roi::whole(volume.dims()), [5.0; 3]).unwrap();

    let identity = eval.accumulate(&transform, &mut hist);
    assert!(identity < 0.0);

    for shift in [[0.3, 0.0, 0.0], [0.0, -0.2, 0.0], [0.1, 0.2, -0.15], [0.45, 0.45, 0.45]] {
        uniform(&mut transform, shift);
        let shifted = eval.accumulate(&transform, &mut hist);
        assert_eq!(hist.num_samples(), 1000);
        assert!(shifted > identity, "shift {:?}: {} vs identity {}", shift, shifted, identity);
    }
}

#[test]
fn test_out_of_bounds_voxels_do_not_contribute() {
    let fixed = blob([6, 6, 6], [2.5, 2.5, 2.5]);
    let moving = blob([6, 6, 6], [3.0, 2.5, 2.0]);
    let mut transform =
        BSplineTransform::new(fixed.geometry(), Roi::whole(fixed.dims()), [3.0; 3]).unwrap();
    // One voxel along x: the last slab lands at index 6, past the moving edge.
    uniform(&mut transform, [1.0, 0.0, 0.0]);

    let mut hist = HistogramSet::new(HistogramKind::EqualSpaced, 8, 8, &fixed, &moving);
    let eval = evaluator(&fixed, &moving, &hist);
    let full = eval.evaluate(&transform, &mut hist);
    assert_eq!(full.out_of_bounds, 36);
    assert_eq!(full.num_samples, 180);

    let mask = RoiMask::from_fn(fixed.dims(), |i, _, _| i < 5);
    let mut masked_hist = HistogramSet::new(HistogramKind::EqualSpaced, 8, 8, &fixed, &moving);
    let masked_eval = Evaluator::new(
        &fixed,
        &moving,
        Some(&mask),
        None,
        &masked_hist,
        HistogramAccumulator::new(AccumulationStrategy::PrivateMerge),
    )
    .unwrap();
    let masked = masked_eval.evaluate(&transform, &mut masked_hist);
    assert_eq!(masked.out_of_bounds, 0);
    assert_eq!(masked.num_samples, 180);

    assert!((full.score - masked.score).abs() < 1e-12);
    for (a, b) in full.gradient.iter().zip(&masked.gradient) {
        assert!((a - b).abs() < 1e-12);
    }
}

#[test]
fn test_strategies_agree_on_gradient() {
    let fixed = blob([10, 10, 10], [4.5, 4.5, 4.5]);
    let moving = blob([10, 10, 10], [5.0, 4.0, 4.5]);
    let mut transform =
        BSplineTransform::new(fixed.geometry(), Roi::whole(fixed.dims()), [4.0; 3]).unwrap();
    uniform(&mut transform, [0.2, -0.1, 0.35]);

    let mut results = Vec::new();
    for strategy in [
        AccumulationStrategy::PrivateMerge,
        AccumulationStrategy::PerBinLock,
        AccumulationStrategy::CriticalSection,
    ] {
        let mut hist = HistogramSet::new(HistogramKind::VOptimal, 10, 10, &fixed, &moving);
        let eval = Evaluator::new(&fixed, &moving, None, None, &hist, HistogramAccumulator::new(strategy)).unwrap();
        results.push(eval.evaluate(&transform, &mut hist));
    }
    for other in &results[1..] {
        assert!((other.score - results[0].score).abs() < 1e-9);
        for (a, b) in other.gradient.iter().zip(&results[0].gradient) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
