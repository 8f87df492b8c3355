//! Two-pass score and gradient evaluation.
//!
//! Pass 1 resolves every ROI voxel into the moving image and accumulates
//! the histograms; after the big-bin back-fill the score is computed.
//! Pass 2 resolves the same voxels again, turns the per-cell score
//! derivatives into a displacement derivative per voxel and condenses it
//! into 64×3 slots per tile. A final reduction over tiles gives the
//! gradient for every coefficient.

use crate::correspondence::{Correspondence, CorrespondenceFailure, CorrespondenceResolver};
use crate::error::Result;
use crate::metric::{pv_weight_derivatives, pv_weights, HistogramAccumulator, HistogramSet, SampleContribution};
use crate::validation::validate_volume;
use ffdreg_core::transform::bspline::TILE_CONTROL_POINTS;
use ffdreg_core::{BSplineTransform, RoiMask, Vector3, Volume};
use rayon::prelude::*;

const TILE_SLOTS: usize = 3 * TILE_CONTROL_POINTS;

/// Result of one score/gradient evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Negative mutual information; lower is better.
    pub score: f64,
    /// `dS/dc` for every coefficient, same layout as the coefficients.
    pub gradient: Vec<f64>,
    /// Fixed voxels that landed inside the moving volume (and masks).
    pub num_samples: usize,
    pub out_of_bounds: usize,
    pub outside_roi: usize,
    pub gradient_norm: f64,
    pub gradient_max: f64,
}

/// Per-tile output of pass 2.
struct TileDerivative {
    slots: [f64; TILE_SLOTS],
    out_of_bounds: usize,
    outside_roi: usize,
}

/// Evaluates the score and gradient of a transform against a fixed and a
/// moving volume. Bin indices of both volumes are computed once.
pub struct Evaluator<'a> {
    fixed: &'a Volume,
    moving: &'a Volume,
    fixed_mask: Option<&'a RoiMask>,
    resolver: CorrespondenceResolver<'a>,
    accumulator: HistogramAccumulator,
    fixed_bins: Vec<usize>,
    moving_bins: Vec<usize>,
}

impl<'a> Evaluator<'a> {
    /// Bin both volumes with the binnings of `histograms`.
    ///
    /// Both volumes need at least two voxels per axis.
    pub fn new(
        fixed: &'a Volume,
        moving: &'a Volume,
        fixed_mask: Option<&'a RoiMask>,
        moving_mask: Option<&'a RoiMask>,
        histograms: &HistogramSet,
        accumulator: HistogramAccumulator,
    ) -> Result<Self> {
        validate_volume(fixed, "fixed")?;
        validate_volume(moving, "moving")?;
        let fixed_binning = histograms.fixed_binning();
        let moving_binning = histograms.moving_binning();
        Ok(Self {
            fixed,
            moving,
            fixed_mask,
            resolver: CorrespondenceResolver::new(moving.geometry(), moving_mask),
            accumulator,
            fixed_bins: fixed.data().par_iter().map(|&v| fixed_binning.bin(v)).collect(),
            moving_bins: moving.data().par_iter().map(|&v| moving_binning.bin(v)).collect(),
        })
    }

    /// Resolve a fixed voxel through the transform.
    #[inline]
    fn correspondence(
        &self,
        transform: &BSplineTransform,
        region: [usize; 3],
        offset: [usize; 3],
        ijk: [usize; 3],
    ) -> Option<std::result::Result<Correspondence, CorrespondenceFailure>> {
        if let Some(mask) = self.fixed_mask {
            if !mask.contains(ijk) {
                return None;
            }
        }
        let u = transform.displacement(region, offset);
        let x = self.fixed.geometry().voxel_to_physical(ijk);
        Some(self.resolver.resolve(&x, &u))
    }

    #[inline]
    fn neighbour_bins(&self, c: &Correspondence) -> [usize; 8] {
        let dims = self.moving.dims();
        std::array::from_fn(|n| self.moving_bins[c.neighbour_index(n, dims)])
    }

    /// Pass 1: fill `histograms` from scratch, back-fill the big bins and
    /// return the score.
    pub fn accumulate(&self, transform: &BSplineTransform, histograms: &mut HistogramSet) -> f64 {
        histograms.reset();
        let big = histograms.big_bins();
        let fixed_geometry = self.fixed.geometry();

        let samples = (0..transform.num_regions())
            .into_par_iter()
            .flat_map_iter(|r| {
                let region = transform.region_coords(r);
                transform.region_voxels(region).filter_map(move |(offset, ijk)| {
                    match self.correspondence(transform, region, offset, ijk)? {
                        Ok(c) => Some(SampleContribution {
                            fixed_bin: self.fixed_bins[fixed_geometry.linear_index(ijk)],
                            moving_bins: self.neighbour_bins(&c),
                            weights: pv_weights(&c),
                        }),
                        Err(_) => None,
                    }
                })
            });
        self.accumulator.accumulate(histograms.tables_mut(), big, samples);

        if histograms.num_samples() == 0 {
            tracing::warn!("No fixed voxel maps inside the moving volume");
            return 0.0;
        }
        histograms.backfill();
        histograms.compute_score()
    }

    /// Pass 1 and pass 2: score and gradient.
    pub fn evaluate(&self, transform: &BSplineTransform, histograms: &mut HistogramSet) -> Evaluation {
        let score = self.accumulate(transform, histograms);
        let num_samples = histograms.num_samples();

        let mut gradient = vec![0.0; transform.num_coefficients()];
        let mut out_of_bounds = 0;
        let mut outside_roi = 0;

        if num_samples > 0 {
            let histograms = &*histograms;
            let tiles: Vec<TileDerivative> = (0..transform.num_regions())
                .into_par_iter()
                .map(|r| self.tile_derivative(transform, histograms, r, score, num_samples))
                .collect();
            out_of_bounds = tiles.iter().map(|t| t.out_of_bounds).sum();
            outside_roi = tiles.iter().map(|t| t.outside_roi).sum();
            reduce_tiles(transform, &tiles, &mut gradient);
        } else {
            (out_of_bounds, outside_roi) = self.count_failures(transform);
        }

        let gradient_norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
        let gradient_max = gradient.iter().fold(0.0f64, |m, g| m.max(g.abs()));

        tracing::debug!(
            "Evaluation: score {:.6} samples {} out_of_bounds {} outside_roi {} |g| {:.3e} max {:.3e}",
            score,
            num_samples,
            out_of_bounds,
            outside_roi,
            gradient_norm,
            gradient_max
        );

        Evaluation {
            score,
            gradient,
            num_samples,
            out_of_bounds,
            outside_roi,
            gradient_norm,
            gradient_max,
        }
    }

    /// Voxels that miss the moving volume or its mask, without any
    /// histogram or gradient work.
    fn count_failures(&self, transform: &BSplineTransform) -> (usize, usize) {
        (0..transform.num_regions())
            .into_par_iter()
            .map(|r| {
                let region = transform.region_coords(r);
                transform
                    .region_voxels(region)
                    .fold((0, 0), |(oob, roi), (offset, ijk)| {
                        match self.correspondence(transform, region, offset, ijk) {
                            Some(Err(CorrespondenceFailure::OutOfBounds)) => (oob + 1, roi),
                            Some(Err(CorrespondenceFailure::OutsideRoi)) => (oob, roi + 1),
                            _ => (oob, roi),
                        }
                    })
            })
            .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
    }

    /// Pass 2 over one tile.
    fn tile_derivative(
        &self,
        transform: &BSplineTransform,
        histograms: &HistogramSet,
        r: usize,
        score: f64,
        num_samples: usize,
    ) -> TileDerivative {
        let region = transform.region_coords(r);
        let fixed_geometry = self.fixed.geometry();
        let proj_t = self.moving.geometry().projection_matrix().transpose();
        let scale = -1.0 / num_samples as f64;

        let mut tile = TileDerivative {
            slots: [0.0; TILE_SLOTS],
            out_of_bounds: 0,
            outside_roi: 0,
        };

        for (offset, ijk) in transform.region_voxels(region) {
            let c = match self.correspondence(transform, region, offset, ijk) {
                None => continue,
                Some(Err(CorrespondenceFailure::OutOfBounds)) => {
                    tile.out_of_bounds += 1;
                    continue;
                }
                Some(Err(CorrespondenceFailure::OutsideRoi)) => {
                    tile.outside_roi += 1;
                    continue;
                }
                Some(Ok(c)) => c,
            };

            let fixed_bin = self.fixed_bins[fixed_geometry.linear_index(ijk)];
            let bins = self.neighbour_bins(&c);
            let dw = pv_weight_derivatives(&c);

            let mut d_index = Vector3::zeros();
            for n in 0..8 {
                let ds_dp = histograms.score_derivative(fixed_bin, bins[n], score);
                if ds_dp == 0.0 {
                    continue;
                }
                for a in 0..3 {
                    d_index[a] += dw[n][a] * ds_dp;
                }
            }
            if d_index == Vector3::zeros() {
                continue;
            }
            let d_disp = proj_t * (d_index * scale);

            let q = transform.tile_weights(offset);
            for (p, &w) in q.iter().enumerate() {
                tile.slots[3 * p] += w * d_disp.x;
                tile.slots[3 * p + 1] += w * d_disp.y;
                tile.slots[3 * p + 2] += w * d_disp.z;
            }
        }
        tile
    }
}

/// Sum, for every control point, the slots of the tiles that reference it.
fn reduce_tiles(transform: &BSplineTransform, tiles: &[TileDerivative], gradient: &mut [f64]) {
    let cdims = transform.cdims();
    let rdims = transform.rdims();
    gradient.par_chunks_mut(3).enumerate().for_each(|(cp, g)| {
        let ci = [cp % cdims[0], (cp / cdims[0]) % cdims[1], cp / (cdims[0] * cdims[1])];
        let lo: [usize; 3] = std::array::from_fn(|d| ci[d].saturating_sub(3));
        let hi: [usize; 3] = std::array::from_fn(|d| ci[d].min(rdims[d] - 1));
        for rk in lo[2]..=hi[2] {
            for rj in lo[1]..=hi[1] {
                for ri in lo[0]..=hi[0] {
                    let tile = &tiles[transform.region_index([ri, rj, rk])];
                    let p = ((ci[2] - rk) * 4 + (ci[1] - rj)) * 4 + (ci[0] - ri);
                    g[0] += tile.slots[3 * p];
                    g[1] += tile.slots[3 * p + 1];
                    g[2] += tile.slots[3 * p + 2];
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccumulationStrategy, HistogramKind};
    use crate::error::RegistrationError;
    use ffdreg_core::{Point3, Roi, Spacing3, VolumeGeometry};

    fn blob(dims: [usize; 3], centre: [f64; 3]) -> Volume {
        let g = VolumeGeometry::axis_aligned(dims, Point3::origin(), Spacing3::repeat(1.0)).unwrap();
        Volume::from_fn(g, |i, j, k| {
            let d2 = (i as f64 - centre[0]).powi(2)
                + (j as f64 - centre[1]).powi(2)
                + (k as f64 - centre[2]).powi(2);
            (100.0 * (-d2 / 8.0).exp()) as f32
        })
    }

    #[test]
    fn test_mass_conservation_all_strategies() {
        let fixed = blob([10, 10, 10], [4.5, 4.5, 4.5]);
        let moving = blob([10, 10, 10], [5.0, 4.0, 4.5]);
        let mut transform =
            BSplineTransform::new(fixed.geometry(), Roi::whole(fixed.dims()), [4.0; 3]).unwrap();
        for (n, c) in transform.coefficients_mut().iter_mut().enumerate() {
            *c = ((n % 7) as f32 - 3.0) * 0.4;
        }

        for kind in [HistogramKind::EqualSpaced, HistogramKind::VOptimal] {
            let mut scores = Vec::new();
            for strategy in [
                AccumulationStrategy::PrivateMerge,
                AccumulationStrategy::PerBinLock,
                AccumulationStrategy::CriticalSection,
            ] {
                let mut hist = HistogramSet::new(kind, 12, 12, &fixed, &moving);
                let eval =
                    Evaluator::new(&fixed, &moving, None, None, &hist, HistogramAccumulator::new(strategy)).unwrap();
                let score = eval.accumulate(&transform, &mut hist);
                let t = hist.tables();
                let n = t.samples as f64;
                assert!(n > 0.0);
                for table in [&t.fixed, &t.moving, &t.joint] {
                    let total: f64 = table.iter().sum();
                    assert!((total - n).abs() < 1e-6 * n, "{:?} {:?}", kind, strategy);
                }
                scores.push(score);
            }
            assert!((scores[0] - scores[1]).abs() < 1e-9, "{:?}", kind);
            assert!((scores[0] - scores[2]).abs() < 1e-9, "{:?}", kind);
        }
    }

    #[test]
    fn test_rejects_single_slice_moving_volume() {
        let fixed = blob([4, 4, 4], [1.5, 1.5, 1.5]);
        let moving = blob([4, 4, 1], [1.5, 1.5, 0.0]);
        let hist = HistogramSet::new(HistogramKind::EqualSpaced, 8, 8, &fixed, &moving);
        let accumulator = HistogramAccumulator::new(AccumulationStrategy::PrivateMerge);
        let err = Evaluator::new(&fixed, &moving, None, None, &hist, accumulator);
        assert!(matches!(err, Err(RegistrationError::DimensionMismatch(_))));
        let err = Evaluator::new(&moving, &fixed, None, None, &hist, accumulator);
        assert!(matches!(err, Err(RegistrationError::DimensionMismatch(_))));
    }

    #[test]
    fn test_masked_out_voxels_counted_without_samples() {
        let fixed = blob([6, 6, 6], [2.5, 2.5, 2.5]);
        let moving = blob([6, 6, 6], [2.5, 2.5, 2.5]);
        let mask = RoiMask::from_fn(moving.dims(), |_, _, _| false);
        let transform =
            BSplineTransform::new(fixed.geometry(), Roi::whole(fixed.dims()), [3.0; 3]).unwrap();
        let mut hist = HistogramSet::new(HistogramKind::EqualSpaced, 8, 8, &fixed, &moving);
        let eval = Evaluator::new(
            &fixed,
            &moving,
            None,
            Some(&mask),
            &hist,
            HistogramAccumulator::new(AccumulationStrategy::PerBinLock),
        )
        .unwrap();
        let e = eval.evaluate(&transform, &mut hist);
        assert_eq!(e.num_samples, 0);
        assert_eq!(e.out_of_bounds, 0);
        assert_eq!(e.outside_roi, 216);
        assert!(e.gradient.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_zero_samples_gives_zero_gradient() {
        let fixed = blob([6, 6, 6], [2.5, 2.5, 2.5]);
        let moving = blob([6, 6, 6], [2.5, 2.5, 2.5]);
        let mut transform =
            BSplineTransform::new(fixed.geometry(), Roi::whole(fixed.dims()), [3.0; 3]).unwrap();
        for c in transform.coefficients_mut().chunks_mut(3) {
            c[0] = 50.0;
        }
        let mut hist = HistogramSet::new(HistogramKind::EqualSpaced, 8, 8, &fixed, &moving);
        let eval = Evaluator::new(
            &fixed,
            &moving,
            None,
            None,
            &hist,
            HistogramAccumulator::new(AccumulationStrategy::PrivateMerge),
        )
        .unwrap();
        let e = eval.evaluate(&transform, &mut hist);
        assert_eq!(e.num_samples, 0);
        assert_eq!(e.out_of_bounds, 216);
        assert_eq!(e.score, 0.0);
        assert!(e.gradient.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_reduce_tiles_matches_direct_scatter() {
        let g = VolumeGeometry::axis_aligned([7, 6, 5], Point3::origin(), Spacing3::repeat(1.0)).unwrap();
        let transform = BSplineTransform::new(&g, Roi::whole(g.dims()), [2.0; 3]).unwrap();
        let tiles: Vec<TileDerivative> = (0..transform.num_regions())
            .map(|r| TileDerivative {
                slots: std::array::from_fn(|s| (r * 1000 + s) as f64),
                out_of_bounds: 0,
                outside_roi: 0,
            })
            .collect();

        let mut expected = vec![0.0; transform.num_coefficients()];
        for (r, tile) in tiles.iter().enumerate() {
            let cps = transform.tile_control_points(transform.region_coords(r));
            for (p, &cp) in cps.iter().enumerate() {
                for a in 0..3 {
                    expected[3 * cp + a] += tile.slots[3 * p + a];
                }
            }
        }

        let mut gradient = vec![0.0; transform.num_coefficients()];
        reduce_tiles(&transform, &tiles, &mut gradient);
        assert_eq!(gradient, expected);
    }
}
