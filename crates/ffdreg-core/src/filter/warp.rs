//! Resampling a moving volume through a B-spline transform.
//!
//! Every output voxel `x` of the fixed grid takes the moving value at
//! `x + u(x)`, where `u` is zero outside the transform's ROI.

use crate::error::Result;
use crate::image::{Volume, VolumeGeometry};
use crate::interpolation::Interpolator;
use crate::spatial::Vector3;
use crate::transform::BSplineTransform;
use rayon::prelude::*;

/// Render `moving` on `fixed_geometry` through `transform`.
///
/// Samples that land outside the moving field of view take `default_value`.
/// Fails with `GeometryMismatch` if the transform was built on a different
/// grid than `fixed_geometry`.
pub fn warp_volume<I: Interpolator>(
    moving: &Volume,
    transform: &BSplineTransform,
    fixed_geometry: &VolumeGeometry,
    interpolator: &I,
    default_value: f32,
) -> Result<Volume> {
    transform.check_geometry(fixed_geometry)?;
    let moving_geometry = moving.geometry();

    let data: Vec<f32> = (0..fixed_geometry.num_voxels())
        .into_par_iter()
        .map(|idx| {
            let ijk = fixed_geometry.voxel_index(idx);
            let u = transform.displacement_at_voxel(ijk).unwrap_or_else(Vector3::zeros);
            let point = fixed_geometry.voxel_to_physical(ijk) + u;
            let mijk = moving_geometry.physical_to_continuous_index(&point);
            if moving_geometry.contains_continuous_index(&mijk) {
                interpolator.interpolate(moving, &mijk)
            } else {
                default_value
            }
        })
        .collect();

    tracing::debug!(
        "Warped volume {:?} onto grid {:?}",
        moving_geometry.dims(),
        fixed_geometry.dims()
    );

    Volume::new(fixed_geometry.clone(), data)
}

/// Dense displacement field of `transform`, one volume per physical axis
/// on the transform's grid. Voxels outside the ROI hold zero.
pub fn displacement_field(transform: &BSplineTransform) -> [Volume; 3] {
    let geometry = transform.geometry();
    let field: Vec<Vector3> = (0..geometry.num_voxels())
        .into_par_iter()
        .map(|idx| {
            transform
                .displacement_at_voxel(geometry.voxel_index(idx))
                .unwrap_or_else(Vector3::zeros)
        })
        .collect();

    std::array::from_fn(|d| {
        let mut component = Volume::filled(geometry.clone(), 0.0);
        for (out, u) in component.data_mut().iter_mut().zip(&field) {
            *out = u[d] as f32;
        }
        component
    })
}
