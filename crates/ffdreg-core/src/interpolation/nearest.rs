//! Nearest-neighbour interpolation.

use super::trait_::Interpolator;
use crate::image::Volume;
use crate::spatial::Vector3;

/// Index of the voxel nearest to `x` along an axis of length `dim`.
#[inline]
pub fn nearest_index(x: f64, dim: usize) -> usize {
    let rounded = x.round();
    if rounded <= 0.0 {
        0
    } else {
        (rounded as usize).min(dim - 1)
    }
}

/// Picks the value of the nearest voxel; suited to label volumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborInterpolator;

impl NearestNeighborInterpolator {
    pub fn new() -> Self {
        Self
    }
}

impl Interpolator for NearestNeighborInterpolator {
    fn interpolate(&self, volume: &Volume, index: &Vector3) -> f32 {
        let dims = volume.dims();
        let ijk = std::array::from_fn(|d| nearest_index(index[d], dims[d]));
        volume.value(ijk)
    }
}
