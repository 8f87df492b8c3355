//! Interpolator trait.

use crate::image::Volume;
use crate::spatial::Vector3;

/// Samples a volume at a continuous voxel index.
///
/// Indices outside the volume are clamped to the nearest edge; callers
/// decide beforehand whether a location is inside the field of view.
pub trait Interpolator: Send + Sync {
    fn interpolate(&self, volume: &Volume, index: &Vector3) -> f32;
}
