//! Scalar volume with physical metadata.

use super::geometry::VolumeGeometry;
use crate::error::{CoreError, Result};
use rayon::prelude::*;

/// A 3-D scalar image: an `f32` buffer plus its geometry.
///
/// The buffer is flattened x-fastest, see [`VolumeGeometry::linear_index`].
#[derive(Debug, Clone)]
pub struct Volume {
    geometry: VolumeGeometry,
    data: Vec<f32>,
}

impl Volume {
    /// Wrap an intensity buffer, checking its length against the geometry.
    pub fn new(geometry: VolumeGeometry, data: Vec<f32>) -> Result<Self> {
        if data.len() != geometry.num_voxels() {
            return Err(CoreError::invalid_geometry(format!(
                "buffer holds {} voxels but geometry {:?} needs {}",
                data.len(),
                geometry.dims(),
                geometry.num_voxels()
            )));
        }
        Ok(Self { geometry, data })
    }

    /// Volume filled with a single value.
    pub fn filled(geometry: VolumeGeometry, value: f32) -> Self {
        let data = vec![value; geometry.num_voxels()];
        Self { geometry, data }
    }

    /// Volume whose voxel `(i, j, k)` holds `f(i, j, k)`.
    pub fn from_fn(geometry: VolumeGeometry, f: impl Fn(usize, usize, usize) -> f32 + Sync) -> Self {
        let data = (0..geometry.num_voxels())
            .into_par_iter()
            .map(|idx| {
                let [i, j, k] = geometry.voxel_index(idx);
                f(i, j, k)
            })
            .collect();
        Self { geometry, data }
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Voxel counts per axis, as in the geometry.
    pub fn dims(&self) -> [usize; 3] {
        self.geometry.dims()
    }

    /// Intensities in x-fastest order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Intensity at voxel `(i, j, k)`.
    #[inline]
    pub fn value(&self, ijk: [usize; 3]) -> f32 {
        self.data[self.geometry.linear_index(ijk)]
    }

    #[inline]
    pub fn value_at(&self, linear: usize) -> f32 {
        self.data[linear]
    }

    pub fn set_value(&mut self, ijk: [usize; 3], value: f32) {
        let idx = self.geometry.linear_index(ijk);
        self.data[idx] = value;
    }

    /// Minimum and maximum intensity.
    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .par_iter()
            .fold(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), &v| (lo.min(v), hi.max(v)),
            )
            .reduce(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |a, b| (a.0.min(b.0), a.1.max(b.1)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{Point3, Spacing3};

    fn geom(dims: [usize; 3]) -> VolumeGeometry {
        VolumeGeometry::axis_aligned(dims, Point3::origin(), Spacing3::repeat(1.0)).unwrap()
    }

    #[test]
    fn test_volume_length_check() {
        assert!(Volume::new(geom([2, 2, 2]), vec![0.0; 7]).is_err());
        assert!(Volume::new(geom([2, 2, 2]), vec![0.0; 8]).is_ok());
    }

    #[test]
    fn test_from_fn_layout() {
        let v = Volume::from_fn(geom([3, 2, 2]), |i, j, k| (i + 10 * j + 100 * k) as f32);
        assert_eq!(v.value([2, 1, 1]), 112.0);
        assert_eq!(v.data()[1], 1.0);
        assert_eq!(v.data()[3], 10.0);
        assert_eq!(v.data()[6], 100.0);
    }

    #[test]
    fn test_min_max() {
        let mut v = Volume::filled(geom([4, 4, 4]), 3.0);
        v.set_value([1, 2, 3], -2.0);
        v.set_value([0, 0, 1], 9.5);
        assert_eq!(v.min_max(), (-2.0, 9.5));
    }
}
