//! Mapping a displaced fixed-image point into the moving image.

use ffdreg_core::interpolation::{clamp_linear, nearest_index};
use ffdreg_core::{Point3, RoiMask, Vector3, VolumeGeometry};
use std::fmt;

/// Why a fixed voxel has no usable moving sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrespondenceFailure {
    /// The displaced point lies more than half a voxel outside the moving grid.
    OutOfBounds,
    /// The nearest moving voxel is excluded by the moving mask.
    OutsideRoi,
}

impl fmt::Display for CorrespondenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds => write!(f, "outside the moving volume"),
            Self::OutsideRoi => write!(f, "outside the moving mask"),
        }
    }
}

/// Moving-image neighbourhood of a displaced point.
///
/// Along axis `d`, voxel `floor[d]` carries weight `lower[d]` and
/// `floor[d] + 1` carries `upper[d]`. On an axis one voxel thick `upper[d]`
/// is zero and the upper corner folds back onto the last voxel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub floor: [usize; 3],
    pub lower: [f64; 3],
    pub upper: [f64; 3],
}

impl Correspondence {
    /// Flattened index of corner `n = (z * 2 + y) * 2 + x` in a volume of `dims`.
    #[inline]
    pub fn neighbour_index(&self, n: usize, dims: [usize; 3]) -> usize {
        let [x, y, z]: [usize; 3] = std::array::from_fn(|d| {
            (self.floor[d] + ((n >> d) & 1)).min(dims[d].saturating_sub(1))
        });
        (z * dims[1] + y) * dims[0] + x
    }
}

/// Resolves correspondences against one moving geometry and optional mask.
#[derive(Debug, Clone, Copy)]
pub struct CorrespondenceResolver<'a> {
    geometry: &'a VolumeGeometry,
    mask: Option<&'a RoiMask>,
}

impl<'a> CorrespondenceResolver<'a> {
    /// Resolver against `geometry`, rejecting points whose nearest voxel is
    /// outside `mask` when one is given.
    pub fn new(geometry: &'a VolumeGeometry, mask: Option<&'a RoiMask>) -> Self {
        Self { geometry, mask }
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        self.geometry
    }

    /// Continuous moving index of `point + displacement`.
    #[inline]
    pub fn moving_index(&self, point: &Point3, displacement: &Vector3) -> Vector3 {
        self.geometry
            .physical_to_continuous_index(&(*point + *displacement))
    }

    /// Locate `point + displacement` in the moving image.
    pub fn resolve(
        &self,
        point: &Point3,
        displacement: &Vector3,
    ) -> Result<Correspondence, CorrespondenceFailure> {
        let mijk = self.moving_index(point, displacement);
        if !self.geometry.contains_continuous_index(&mijk) {
            return Err(CorrespondenceFailure::OutOfBounds);
        }

        let dims = self.geometry.dims();
        if let Some(mask) = self.mask {
            let nearest = std::array::from_fn(|d| nearest_index(mijk[d], dims[d]));
            if !mask.contains(nearest) {
                return Err(CorrespondenceFailure::OutsideRoi);
            }
        }

        let mut out = Correspondence {
            floor: [0; 3],
            lower: [0.0; 3],
            upper: [0.0; 3],
        };
        for d in 0..3 {
            let w = clamp_linear(mijk[d], dims[d]);
            out.floor[d] = w.floor;
            out.lower[d] = w.lower;
            out.upper[d] = w.upper;
        }
        Ok(out)
    }
}
