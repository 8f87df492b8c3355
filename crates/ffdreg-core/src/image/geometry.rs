//! Physical geometry of a voxel grid.
//!
//! Maps between index space and physical space:
//! `point = origin + Direction * diag(spacing) * index` and its inverse.

use crate::error::{CoreError, Result};
use crate::spatial::{direction_to_cosines, is_orthogonal, Direction3, Point3, Spacing3, Vector3};
use nalgebra::Matrix3;

const ORTHOGONALITY_TOLERANCE: f64 = 1e-6;

/// Origin, spacing, dimensions and direction cosines of a 3-D volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeGeometry {
    dims: [usize; 3],
    origin: Point3,
    spacing: Spacing3,
    direction: Direction3,
    /// `direction * diag(spacing)`: index step to physical step.
    step: Matrix3<f64>,
    /// Inverse of `step`.
    proj: Matrix3<f64>,
}

impl VolumeGeometry {
    /// Create a geometry, rejecting empty dimensions, zero spacing and
    /// singular direction matrices.
    pub fn new(
        dims: [usize; 3],
        origin: Point3,
        spacing: Spacing3,
        direction: Direction3,
    ) -> Result<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(CoreError::invalid_geometry(format!(
                "dimensions must be non-zero, got {:?}",
                dims
            )));
        }
        if spacing.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(CoreError::invalid_geometry(format!(
                "spacing must be finite and non-zero, got {:?}",
                spacing.as_slice()
            )));
        }

        if !is_orthogonal(&direction, ORTHOGONALITY_TOLERANCE) {
            tracing::warn!(
                "Direction cosines {:?} are not orthogonal; physical mapping will shear",
                direction_to_cosines(&direction)
            );
        }

        let step = direction * Matrix3::from_diagonal(&spacing);
        let proj = step.try_inverse().ok_or_else(|| {
            CoreError::invalid_geometry("direction cosines form a singular matrix")
        })?;

        Ok(Self {
            dims,
            origin,
            spacing,
            direction,
            step,
            proj,
        })
    }

    /// Axis-aligned geometry with unit direction cosines.
    pub fn axis_aligned(dims: [usize; 3], origin: Point3, spacing: Spacing3) -> Result<Self> {
        Self::new(dims, origin, spacing, Direction3::identity())
    }

    /// Voxel counts per axis.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Physical position of voxel `(0, 0, 0)`.
    pub fn origin(&self) -> &Point3 {
        &self.origin
    }

    /// Voxel size in mm per axis.
    pub fn spacing(&self) -> &Spacing3 {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction3 {
        &self.direction
    }

    /// Matrix taking an index-space step to a physical step.
    pub fn step_matrix(&self) -> &Matrix3<f64> {
        &self.step
    }

    /// Matrix taking a physical offset to an index-space offset.
    pub fn projection_matrix(&self) -> &Matrix3<f64> {
        &self.proj
    }

    pub fn num_voxels(&self) -> usize {
        self.dims.iter().product()
    }

    /// Flattened buffer index of voxel `(i, j, k)`, x fastest.
    #[inline]
    pub fn linear_index(&self, ijk: [usize; 3]) -> usize {
        (ijk[2] * self.dims[1] + ijk[1]) * self.dims[0] + ijk[0]
    }

    /// Inverse of [`linear_index`](Self::linear_index).
    #[inline]
    pub fn voxel_index(&self, linear: usize) -> [usize; 3] {
        let i = linear % self.dims[0];
        let rest = linear / self.dims[0];
        [i, rest % self.dims[1], rest / self.dims[1]]
    }

    pub fn contains_voxel(&self, ijk: [usize; 3]) -> bool {
        (0..3).all(|d| ijk[d] < self.dims[d])
    }

    /// Whether a continuous index falls within half a voxel of the grid on
    /// every axis, i.e. inside `[-0.5, dim - 0.5]`.
    #[inline]
    pub fn contains_continuous_index(&self, index: &Vector3) -> bool {
        (0..3).all(|d| index[d] >= -0.5 && index[d] <= self.dims[d] as f64 - 0.5)
    }

    /// Physical position of an integer voxel index.
    #[inline]
    pub fn voxel_to_physical(&self, ijk: [usize; 3]) -> Point3 {
        self.continuous_index_to_physical(&Vector3::new(
            ijk[0] as f64,
            ijk[1] as f64,
            ijk[2] as f64,
        ))
    }

    /// `point = origin + step * index`
    #[inline]
    pub fn continuous_index_to_physical(&self, index: &Vector3) -> Point3 {
        self.origin + self.step * index
    }

    /// `index = step^-1 * (point - origin)`
    #[inline]
    pub fn physical_to_continuous_index(&self, point: &Point3) -> Vector3 {
        self.proj * (point - self.origin)
    }

    /// Compare two geometries component-wise within `tol`.
    pub fn matches(&self, other: &VolumeGeometry, tol: f64) -> bool {
        self.dims == other.dims
            && (self.origin - other.origin).amax() <= tol
            && (self.spacing - other.spacing).amax() <= tol
            && (self.direction - other.direction).amax() <= tol
    }

    /// Describe the first difference with `other`, if any.
    pub fn describe_mismatch(&self, other: &VolumeGeometry, tol: f64) -> Option<String> {
        if self.dims != other.dims {
            return Some(format!("dims {:?} vs {:?}", self.dims, other.dims));
        }
        if (self.origin - other.origin).amax() > tol {
            return Some(format!(
                "origin {:?} vs {:?}",
                self.origin.coords.as_slice(),
                other.origin.coords.as_slice()
            ));
        }
        if (self.spacing - other.spacing).amax() > tol {
            return Some(format!(
                "spacing {:?} vs {:?}",
                self.spacing.as_slice(),
                other.spacing.as_slice()
            ));
        }
        if (self.direction - other.direction).amax() > tol {
            return Some("direction cosines differ".to_string());
        }
        None
    }
}

/// Rectangular region of interest in voxel indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub offset: [usize; 3],
    pub dim: [usize; 3],
}

impl Roi {
    pub fn new(offset: [usize; 3], dim: [usize; 3]) -> Self {
        Self { offset, dim }
    }

    /// ROI covering a whole volume.
    pub fn whole(dims: [usize; 3]) -> Self {
        Self {
            offset: [0; 3],
            dim: dims,
        }
    }

    pub fn num_voxels(&self) -> usize {
        self.dim.iter().product()
    }

    /// Whether the ROI is non-empty and fits inside a volume of `dims`.
    pub fn fits(&self, dims: [usize; 3]) -> bool {
        (0..3).all(|d| {
            self.dim[d] > 0
                && self.offset[d]
                    .checked_add(self.dim[d])
                    .is_some_and(|end| end <= dims[d])
        })
    }

    /// Whether a whole-volume voxel index lies inside the ROI.
    pub fn contains(&self, ijk: [usize; 3]) -> bool {
        (0..3).all(|d| ijk[d] >= self.offset[d] && ijk[d] - self.offset[d] < self.dim[d])
    }
}
