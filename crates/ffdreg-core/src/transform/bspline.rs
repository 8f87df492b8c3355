//! B-spline free-form deformation over a region of interest.
//!
//! The ROI is cut into regions (tiles) of `vox_per_rgn` voxels per axis.
//! Every tile is influenced by exactly 4×4×4 control points, so the lattice
//! holds `cdims = rdims + 3` control points per axis. Coefficients are stored
//! interleaved (x, y, z) per control point, control points x-fastest.

use super::basis::BasisTable;
use crate::error::{CoreError, Result};
use crate::image::{Roi, VolumeGeometry};
use crate::spatial::{Direction3, Point3, Spacing3, Vector3};

/// Number of control points influencing one tile.
pub const TILE_CONTROL_POINTS: usize = 64;

const GEOMETRY_TOLERANCE: f64 = 1e-6;

/// Region counts, control-point counts and coefficient count of the lattice
/// covering `roi_dim` with `vox_per_rgn` voxels per region.
///
/// `None` when `vox_per_rgn` has a zero or the sizes overflow `usize`.
pub fn lattice_size(
    roi_dim: [usize; 3],
    vox_per_rgn: [usize; 3],
) -> Option<([usize; 3], [usize; 3], usize)> {
    let mut rdims = [0usize; 3];
    let mut cdims = [0usize; 3];
    let mut count = 3usize;
    for d in 0..3 {
        rdims[d] = roi_dim[d].checked_div(vox_per_rgn[d])?
            + usize::from(roi_dim[d] % vox_per_rgn[d] != 0);
        cdims[d] = rdims[d].checked_add(3)?;
        count = count.checked_mul(cdims[d])?;
    }
    Some((rdims, cdims, count))
}

/// Cubic B-spline displacement field attached to a fixed image geometry.
#[derive(Debug, Clone)]
pub struct BSplineTransform {
    geometry: VolumeGeometry,
    roi: Roi,
    vox_per_rgn: [usize; 3],
    grid_spacing: [f64; 3],
    rdims: [usize; 3],
    cdims: [usize; 3],
    coefficients: Vec<f32>,
    basis: [BasisTable; 3],
}

impl BSplineTransform {
    /// Create a zero transform whose knots are `knot_spacing` mm apart.
    ///
    /// The knot spacing is rounded to a whole number of voxels per region,
    /// at least one.
    pub fn new(geometry: &VolumeGeometry, roi: Roi, knot_spacing: [f64; 3]) -> Result<Self> {
        if knot_spacing.iter().any(|k| !(k.is_finite() && *k > 0.0)) {
            return Err(CoreError::invalid_geometry(format!(
                "knot spacing must be positive, got {:?}",
                knot_spacing
            )));
        }
        let spacing = geometry.spacing();
        let vox_per_rgn: [usize; 3] = std::array::from_fn(|d| {
            ((knot_spacing[d] / spacing[d].abs()).round() as usize).max(1)
        });
        Self::with_vox_per_rgn(geometry, roi, vox_per_rgn)
    }

    /// Create a zero transform from raw geometry parameters.
    ///
    /// # Arguments
    /// * `origin`, `spacing`, `dims`, `direction` - Fixed volume geometry
    /// * `roi_offset`, `roi_dim` - Region covered by the lattice, in voxels
    /// * `knot_spacing` - Requested control-point spacing in mm per axis
    ///
    /// # Returns
    /// A transform with every coefficient zero, or `InvalidGeometry`
    #[allow(clippy::too_many_arguments)]
    pub fn initialize(
        origin: [f64; 3],
        spacing: [f64; 3],
        dims: [usize; 3],
        roi_offset: [usize; 3],
        roi_dim: [usize; 3],
        knot_spacing: [f64; 3],
        direction: Direction3,
    ) -> Result<Self> {
        let geometry = VolumeGeometry::new(
            dims,
            Point3::from(origin),
            Spacing3::from(spacing),
            direction,
        )?;
        Self::new(&geometry, Roi::new(roi_offset, roi_dim), knot_spacing)
    }

    /// Create a zero transform with an explicit number of voxels per region.
    pub fn with_vox_per_rgn(
        geometry: &VolumeGeometry,
        roi: Roi,
        vox_per_rgn: [usize; 3],
    ) -> Result<Self> {
        if !roi.fits(geometry.dims()) {
            return Err(CoreError::invalid_geometry(format!(
                "ROI offset {:?} dim {:?} does not fit volume {:?}",
                roi.offset,
                roi.dim,
                geometry.dims()
            )));
        }
        if vox_per_rgn.iter().any(|&v| v == 0) {
            return Err(CoreError::invalid_geometry("voxels per region must be non-zero"));
        }

        let (rdims, cdims, num_coefficients) = lattice_size(roi.dim, vox_per_rgn).ok_or_else(|| {
            CoreError::invalid_geometry(format!(
                "lattice for ROI dim {:?} with {:?} voxels per region is too large",
                roi.dim, vox_per_rgn
            ))
        })?;
        let spacing = geometry.spacing();
        let grid_spacing: [f64; 3] = std::array::from_fn(|d| vox_per_rgn[d] as f64 * spacing[d].abs());

        tracing::debug!(
            "B-spline grid: vox_per_rgn={:?} rdims={:?} cdims={:?} coefficients={}",
            vox_per_rgn,
            rdims,
            cdims,
            num_coefficients
        );

        Ok(Self {
            geometry: geometry.clone(),
            roi,
            vox_per_rgn,
            grid_spacing,
            rdims,
            cdims,
            coefficients: vec![0.0; num_coefficients],
            basis: std::array::from_fn(|d| BasisTable::new(vox_per_rgn[d])),
        })
    }

    /// Geometry of the fixed volume the lattice is attached to.
    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Fixed-volume region covered by the lattice.
    pub fn roi(&self) -> Roi {
        self.roi
    }

    /// Voxels per region along each axis.
    pub fn vox_per_rgn(&self) -> [usize; 3] {
        self.vox_per_rgn
    }

    /// Knot spacing in mm after rounding to whole voxels.
    pub fn grid_spacing(&self) -> [f64; 3] {
        self.grid_spacing
    }

    /// Regions per axis.
    pub fn rdims(&self) -> [usize; 3] {
        self.rdims
    }

    /// Control points per axis.
    pub fn cdims(&self) -> [usize; 3] {
        self.cdims
    }

    pub fn num_regions(&self) -> usize {
        self.rdims.iter().product()
    }

    /// Total control points, `cdims` multiplied out.
    pub fn num_control_points(&self) -> usize {
        self.cdims.iter().product()
    }

    /// Three per control point.
    pub fn num_coefficients(&self) -> usize {
        self.coefficients.len()
    }

    /// Interleaved `(x, y, z)` coefficients in mm, control points x fastest.
    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    pub fn coefficients_mut(&mut self) -> &mut [f32] {
        &mut self.coefficients
    }

    /// Replace all coefficients; the length must match the lattice.
    pub fn set_coefficients(&mut self, coefficients: &[f32]) -> Result<()> {
        if coefficients.len() != self.coefficients.len() {
            return Err(CoreError::geometry_mismatch(format!(
                "expected {} coefficients, got {}",
                self.coefficients.len(),
                coefficients.len()
            )));
        }
        self.coefficients.copy_from_slice(coefficients);
        Ok(())
    }

    /// Flattened index of control point `(i, j, k)`, x fastest.
    #[inline]
    pub fn control_point_index(&self, cp: [usize; 3]) -> usize {
        (cp[2] * self.cdims[1] + cp[1]) * self.cdims[0] + cp[0]
    }

    /// Flattened index of region `(p0, p1, p2)`, x fastest.
    #[inline]
    pub fn region_index(&self, region: [usize; 3]) -> usize {
        (region[2] * self.rdims[1] + region[1]) * self.rdims[0] + region[0]
    }

    /// Inverse of [`region_index`](Self::region_index).
    #[inline]
    pub fn region_coords(&self, index: usize) -> [usize; 3] {
        let p0 = index % self.rdims[0];
        let rest = index / self.rdims[0];
        [p0, rest % self.rdims[1], rest / self.rdims[1]]
    }

    /// Split a whole-volume voxel index into (region, offset within region).
    ///
    /// Returns `None` for voxels outside the ROI.
    pub fn region_and_offset(&self, ijk: [usize; 3]) -> Option<([usize; 3], [usize; 3])> {
        if !self.roi.contains(ijk) {
            return None;
        }
        let rel: [usize; 3] = std::array::from_fn(|d| ijk[d] - self.roi.offset[d]);
        Some((
            std::array::from_fn(|d| rel[d] / self.vox_per_rgn[d]),
            std::array::from_fn(|d| rel[d] % self.vox_per_rgn[d]),
        ))
    }

    /// Voxels of a region clipped to the ROI, as `(offset, whole-volume index)`.
    pub fn region_voxels(
        &self,
        region: [usize; 3],
    ) -> impl Iterator<Item = ([usize; 3], [usize; 3])> {
        let start: [usize; 3] =
            std::array::from_fn(|d| self.roi.offset[d] + region[d] * self.vox_per_rgn[d]);
        let end: [usize; 3] = std::array::from_fn(|d| {
            (start[d] + self.vox_per_rgn[d]).min(self.roi.offset[d] + self.roi.dim[d])
        });
        (start[2]..end[2]).flat_map(move |k| {
            (start[1]..end[1]).flat_map(move |j| {
                (start[0]..end[0])
                    .map(move |i| ([i - start[0], j - start[1], k - start[2]], [i, j, k]))
            })
        })
    }

    /// Flattened indices of the 64 control points influencing a region,
    /// ordered `(k * 4 + j) * 4 + i`.
    pub fn tile_control_points(&self, region: [usize; 3]) -> [usize; TILE_CONTROL_POINTS] {
        let mut out = [0usize; TILE_CONTROL_POINTS];
        for k in 0..4 {
            for j in 0..4 {
                let row = self.control_point_index([region[0], region[1] + j, region[2] + k]);
                for i in 0..4 {
                    out[(k * 4 + j) * 4 + i] = row + i;
                }
            }
        }
        out
    }

    /// Products of the per-axis basis weights for an in-region offset,
    /// in the order of [`tile_control_points`](Self::tile_control_points).
    pub fn tile_weights(&self, offset: [usize; 3]) -> [f64; TILE_CONTROL_POINTS] {
        let bx = self.basis[0].weights(offset[0]);
        let by = self.basis[1].weights(offset[1]);
        let bz = self.basis[2].weights(offset[2]);
        let mut out = [0.0; TILE_CONTROL_POINTS];
        for k in 0..4 {
            for j in 0..4 {
                let wjk = by[j] * bz[k];
                for i in 0..4 {
                    out[(k * 4 + j) * 4 + i] = bx[i] * wjk;
                }
            }
        }
        out
    }

    /// Displacement (mm) of the voxel at `offset` inside `region`.
    #[inline]
    pub fn displacement(&self, region: [usize; 3], offset: [usize; 3]) -> Vector3 {
        let bx = self.basis[0].weights(offset[0]);
        let by = self.basis[1].weights(offset[1]);
        let bz = self.basis[2].weights(offset[2]);

        let mut disp = Vector3::zeros();
        for k in 0..4 {
            for j in 0..4 {
                let wjk = by[j] * bz[k];
                let row = self.control_point_index([region[0], region[1] + j, region[2] + k]);
                for i in 0..4 {
                    let w = bx[i] * wjk;
                    let c = &self.coefficients[3 * (row + i)..3 * (row + i) + 3];
                    disp.x += w * c[0] as f64;
                    disp.y += w * c[1] as f64;
                    disp.z += w * c[2] as f64;
                }
            }
        }
        disp
    }

    /// Displacement at a whole-volume voxel index, `None` outside the ROI.
    pub fn displacement_at_voxel(&self, ijk: [usize; 3]) -> Option<Vector3> {
        self.region_and_offset(ijk)
            .map(|(region, offset)| self.displacement(region, offset))
    }

    /// Physical position of control point `(0, 0, 0)`, one knot before the ROI.
    pub fn knot_origin(&self) -> Point3 {
        let index = Vector3::new(
            self.roi.offset[0] as f64 - self.vox_per_rgn[0] as f64,
            self.roi.offset[1] as f64 - self.vox_per_rgn[1] as f64,
            self.roi.offset[2] as f64 - self.vox_per_rgn[2] as f64,
        );
        self.geometry.continuous_index_to_physical(&index)
    }

    /// Fail with `GeometryMismatch` unless `geometry` is the one this
    /// transform was built on.
    pub fn check_geometry(&self, geometry: &VolumeGeometry) -> Result<()> {
        match self.geometry.describe_mismatch(geometry, GEOMETRY_TOLERANCE) {
            Some(what) => Err(CoreError::geometry_mismatch(format!(
                "transform does not match image: {}",
                what
            ))),
            None => Ok(()),
        }
    }
}
