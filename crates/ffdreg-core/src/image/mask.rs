//! Boolean region-of-interest masks.

use crate::error::{CoreError, Result};

/// Voxel-wise boolean mask sharing a volume's dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiMask {
    dims: [usize; 3],
    data: Vec<bool>,
}

impl RoiMask {
    /// Wrap an x-fastest inclusion buffer, checking its length against `dims`.
    pub fn new(dims: [usize; 3], data: Vec<bool>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(CoreError::invalid_geometry(format!(
                "mask holds {} voxels but dims {:?} need {}",
                data.len(),
                dims,
                expected
            )));
        }
        Ok(Self { dims, data })
    }

    /// Mask that includes every voxel.
    pub fn full(dims: [usize; 3]) -> Self {
        Self {
            dims,
            data: vec![true; dims.iter().product()],
        }
    }

    pub fn from_fn(dims: [usize; 3], f: impl Fn(usize, usize, usize) -> bool) -> Self {
        let mut data = Vec::with_capacity(dims.iter().product());
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    data.push(f(i, j, k));
                }
            }
        }
        Self { dims, data }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Whether voxel `(i, j, k)` is included.
    #[inline]
    pub fn contains(&self, ijk: [usize; 3]) -> bool {
        self.data[(ijk[2] * self.dims[1] + ijk[1]) * self.dims[0] + ijk[0]]
    }

    /// Number of included voxels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }
}
