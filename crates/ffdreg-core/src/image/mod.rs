//! Volume types and physical-space geometry.
//!
//! Voxel buffers are flattened with the x axis varying fastest:
//! `index = (k * dims[1] + j) * dims[0] + i`.

pub mod geometry;
pub mod volume;
pub mod mask;

pub use geometry::{Roi, VolumeGeometry};
pub use mask::RoiMask;
pub use volume::Volume;
