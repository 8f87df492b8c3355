pub mod error;
pub mod spatial;
pub mod image;
pub mod transform;
pub mod interpolation;
pub mod filter;

pub use error::{CoreError, Result};
pub use image::{Roi, RoiMask, Volume, VolumeGeometry};
pub use spatial::{Direction3, Point3, Spacing3, Vector3};
pub use transform::BSplineTransform;
pub use interpolation::{Interpolator, LinearInterpolator, NearestNeighborInterpolator};
pub use filter::{displacement_field, warp_volume};
