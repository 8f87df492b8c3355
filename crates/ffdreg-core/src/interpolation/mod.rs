//! Sampling volumes at continuous indices.

pub mod trait_;
pub mod linear;
pub mod nearest;

pub use trait_::Interpolator;
pub use linear::{clamp_linear, LinearInterpolator, LinearWeights};
pub use nearest::{nearest_index, NearestNeighborInterpolator};
