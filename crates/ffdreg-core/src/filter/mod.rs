//! Whole-volume operations driven by a B-spline transform.

pub mod warp;

pub use warp::{displacement_field, warp_volume};
