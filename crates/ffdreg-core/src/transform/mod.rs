//! B-spline free-form deformation transform.
//!
//! The displacement field over a region of interest is parameterized by a
//! lattice of control points under a uniform cubic B-spline basis.

pub mod basis;
pub mod bspline;
pub mod io;

pub use basis::{cubic_bspline_basis, BasisTable};
pub use bspline::BSplineTransform;
