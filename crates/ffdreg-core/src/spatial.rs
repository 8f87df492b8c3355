//! Spatial types used throughout ffdreg.
//!
//! Everything is 3-D and backed by nalgebra. Direction matrices hold the
//! axis direction cosines as columns: column `i` is the physical direction
//! of image axis `i`.

use nalgebra::Matrix3;

pub type Point3 = nalgebra::Point3<f64>;
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Spacing3 = nalgebra::Vector3<f64>;
pub type Direction3 = Matrix3<f64>;

/// Build a direction matrix from nine cosines in row-major order.
pub fn direction_from_cosines(cosines: &[f64; 9]) -> Direction3 {
    Matrix3::from_row_slice(cosines)
}

/// Flatten a direction matrix into nine cosines in row-major order.
pub fn direction_to_cosines(direction: &Direction3) -> [f64; 9] {
    let mut out = [0.0; 9];
    for r in 0..3 {
        for c in 0..3 {
            out[r * 3 + c] = direction[(r, c)];
        }
    }
    out
}

/// Check whether a direction matrix is orthogonal within `tol`.
pub fn is_orthogonal(direction: &Direction3, tol: f64) -> bool {
    let product = direction * direction.transpose();
    let identity = Direction3::identity();
    (0..3).all(|i| (0..3).all(|j| (product[(i, j)] - identity[(i, j)]).abs() < tol))
}
