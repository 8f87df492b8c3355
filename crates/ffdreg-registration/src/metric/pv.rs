//! Partial-volume weights of the eight moving neighbours of a sample.
//!
//! Corner `n = (z * 2 + y) * 2 + x` takes, along every axis, the lower
//! weight when its bit is 0 and the upper weight when it is 1.

use crate::correspondence::Correspondence;

#[inline]
fn axis_weight(c: &Correspondence, n: usize, axis: usize) -> f64 {
    if (n >> axis) & 1 == 0 {
        c.lower[axis]
    } else {
        c.upper[axis]
    }
}

/// Trilinear weights of the eight neighbours; they sum to one.
#[inline]
pub fn pv_weights(c: &Correspondence) -> [f64; 8] {
    std::array::from_fn(|n| axis_weight(c, n, 0) * axis_weight(c, n, 1) * axis_weight(c, n, 2))
}

/// Derivative of every neighbour weight with respect to the moving
/// continuous index, per axis.
///
/// Along axis `a` the lower weight falls and the upper weight rises with
/// unit slope, so the derivative is `±1` times the product of the weights
/// on the two other axes.
#[inline]
pub fn pv_weight_derivatives(c: &Correspondence) -> [[f64; 3]; 8] {
    std::array::from_fn(|n| {
        std::array::from_fn(|a| {
            let sign = if (n >> a) & 1 == 0 { -1.0 } else { 1.0 };
            let b = (a + 1) % 3;
            let d = (a + 2) % 3;
            sign * axis_weight(c, n, b) * axis_weight(c, n, d)
        })
    })
}
