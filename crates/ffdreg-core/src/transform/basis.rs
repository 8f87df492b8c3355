//! Uniform cubic B-spline basis and per-axis lookup tables.

/// Cubic B-spline basis functions at fractional position `u` in `[0, 1)`.
///
/// Exactly four values are non-zero for any position and they sum to one.
#[inline]
pub fn cubic_bspline_basis(u: f64) -> [f64; 4] {
    let u2 = u * u;
    let u3 = u2 * u;
    let one_minus_u = 1.0 - u;
    [
        // B0 = (1-u)^3 / 6
        one_minus_u * one_minus_u * one_minus_u / 6.0,
        // B1 = (3u^3 - 6u^2 + 4) / 6
        (3.0 * u3 - 6.0 * u2 + 4.0) / 6.0,
        // B2 = (-3u^3 + 3u^2 + 3u + 1) / 6
        (-3.0 * u3 + 3.0 * u2 + 3.0 * u + 1.0) / 6.0,
        // B3 = u^3 / 6
        u3 / 6.0,
    ]
}

/// Basis weights for every voxel offset inside a region along one axis.
///
/// Offset `q` in a region of `vox_per_rgn` voxels sits at `u = q / vox_per_rgn`.
#[derive(Debug, Clone, PartialEq)]
pub struct BasisTable {
    vox_per_rgn: usize,
    weights: Vec<[f64; 4]>,
}

impl BasisTable {
    pub fn new(vox_per_rgn: usize) -> Self {
        let weights = (0..vox_per_rgn)
            .map(|q| cubic_bspline_basis(q as f64 / vox_per_rgn as f64))
            .collect();
        Self {
            vox_per_rgn,
            weights,
        }
    }

    pub fn vox_per_rgn(&self) -> usize {
        self.vox_per_rgn
    }

    /// The four weights for offset `q`.
    #[inline]
    pub fn weights(&self, q: usize) -> &[f64; 4] {
        &self.weights[q]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis_partition_of_unity() {
        for step in 0..=20 {
            let u = step as f64 / 20.0;
            let sum: f64 = cubic_bspline_basis(u).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "u={} sum={}", u, sum);
        }
    }

    #[test]
    fn test_basis_at_knot() {
        let b = cubic_bspline_basis(0.0);
        assert!((b[0] - 1.0 / 6.0).abs() < 1e-12);
        assert!((b[1] - 4.0 / 6.0).abs() < 1e-12);
        assert!((b[2] - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(b[3], 0.0);
    }

    #[test]
    fn test_table_positions() {
        let t = BasisTable::new(4);
        assert_eq!(t.vox_per_rgn(), 4);
        assert_eq!(t.weights(0), &cubic_bspline_basis(0.0));
        assert_eq!(t.weights(2), &cubic_bspline_basis(0.5));
    }
}
