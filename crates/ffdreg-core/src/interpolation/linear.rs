//! Trilinear interpolation.

use super::trait_::Interpolator;
use crate::image::Volume;
use crate::spatial::Vector3;

/// Lower neighbour and the pair of linear weights along one axis.
///
/// `lower` weights voxel `floor`, `upper` weights voxel `floor + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearWeights {
    pub floor: usize,
    pub lower: f64,
    pub upper: f64,
}

/// Split a continuous index along an axis of length `dim` into a floor
/// index and weights, keeping `floor + 1` inside the axis.
///
/// Below 0 the weight moves entirely to voxel 0; at or beyond `dim - 1`
/// it moves entirely to voxel `dim - 1` (floor `dim - 2`). An axis of
/// length 1 always yields floor 0 with weights `(1, 0)`.
#[inline]
pub fn clamp_linear(x: f64, dim: usize) -> LinearWeights {
    if dim < 2 || x < 0.0 {
        return LinearWeights {
            floor: 0,
            lower: 1.0,
            upper: 0.0,
        };
    }
    let last = (dim - 1) as f64;
    if x >= last {
        return LinearWeights {
            floor: dim - 2,
            lower: 0.0,
            upper: 1.0,
        };
    }
    let floor = x.floor();
    let frac = x - floor;
    LinearWeights {
        floor: floor as usize,
        lower: 1.0 - frac,
        upper: frac,
    }
}

/// Trilinear interpolator with edge clamping.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    pub fn new() -> Self {
        Self
    }
}

impl Interpolator for LinearInterpolator {
    fn interpolate(&self, volume: &Volume, index: &Vector3) -> f32 {
        let dims = volume.dims();
        let w: [LinearWeights; 3] = std::array::from_fn(|d| clamp_linear(index[d], dims[d]));

        let mut value = 0.0f64;
        for dz in 0..2 {
            let wz = if dz == 0 { w[2].lower } else { w[2].upper };
            if wz == 0.0 {
                continue;
            }
            for dy in 0..2 {
                let wy = if dy == 0 { w[1].lower } else { w[1].upper };
                if wy == 0.0 {
                    continue;
                }
                for dx in 0..2 {
                    let wx = if dx == 0 { w[0].lower } else { w[0].upper };
                    if wx == 0.0 {
                        continue;
                    }
                    let ijk = [w[0].floor + dx, w[1].floor + dy, w[2].floor + dz];
                    value += wx * wy * wz * volume.value(ijk) as f64;
                }
            }
        }
        value as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::VolumeGeometry;
    use crate::spatial::{Point3, Spacing3};

    #[test]
    fn test_clamp_linear_interior() {
        let w = clamp_linear(2.25, 5);
        assert_eq!(w.floor, 2);
        assert!((w.lower - 0.75).abs() < 1e-12);
        assert!((w.upper - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_clamp_linear_edges() {
        assert_eq!(
            clamp_linear(-0.3, 5),
            LinearWeights { floor: 0, lower: 1.0, upper: 0.0 }
        );
        assert_eq!(
            clamp_linear(4.0, 5),
            LinearWeights { floor: 3, lower: 0.0, upper: 1.0 }
        );
        assert_eq!(
            clamp_linear(4.4, 5),
            LinearWeights { floor: 3, lower: 0.0, upper: 1.0 }
        );
        assert_eq!(clamp_linear(0.7, 1).floor, 0);
    }

    #[test]
    fn test_trilinear_reproduces_linear_ramp() {
        let g = VolumeGeometry::axis_aligned([4, 5, 6], Point3::origin(), Spacing3::repeat(1.0)).unwrap();
        let v = Volume::from_fn(g, |i, j, k| (i as f32) + 2.0 * (j as f32) - (k as f32));
        let interp = LinearInterpolator::new();
        let value = interp.interpolate(&v, &Vector3::new(1.5, 2.25, 3.75));
        assert!((value - (1.5 + 4.5 - 3.75)).abs() < 1e-5);

        // Clamped beyond the last voxel.
        let edge = interp.interpolate(&v, &Vector3::new(3.4, 0.0, 0.0));
        assert!((edge - 3.0).abs() < 1e-6);
    }
}
