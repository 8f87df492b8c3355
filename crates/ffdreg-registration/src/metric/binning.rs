//! Intensity to bin mapping for one image.

use crate::config::HistogramKind;
use rayon::prelude::*;

/// Fine cells of the pre-histogram used by v-optimal binning.
pub const VOPT_RESOLUTION: usize = 1000;

/// Maps intensities to histogram bins.
///
/// Equal-spaced binning uses `bin = floor((v - offset) / delta)` with
/// `delta = (max - min) / (bins - 1)` and `offset = min - delta / 2`, so
/// `min` and `max` fall in the centres of the first and last bins.
/// V-optimal binning indexes a fine equal-spaced grid of cells and looks the
/// bin up per cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Binning {
    num_bins: usize,
    offset: f64,
    delta: f64,
    /// Cell-to-bin table; `None` for equal-spaced binning.
    lookup: Option<Vec<usize>>,
}

impl Binning {
    /// Equal-spaced bins covering `[min, max]`.
    pub fn equal_spaced(num_bins: usize, min: f32, max: f32) -> Self {
        let (offset, delta) = grid(num_bins, min, max);
        Self {
            num_bins,
            offset,
            delta,
            lookup: None,
        }
    }

    /// Minimum-variance bins for `values`, which span `[min, max]`.
    ///
    /// Falls back to equal-spaced bins when more bins than fine cells are
    /// requested or when no partition gives every bin at least one sample.
    pub fn v_optimal(num_bins: usize, values: &[f32], min: f32, max: f32) -> Self {
        if num_bins > VOPT_RESOLUTION {
            tracing::warn!(
                "{} bins exceed the v-optimal resolution of {}; using equal-spaced bins",
                num_bins,
                VOPT_RESOLUTION
            );
            return Self::equal_spaced(num_bins, min, max);
        }

        let (offset, delta) = grid(VOPT_RESOLUTION, min, max);
        let cell_of = |v: f32| cell_index(v as f64, offset, delta, VOPT_RESOLUTION);
        let stats = FineHistogram::new(values.iter().map(|&v| (cell_of(v), v as f64)));

        match stats.partition(num_bins) {
            Some(lookup) => Self {
                num_bins,
                offset,
                delta,
                lookup: Some(lookup),
            },
            None => {
                tracing::warn!(
                    "No v-optimal partition into {} non-empty bins; using equal-spaced bins",
                    num_bins
                );
                Self::equal_spaced(num_bins, min, max)
            }
        }
    }

    /// Build the binning `kind` for a set of intensities.
    pub fn from_values(kind: HistogramKind, num_bins: usize, values: &[f32]) -> Self {
        let (min, max) = values
            .par_iter()
            .fold(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), &v| (lo.min(v), hi.max(v)),
            )
            .reduce(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |a, b| (a.0.min(b.0), a.1.max(b.1)),
            );
        let (min, max) = if min > max { (0.0, 0.0) } else { (min, max) };
        match kind {
            HistogramKind::EqualSpaced => Self::equal_spaced(num_bins, min, max),
            HistogramKind::VOptimal => Self::v_optimal(num_bins, values, min, max),
        }
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Intensity at the lower edge of the first (fine) cell.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Width of a bin, or of a fine cell for v-optimal binning.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn is_variable_width(&self) -> bool {
        self.lookup.is_some()
    }

    /// Bin of intensity `value`; values outside the range clamp to the end bins.
    #[inline]
    pub fn bin(&self, value: f32) -> usize {
        match &self.lookup {
            None => cell_index(value as f64, self.offset, self.delta, self.num_bins),
            Some(lookup) => lookup[cell_index(value as f64, self.offset, self.delta, lookup.len())],
        }
    }
}

/// `(offset, delta)` of `cells` equal cells centred on `min` and `max`.
fn grid(cells: usize, min: f32, max: f32) -> (f64, f64) {
    let range = max as f64 - min as f64;
    let delta = if range > 0.0 && cells > 1 {
        range / (cells - 1) as f64
    } else {
        if range <= 0.0 {
            tracing::warn!("Zero intensity range at {}; using a unit bin width", min);
        }
        1.0
    };
    (min as f64 - 0.5 * delta, delta)
}

#[inline]
fn cell_index(value: f64, offset: f64, delta: f64, cells: usize) -> usize {
    let idx = ((value - offset) / delta).floor();
    if idx <= 0.0 {
        0
    } else {
        (idx as usize).min(cells - 1)
    }
}

/// Prefix sums over the fine cells: sample count, sum and sum of squares.
struct FineHistogram {
    count: Vec<f64>,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl FineHistogram {
    fn new(samples: impl Iterator<Item = (usize, f64)>) -> Self {
        let mut count = vec![0.0; VOPT_RESOLUTION + 1];
        let mut sum = vec![0.0; VOPT_RESOLUTION + 1];
        let mut sum_sq = vec![0.0; VOPT_RESOLUTION + 1];
        for (cell, v) in samples {
            count[cell + 1] += 1.0;
            sum[cell + 1] += v;
            sum_sq[cell + 1] += v * v;
        }
        for i in 1..=VOPT_RESOLUTION {
            count[i] += count[i - 1];
            sum[i] += sum[i - 1];
            sum_sq[i] += sum_sq[i - 1];
        }
        Self { count, sum, sum_sq }
    }

    /// Squared error of merging cells `a..b` into one bin.
    #[inline]
    fn cost(&self, a: usize, b: usize) -> f64 {
        let n = self.count[b] - self.count[a];
        if n < 1.0 {
            return f64::INFINITY;
        }
        let s = self.sum[b] - self.sum[a];
        (self.sum_sq[b] - self.sum_sq[a] - s * s / n).max(0.0)
    }

    /// Minimum-variance partition of all cells into `bins` contiguous
    /// groups, as a cell-to-bin table.
    fn partition(&self, bins: usize) -> Option<Vec<usize>> {
        let cells = VOPT_RESOLUTION;
        if bins == 0 || bins > cells {
            return None;
        }

        // err[k][i]: best cost of the first i cells in k + 1 bins;
        // split[k][i]: start cell of the last of those bins.
        let mut err = vec![vec![f64::INFINITY; cells + 1]];
        let mut split = vec![vec![0u32; cells + 1]];
        for i in 1..=cells {
            err[0][i] = self.cost(0, i);
        }

        for k in 1..bins {
            let prev = &err[k - 1];
            let row: Vec<(f64, u32)> = (0..=cells)
                .into_par_iter()
                .map(|i| {
                    let mut best = (f64::INFINITY, 0u32);
                    for j in k..i {
                        let candidate = prev[j] + self.cost(j, i);
                        if candidate < best.0 {
                            best = (candidate, j as u32);
                        }
                    }
                    best
                })
                .collect();
            err.push(row.iter().map(|r| r.0).collect());
            split.push(row.iter().map(|r| r.1).collect());
        }

        if !err[bins - 1][cells].is_finite() {
            return None;
        }

        let mut lookup = vec![0usize; cells];
        let mut end = cells;
        for k in (0..bins).rev() {
            let start = if k == 0 { 0 } else { split[k][end] as usize };
            for cell in &mut lookup[start..end] {
                *cell = k;
            }
            end = start;
        }
        Some(lookup)
    }
}
