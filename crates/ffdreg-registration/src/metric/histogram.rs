//! Fixed, moving and joint histogram tables and the mutual-information score.

use super::binning::Binning;
use crate::config::HistogramKind;
use crate::error::Result;
use ffdreg_core::{CoreError, Volume};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Joint cells at or below this mass are left out of the score and gradient.
pub const SCORE_THRESHOLD: f64 = 1e-4;

/// Moving-marginal bin and joint cell that are skipped during accumulation
/// and back-filled from the sample total afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigBins {
    pub moving: usize,
    pub joint: usize,
}

/// Everything one fixed voxel adds to the tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleContribution {
    pub fixed_bin: usize,
    pub moving_bins: [usize; 8],
    pub weights: [f64; 8],
}

/// Raw histogram masses. The joint table is fixed-major:
/// cell `(f, m)` lives at `f * moving_bins + m`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramTables {
    pub fixed: Vec<f64>,
    pub moving: Vec<f64>,
    pub joint: Vec<f64>,
    pub samples: usize,
}

impl HistogramTables {
    pub fn zeros(fixed_bins: usize, moving_bins: usize) -> Self {
        Self {
            fixed: vec![0.0; fixed_bins],
            moving: vec![0.0; moving_bins],
            joint: vec![0.0; fixed_bins * moving_bins],
            samples: 0,
        }
    }

    pub fn fixed_bins(&self) -> usize {
        self.fixed.len()
    }

    pub fn moving_bins(&self) -> usize {
        self.moving.len()
    }

    #[inline]
    pub fn joint_index(&self, fixed_bin: usize, moving_bin: usize) -> usize {
        fixed_bin * self.moving.len() + moving_bin
    }

    pub fn reset(&mut self) {
        self.fixed.fill(0.0);
        self.moving.fill(0.0);
        self.joint.fill(0.0);
        self.samples = 0;
    }

    /// Add one sample, skipping the big bins.
    #[inline]
    pub fn apply(&mut self, c: &SampleContribution, big: BigBins) {
        self.samples += 1;
        self.fixed[c.fixed_bin] += 1.0;
        let row = c.fixed_bin * self.moving.len();
        for (&m, &w) in c.moving_bins.iter().zip(&c.weights) {
            if m != big.moving {
                self.moving[m] += w;
            }
            let j = row + m;
            if j != big.joint {
                self.joint[j] += w;
            }
        }
    }

    /// Element-wise sum of two partial tables.
    pub fn merge(mut self, other: Self) -> Self {
        for (a, b) in self.fixed.iter_mut().zip(&other.fixed) {
            *a += b;
        }
        for (a, b) in self.moving.iter_mut().zip(&other.moving) {
            *a += b;
        }
        for (a, b) in self.joint.iter_mut().zip(&other.joint) {
            *a += b;
        }
        self.samples += other.samples;
        self
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Bin counts of every voxel of a volume.
fn voxel_counts(binning: &Binning, volume: &Volume) -> Vec<f64> {
    let bins = binning.num_bins();
    volume
        .data()
        .par_iter()
        .fold(
            || vec![0.0; bins],
            |mut counts, &v| {
                counts[binning.bin(v)] += 1.0;
                counts
            },
        )
        .reduce(
            || vec![0.0; bins],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(&b) {
                    *x += y;
                }
                a
            },
        )
}

/// Binnings, tables and big-bin bookkeeping of one registration stage.
#[derive(Debug, Clone)]
pub struct HistogramSet {
    fixed_binning: Binning,
    moving_binning: Binning,
    tables: HistogramTables,
    big_bins: BigBins,
}

impl HistogramSet {
    /// Set bin edges from the two volumes and pick the initial big bins
    /// from their voxel histograms.
    pub fn new(
        kind: HistogramKind,
        fixed_bins: usize,
        moving_bins: usize,
        fixed: &Volume,
        moving: &Volume,
    ) -> Self {
        let fixed_binning = Binning::from_values(kind, fixed_bins, fixed.data());
        let moving_binning = Binning::from_values(kind, moving_bins, moving.data());

        let fixed_big = argmax(&voxel_counts(&fixed_binning, fixed));
        let moving_big = argmax(&voxel_counts(&moving_binning, moving));
        let big_bins = BigBins {
            moving: moving_big,
            joint: fixed_big * moving_bins + moving_big,
        };

        tracing::debug!(
            "Histogram bins: fixed {} (delta {:.4}), moving {} (delta {:.4}), big bins {:?}",
            fixed_bins,
            fixed_binning.delta(),
            moving_bins,
            moving_binning.delta(),
            big_bins
        );

        Self {
            fixed_binning,
            moving_binning,
            tables: HistogramTables::zeros(fixed_bins, moving_bins),
            big_bins,
        }
    }

    pub fn fixed_binning(&self) -> &Binning {
        &self.fixed_binning
    }

    pub fn moving_binning(&self) -> &Binning {
        &self.moving_binning
    }

    pub fn tables(&self) -> &HistogramTables {
        &self.tables
    }

    pub fn tables_mut(&mut self) -> &mut HistogramTables {
        &mut self.tables
    }

    pub fn big_bins(&self) -> BigBins {
        self.big_bins
    }

    pub fn num_samples(&self) -> usize {
        self.tables.samples
    }

    pub fn reset(&mut self) {
        self.tables.reset();
    }

    /// Fill the big bins with the mass missing from the sample total.
    ///
    /// When a back-filled bin turns out smaller than another bin, the big
    /// bin moves to the current maximum for the next evaluation.
    pub fn backfill(&mut self) {
        let total = self.tables.samples as f64;
        let big = self.big_bins;

        let moving_rest: f64 = self
            .tables
            .moving
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != big.moving)
            .map(|(_, v)| v)
            .sum();
        self.tables.moving[big.moving] = total - moving_rest;

        let joint_rest: f64 = self
            .tables
            .joint
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != big.joint)
            .map(|(_, v)| v)
            .sum();
        self.tables.joint[big.joint] = total - joint_rest;

        let moving_max = argmax(&self.tables.moving);
        if self.tables.moving[moving_max] > self.tables.moving[big.moving] {
            tracing::debug!("Moving big bin relocated {} -> {}", big.moving, moving_max);
            self.big_bins.moving = moving_max;
        }
        let joint_max = argmax(&self.tables.joint);
        if self.tables.joint[joint_max] > self.tables.joint[big.joint] {
            tracing::debug!("Joint big bin relocated {} -> {}", big.joint, joint_max);
            self.big_bins.joint = joint_max;
        }
    }

    /// `log(N h / (f m))` of a joint cell, `None` for cells that carry no
    /// score: below the mass threshold or with an empty marginal.
    #[inline]
    fn log_ratio(&self, fixed_bin: usize, moving_bin: usize) -> Option<f64> {
        let t = &self.tables;
        let h = t.joint[t.joint_index(fixed_bin, moving_bin)];
        let f = t.fixed[fixed_bin];
        let m = t.moving[moving_bin];
        if h > SCORE_THRESHOLD && f > 0.0 && m > 0.0 {
            Some((t.samples as f64 * h / (f * m)).ln())
        } else {
            None
        }
    }

    /// Negative mutual information of the current tables:
    /// `-(1/N) sum h log(N h / (f m))` over cells above the threshold.
    ///
    /// Zero when no samples were accumulated.
    pub fn compute_score(&self) -> f64 {
        let n = self.tables.samples as f64;
        if n == 0.0 {
            return 0.0;
        }
        let mb = self.tables.moving_bins();
        let sum: f64 = (0..self.tables.fixed_bins())
            .into_par_iter()
            .map(|f| {
                (0..mb)
                    .filter_map(|m| {
                        self.log_ratio(f, m)
                            .map(|r| self.tables.joint[f * mb + m] * r)
                    })
                    .sum::<f64>()
            })
            .sum();
        -sum / n
    }

    /// Derivative of the score with respect to the mass of joint cell
    /// `(fixed_bin, moving_bin)`, up to the `-1/N` factor.
    #[inline]
    pub fn score_derivative(&self, fixed_bin: usize, moving_bin: usize, score: f64) -> f64 {
        self.log_ratio(fixed_bin, moving_bin)
            .map_or(0.0, |r| r - score)
    }

    /// Dump the marginals and the joint table as CSV rows
    /// `table,fixed_bin,moving_bin,mass`.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(CoreError::from)?;
        let mut w = BufWriter::new(file);
        self.write_rows(&mut w).map_err(CoreError::from)?;
        w.flush().map_err(CoreError::from)?;
        tracing::info!("Wrote histograms to {}", path.display());
        Ok(())
    }

    fn write_rows<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let t = &self.tables;
        writeln!(w, "table,fixed_bin,moving_bin,mass")?;
        for (f, v) in t.fixed.iter().enumerate() {
            writeln!(w, "fixed,{},,{}", f, v)?;
        }
        for (m, v) in t.moving.iter().enumerate() {
            writeln!(w, "moving,,{},{}", m, v)?;
        }
        for f in 0..t.fixed_bins() {
            for m in 0..t.moving_bins() {
                writeln!(w, "joint,{},{},{}", f, m, t.joint[t.joint_index(f, m)])?;
            }
        }
        Ok(())
    }
}
