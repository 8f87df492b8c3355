//! Concurrent accumulation of sample contributions into histogram tables.

use super::histogram::{BigBins, HistogramTables, SampleContribution};
use crate::config::AccumulationStrategy;
use parking_lot::Mutex;
use rayon::prelude::*;

/// Adds a parallel stream of samples to a set of tables under one of the
/// [`AccumulationStrategy`] variants.
///
/// All variants produce the same tables up to floating-point summation order.
#[derive(Debug, Clone, Copy)]
pub struct HistogramAccumulator {
    strategy: AccumulationStrategy,
}

impl HistogramAccumulator {
    pub fn new(strategy: AccumulationStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> AccumulationStrategy {
        self.strategy
    }

    /// Add every sample of `samples` to `tables`, skipping `big`.
    pub fn accumulate<I>(&self, tables: &mut HistogramTables, big: BigBins, samples: I)
    where
        I: ParallelIterator<Item = SampleContribution>,
    {
        match self.strategy {
            AccumulationStrategy::PrivateMerge => private_merge(tables, big, samples),
            AccumulationStrategy::PerBinLock => per_bin_lock(tables, big, samples),
            AccumulationStrategy::CriticalSection => critical_section(tables, big, samples),
        }
    }
}

fn private_merge<I>(tables: &mut HistogramTables, big: BigBins, samples: I)
where
    I: ParallelIterator<Item = SampleContribution>,
{
    let (fb, mb) = (tables.fixed_bins(), tables.moving_bins());
    let partial = samples
        .fold(
            || HistogramTables::zeros(fb, mb),
            |mut local, c| {
                local.apply(&c, big);
                local
            },
        )
        .reduce(|| HistogramTables::zeros(fb, mb), HistogramTables::merge);
    let merged = std::mem::replace(tables, HistogramTables::zeros(0, 0)).merge(partial);
    *tables = merged;
}

fn per_bin_lock<I>(tables: &mut HistogramTables, big: BigBins, samples: I)
where
    I: ParallelIterator<Item = SampleContribution>,
{
    let mb = tables.moving_bins();
    let lock_all = |v: &[f64]| v.iter().map(|&x| Mutex::new(x)).collect::<Vec<_>>();
    let fixed = lock_all(&tables.fixed);
    let moving = lock_all(&tables.moving);
    let joint = lock_all(&tables.joint);

    let count: usize = samples
        .map(|c| {
            *fixed[c.fixed_bin].lock() += 1.0;
            let row = c.fixed_bin * mb;
            for (&m, &w) in c.moving_bins.iter().zip(&c.weights) {
                if m != big.moving {
                    *moving[m].lock() += w;
                }
                if row + m != big.joint {
                    *joint[row + m].lock() += w;
                }
            }
            1usize
        })
        .sum();

    let unlock_into = |dst: &mut Vec<f64>, src: Vec<Mutex<f64>>| {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s.into_inner();
        }
    };
    unlock_into(&mut tables.fixed, fixed);
    unlock_into(&mut tables.moving, moving);
    unlock_into(&mut tables.joint, joint);
    tables.samples += count;
}

fn critical_section<I>(tables: &mut HistogramTables, big: BigBins, samples: I)
where
    I: ParallelIterator<Item = SampleContribution>,
{
    let shared = Mutex::new(tables);
    samples.for_each(|c| shared.lock().apply(&c, big));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<SampleContribution> {
        (0..n)
            .map(|i| {
                let f = i % 3;
                let base = (i * 7) % 4;
                let frac = (i % 10) as f64 / 10.0;
                SampleContribution {
                    fixed_bin: f,
                    moving_bins: std::array::from_fn(|k| (base + k / 4) % 5),
                    weights: std::array::from_fn(|k| {
                        let along = if k % 2 == 0 { 1.0 - frac } else { frac };
                        along / 4.0
                    }),
                }
            })
            .collect()
    }

    fn sequential(items: &[SampleContribution], big: BigBins) -> HistogramTables {
        let mut t = HistogramTables::zeros(3, 5);
        for c in items {
            t.apply(c, big);
        }
        t
    }

    #[test]
    fn test_strategies_agree_with_sequential() {
        let items = samples(2000);
        let big = BigBins { moving: 1, joint: 6 };
        let expected = sequential(&items, big);

        for strategy in [
            AccumulationStrategy::PrivateMerge,
            AccumulationStrategy::PerBinLock,
            AccumulationStrategy::CriticalSection,
        ] {
            let mut t = HistogramTables::zeros(3, 5);
            HistogramAccumulator::new(strategy).accumulate(&mut t, big, items.par_iter().copied());
            assert_eq!(t.samples, expected.samples, "{:?}", strategy);
            assert_eq!(t.moving[1], 0.0);
            assert_eq!(t.joint[6], 0.0);
            for (a, b) in t
                .fixed
                .iter()
                .chain(&t.moving)
                .chain(&t.joint)
                .zip(expected.fixed.iter().chain(&expected.moving).chain(&expected.joint))
            {
                assert!((a - b).abs() < 1e-9, "{:?}: {} vs {}", strategy, a, b);
            }
        }
    }
}
