//! Mutual-information metric with partial-volume interpolation.

pub mod binning;
pub mod histogram;
pub mod pv;
pub mod strategy;

pub use binning::{Binning, VOPT_RESOLUTION};
pub use histogram::{BigBins, HistogramSet, HistogramTables, SampleContribution, SCORE_THRESHOLD};
pub use pv::{pv_weight_derivatives, pv_weights};
pub use strategy::HistogramAccumulator;
