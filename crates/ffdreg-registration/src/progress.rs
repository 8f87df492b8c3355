//! Progress callbacks and score trace for registration runs.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::optimizer::{IterationRecord, TerminationReason};

/// Snapshot of an accepted optimizer iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    pub iteration: usize,
    /// Objective evaluations so far, including rejected trials.
    pub evaluations: usize,
    pub score: f64,
    pub best_score: f64,
    /// Largest coefficient change of the accepted step.
    pub step: f64,
    pub gradient_norm: f64,
    pub elapsed: Duration,
}

impl ProgressInfo {
    pub fn from_record(record: &IterationRecord, elapsed: Duration) -> Self {
        Self {
            iteration: record.iteration,
            evaluations: record.evaluations,
            score: record.value,
            best_score: record.best_value,
            step: record.step,
            gradient_norm: record.gradient_norm,
            elapsed,
        }
    }
}

/// Observer of a registration run.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, info: &ProgressInfo);

    /// Called once with the score of the starting coefficients.
    fn on_start(&self, _initial_score: f64) {}

    fn on_complete(&self, _reason: TerminationReason, _best_score: f64, _elapsed: Duration) {}
}

/// Logs progress through `tracing` every `interval` iterations.
#[derive(Debug, Clone)]
pub struct LoggingCallback {
    pub interval: usize,
}

impl Default for LoggingCallback {
    fn default() -> Self {
        Self { interval: 10 }
    }
}

impl LoggingCallback {
    pub fn new(interval: usize) -> Self {
        Self { interval: interval.max(1) }
    }
}

impl ProgressCallback for LoggingCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.iteration % self.interval.max(1) == 0 {
            tracing::info!(
                "Iter {} | evals {} | score {:.6} | best {:.6} | step {:.3e} | |g| {:.3e} | {:.2}s",
                info.iteration,
                info.evaluations,
                info.score,
                info.best_score,
                info.step,
                info.gradient_norm,
                info.elapsed.as_secs_f64()
            );
        }
    }

    fn on_start(&self, initial_score: f64) {
        tracing::info!("Registration started, initial score {:.6}", initial_score);
    }

    fn on_complete(&self, reason: TerminationReason, best_score: f64, elapsed: Duration) {
        tracing::info!(
            "Registration finished ({}) in {:.2}s with best score {:.6}",
            reason,
            elapsed.as_secs_f64(),
            best_score
        );
    }
}

/// Records every progress snapshot.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<ProgressInfo> {
        self.history.lock().clone()
    }

    /// Scores of the recorded iterations in order.
    pub fn scores(&self) -> Vec<f64> {
        self.history.lock().iter().map(|p| p.score).collect()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        self.history.lock().push(info.clone());
    }
}

/// Fans iteration records out to the registered callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start_time: Option<Instant>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`; callbacks run in registration order.
    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    /// Start the clock and report the initial score.
    pub fn start(&mut self, initial_score: f64) {
        self.start_time = Some(Instant::now());
        for callback in &self.callbacks {
            callback.on_start(initial_score);
        }
    }

    /// Forward an accepted iteration to every callback.
    pub fn update(&self, record: &IterationRecord) {
        let info = ProgressInfo::from_record(record, self.elapsed());
        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    /// Report the termination reason and best score.
    pub fn complete(&self, reason: TerminationReason, best_score: f64) {
        let elapsed = self.elapsed();
        for callback in &self.callbacks {
            callback.on_complete(reason, best_score, elapsed);
        }
    }
}
