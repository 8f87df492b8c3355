//! Budgets, counters and best-point bookkeeping shared by the optimizers.

use super::trait_::Objective;
use crate::config::RegistrationConfig;
use crate::error::{RegistrationError, Result};
use std::fmt;

/// Why an optimization stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Relative improvement fell below the tolerance, the gradient vanished,
    /// or no descent step could be found.
    Converged,
    MaxIterations,
    MaxEvaluations,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::MaxIterations => write!(f, "iteration budget exhausted"),
            Self::MaxEvaluations => write!(f, "evaluation budget exhausted"),
        }
    }
}

/// Optimizer parameters taken from a [`RegistrationConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSettings {
    pub max_iterations: usize,
    pub max_evaluations: usize,
    pub min_iterations: usize,
    pub tolerance: f64,
    pub bound: f64,
    pub history: usize,
    pub initial_step: f64,
}

impl From<&RegistrationConfig> for OptimizerSettings {
    fn from(config: &RegistrationConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_evaluations: config.max_evaluations,
            min_iterations: config.min_iterations,
            tolerance: config.convergence_tolerance,
            bound: config.coefficient_bound,
            history: config.lbfgs_history,
            initial_step: config.initial_step,
        }
    }
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self::from(&RegistrationConfig::default())
    }
}

/// Progress of one accepted iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub evaluations: usize,
    pub value: f64,
    pub best_value: f64,
    /// Largest coefficient change of the step.
    pub step: f64,
    /// Euclidean norm of the gradient at the accepted point.
    pub gradient_norm: f64,
}

/// Final result of a minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationOutcome {
    pub reason: TerminationReason,
    pub iterations: usize,
    pub evaluations: usize,
    pub best_value: f64,
    pub best_x: Vec<f64>,
}

/// Counters and best point of a running minimization.
pub(crate) struct OptimizerState<'s> {
    settings: &'s OptimizerSettings,
    pub iteration: usize,
    pub evaluations: usize,
    best_value: f64,
    best_x: Vec<f64>,
}

impl<'s> OptimizerState<'s> {
    pub fn new(settings: &'s OptimizerSettings, n: usize) -> Self {
        Self {
            settings,
            iteration: 0,
            evaluations: 0,
            best_value: f64::INFINITY,
            best_x: vec![0.0; n],
        }
    }

    pub fn best_value(&self) -> f64 {
        self.best_value
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.iteration >= self.settings.max_iterations
    }

    pub fn evaluations_exhausted(&self) -> bool {
        self.evaluations >= self.settings.max_evaluations
    }

    /// Evaluate the objective, counting the call and tracking the best point.
    pub fn evaluate(
        &mut self,
        objective: &mut dyn Objective,
        x: &[f64],
        gradient: &mut [f64],
    ) -> Result<f64> {
        let value = objective.evaluate(x, gradient)?;
        self.evaluations += 1;
        if !value.is_finite() {
            return Err(RegistrationError::numerical_instability(format!(
                "objective returned {} at evaluation {}",
                value, self.evaluations
            )));
        }
        if value < self.best_value {
            self.best_value = value;
            self.best_x.copy_from_slice(x);
        }
        Ok(value)
    }

    /// Relative-improvement convergence test between accepted iterations.
    pub fn converged(&self, previous: f64, current: f64) -> bool {
        let relative = (previous - current) / previous.abs().max(1e-12);
        relative < self.settings.tolerance && self.iteration >= self.settings.min_iterations
    }

    pub fn record(&self, value: f64, step: f64, gradient_norm: f64) -> IterationRecord {
        IterationRecord {
            iteration: self.iteration,
            evaluations: self.evaluations,
            value,
            best_value: self.best_value,
            step,
            gradient_norm,
        }
    }

    pub fn finish(self, reason: TerminationReason) -> OptimizationOutcome {
        OptimizationOutcome {
            reason,
            iterations: self.iteration,
            evaluations: self.evaluations,
            best_value: self.best_value,
            best_x: self.best_x,
        }
    }
}

/// Clamp every component into `[-bound, bound]`.
pub(crate) fn project(x: &mut [f64], bound: f64) {
    for v in x.iter_mut() {
        *v = v.clamp(-bound, bound);
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean norm, reported as `IterationRecord::gradient_norm`.
pub(crate) fn norm2(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

pub(crate) fn norm_inf(a: &[f64]) -> f64 {
    a.iter().fold(0.0f64, |m, v| m.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Parabola;

    impl Objective for Parabola {
        fn evaluate(&mut self, x: &[f64], gradient: &mut [f64]) -> Result<f64> {
            gradient[0] = 2.0 * x[0];
            Ok(x[0] * x[0])
        }
    }

    #[test]
    fn test_state_tracks_best() {
        let settings = OptimizerSettings::default();
        let mut state = OptimizerState::new(&settings, 1);
        let mut g = [0.0];
        state.evaluate(&mut Parabola, &[3.0], &mut g).unwrap();
        state.evaluate(&mut Parabola, &[-1.0], &mut g).unwrap();
        state.evaluate(&mut Parabola, &[2.0], &mut g).unwrap();
        let outcome = state.finish(TerminationReason::MaxIterations);
        assert_eq!(outcome.evaluations, 3);
        assert_eq!(outcome.best_value, 1.0);
        assert_eq!(outcome.best_x, vec![-1.0]);
    }

    #[test]
    fn test_convergence_needs_min_iterations() {
        let settings = OptimizerSettings {
            min_iterations: 2,
            tolerance: 1e-3,
            ..OptimizerSettings::default()
        };
        let mut state = OptimizerState::new(&settings, 1);
        state.iteration = 1;
        assert!(!state.converged(-1.0, -1.0000001));
        state.iteration = 2;
        assert!(state.converged(-1.0, -1.0000001));
        assert!(!state.converged(-1.0, -1.1));
    }

    #[test]
    fn test_project() {
        let mut x = [-5.0, 0.5, 7.0];
        project(&mut x, 2.0);
        assert_eq!(x, [-2.0, 0.5, 2.0]);
    }
}
