//! Projected L-BFGS with box bounds.
//!
//! Directions come from the standard two-loop recursion restricted to the
//! free variables; variables sitting on a bound with the gradient pushing
//! outward are held fixed. Steps are projected back into the box and
//! accepted under a backtracking Armijo test.

use super::state::{
    dot, norm2, norm_inf, project, IterationRecord, OptimizationOutcome, OptimizerSettings, OptimizerState,
    TerminationReason,
};
use super::trait_::{Objective, Optimizer};
use crate::error::Result;
use std::collections::VecDeque;

const ARMIJO: f64 = 1e-4;
const MAX_LINE_SEARCH: usize = 20;
const CURVATURE_EPS: f64 = 1e-10;

/// One correction pair `(s, y, 1 / y^T s)`.
#[derive(Debug, Clone)]
struct Correction {
    s: Vec<f64>,
    y: Vec<f64>,
    rho: f64,
}

/// Bounded limited-memory quasi-Newton optimizer.
#[derive(Debug, Clone)]
pub struct LbfgsbOptimizer {
    settings: OptimizerSettings,
    history: VecDeque<Correction>,
}

impl LbfgsbOptimizer {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self {
            history: VecDeque::with_capacity(settings.history),
            settings,
        }
    }

    fn push_correction(&mut self, s: Vec<f64>, y: Vec<f64>) {
        let ys = dot(&y, &s);
        if ys <= CURVATURE_EPS {
            tracing::trace!("Skipping correction pair with y^T s = {:.3e}", ys);
            return;
        }
        if self.history.len() >= self.settings.history {
            self.history.pop_front();
        }
        self.history.push_back(Correction { s, y, rho: 1.0 / ys });
    }

    /// `-H g` over the free variables, zero on the active ones.
    fn direction(&self, g: &[f64], free: &[bool]) -> Vec<f64> {
        let n = g.len();
        let masked_dot = |a: &[f64], b: &[f64]| -> f64 {
            (0..n).filter(|&i| free[i]).map(|i| a[i] * b[i]).sum()
        };
        let mut q: Vec<f64> = (0..n).map(|i| if free[i] { g[i] } else { 0.0 }).collect();
        let mut alphas = Vec::with_capacity(self.history.len());

        // First loop (backward)
        for c in self.history.iter().rev() {
            let alpha = c.rho * masked_dot(&c.s, &q);
            for i in (0..n).filter(|&i| free[i]) {
                q[i] -= alpha * c.y[i];
            }
            alphas.push(alpha);
        }

        // Initial Hessian approximation: gamma = s^T y / y^T y
        if let Some(last) = self.history.back() {
            let yy = dot(&last.y, &last.y);
            if yy > 0.0 {
                let gamma = 1.0 / (last.rho * yy);
                q.iter_mut().for_each(|v| *v *= gamma);
            }
        }

        // Second loop (forward)
        for (c, alpha) in self.history.iter().zip(alphas.iter().rev()) {
            let beta = c.rho * masked_dot(&c.y, &q);
            for i in (0..n).filter(|&i| free[i]) {
                q[i] += (alpha - beta) * c.s[i];
            }
        }

        q.iter_mut().for_each(|v| *v = -*v);
        q
    }
}

/// Free-variable mask and projected gradient.
fn projected_gradient(x: &[f64], g: &[f64], bound: f64) -> (Vec<bool>, Vec<f64>) {
    let free: Vec<bool> = x
        .iter()
        .zip(g)
        .map(|(&xi, &gi)| !((xi <= -bound && gi > 0.0) || (xi >= bound && gi < 0.0)))
        .collect();
    let pg = g
        .iter()
        .zip(&free)
        .map(|(&gi, &f)| if f { gi } else { 0.0 })
        .collect();
    (free, pg)
}

impl Optimizer for LbfgsbOptimizer {
    fn name(&self) -> &'static str {
        "L-BFGS-B"
    }

    fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    fn minimize(
        &mut self,
        objective: &mut dyn Objective,
        x0: &[f64],
        observer: &mut dyn FnMut(&IterationRecord),
    ) -> Result<OptimizationOutcome> {
        self.history.clear();
        let settings = self.settings.clone();
        let bound = settings.bound;
        let n = x0.len();
        let mut state = OptimizerState::new(&settings, n);

        let mut x = x0.to_vec();
        project(&mut x, bound);
        let mut g = vec![0.0; n];
        let mut f = state.evaluate(objective, &x, &mut g)?;

        let mut x_new = vec![0.0; n];
        let mut g_new = vec![0.0; n];

        let reason = loop {
            if state.iterations_exhausted() {
                break TerminationReason::MaxIterations;
            }

            let (free, pg) = projected_gradient(&x, &g, bound);
            if norm_inf(&pg) == 0.0 {
                tracing::debug!("Projected gradient vanished at iteration {}", state.iteration);
                break TerminationReason::Converged;
            }

            let mut d = self.direction(&g, &free);
            if dot(&pg, &d) >= 0.0 {
                tracing::debug!("Not a descent direction; resetting L-BFGS memory");
                self.history.clear();
                d = pg.iter().map(|v| -v).collect();
            }

            let mut t = if self.history.is_empty() {
                settings.initial_step / norm_inf(&d)
            } else {
                1.0
            };

            let mut accepted = None;
            for trial in 0..MAX_LINE_SEARCH {
                if state.evaluations_exhausted() {
                    break;
                }
                for i in 0..n {
                    x_new[i] = x[i] + t * d[i];
                }
                project(&mut x_new, bound);
                let decrease: f64 = g.iter().zip(x_new.iter().zip(&x)).map(|(gi, (a, b))| gi * (a - b)).sum();
                let f_trial = state.evaluate(objective, &x_new, &mut g_new)?;
                tracing::trace!("Line search trial {}: t={:.3e} f={:.6}", trial, t, f_trial);
                if f_trial <= f + ARMIJO * decrease.min(0.0) {
                    accepted = Some(f_trial);
                    break;
                }
                t *= 0.5;
            }

            let f_new = match accepted {
                Some(v) => v,
                None if state.evaluations_exhausted() => break TerminationReason::MaxEvaluations,
                None if self.history.is_empty() => {
                    tracing::debug!("Line search failed along steepest descent");
                    break TerminationReason::Converged;
                }
                None => {
                    tracing::debug!("Line search failed; resetting L-BFGS memory");
                    self.history.clear();
                    continue;
                }
            };

            let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
            let step = norm_inf(&s);
            self.push_correction(s, y);

            std::mem::swap(&mut x, &mut x_new);
            std::mem::swap(&mut g, &mut g_new);
            let f_prev = f;
            f = f_new;
            state.iteration += 1;

            let gradient_norm = norm2(&g);
            observer(&state.record(f, step, gradient_norm));

            if state.converged(f_prev, f) {
                break TerminationReason::Converged;
            }
            if state.evaluations_exhausted() {
                break TerminationReason::MaxEvaluations;
            }
        };

        let outcome = state.finish(reason);
        tracing::info!(
            "{} stopped ({}) after {} iterations, {} evaluations, best {:.6}",
            self.name(),
            outcome.reason,
            outcome.iterations,
            outcome.evaluations,
            outcome.best_value
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shifted, anisotropic quadratic.
    struct Quadratic {
        centre: Vec<f64>,
        scale: Vec<f64>,
    }

    impl Objective for Quadratic {
        fn evaluate(&mut self, x: &[f64], gradient: &mut [f64]) -> Result<f64> {
            let mut f = 0.0;
            for i in 0..x.len() {
                let d = x[i] - self.centre[i];
                f += self.scale[i] * d * d;
                gradient[i] = 2.0 * self.scale[i] * d;
            }
            Ok(f)
        }
    }

    fn settings() -> OptimizerSettings {
        OptimizerSettings {
            max_iterations: 200,
            max_evaluations: 1000,
            min_iterations: 1,
            tolerance: 1e-12,
            bound: 10.0,
            history: 5,
            initial_step: 1.0,
        }
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut q = Quadratic {
            centre: vec![1.0, -2.0, 0.5, 3.0],
            scale: vec![1.0, 10.0, 0.1, 4.0],
        };
        let mut opt = LbfgsbOptimizer::new(settings());
        let mut records = Vec::new();
        let out = opt
            .minimize(&mut q, &[0.0; 4], &mut |r| records.push(r.clone()))
            .unwrap();
        assert!(out.best_value < 1e-8, "best {}", out.best_value);
        for (x, c) in out.best_x.iter().zip(&q.centre) {
            assert!((x - c).abs() < 1e-3);
        }
        assert!(!records.is_empty());
        assert!(records.windows(2).all(|w| w[1].value <= w[0].value));
    }

    #[test]
    fn test_respects_bounds() {
        let mut q = Quadratic {
            centre: vec![5.0, -0.5],
            scale: vec![1.0, 1.0],
        };
        let mut s = settings();
        s.bound = 2.0;
        let mut opt = LbfgsbOptimizer::new(s);
        let out = opt.minimize(&mut q, &[0.0, 0.0], &mut |_| {}).unwrap();
        assert!((out.best_x[0] - 2.0).abs() < 1e-9);
        assert!((out.best_x[1] + 0.5).abs() < 1e-4);
        assert!(out.best_x.iter().all(|v| v.abs() <= 2.0));
    }

    #[test]
    fn test_evaluation_budget() {
        let mut q = Quadratic {
            centre: vec![1.0; 3],
            scale: vec![1.0, 100.0, 0.01],
        };
        let mut s = settings();
        s.max_evaluations = 4;
        let mut opt = LbfgsbOptimizer::new(s);
        let out = opt.minimize(&mut q, &[0.0; 3], &mut |_| {}).unwrap();
        assert_eq!(out.reason, TerminationReason::MaxEvaluations);
        assert!(out.evaluations <= 4);
    }

    #[test]
    fn test_first_step_limited_by_initial_step() {
        let mut q = Quadratic {
            centre: vec![100.0],
            scale: vec![1.0],
        };
        let mut s = settings();
        s.bound = 1000.0;
        s.max_iterations = 1;
        s.initial_step = 0.5;
        let mut opt = LbfgsbOptimizer::new(s);
        let mut steps = Vec::new();
        let out = opt.minimize(&mut q, &[0.0], &mut |r| steps.push(r.step)).unwrap();
        assert_eq!(out.reason, TerminationReason::MaxIterations);
        assert!((steps[0] - 0.5).abs() < 1e-12);
        assert!((out.best_x[0] - 0.5).abs() < 1e-12);
    }
}
