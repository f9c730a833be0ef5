//! Levenberg–Marquardt driver.
//!
//! The driver owns the damping schedule and the convergence tests; a
//! [`DampedProblem`] owns the objective. OLS (and therefore Robust, Bootstrap and
//! the Bayesian warm start) and ODR plug into the same loop.
//!
//! Per iteration:
//! 1. linearize at the current state (cost, Jacobian, weights)
//! 2. propose a damped step; a rejected step raises λ tenfold and retries
//! 3. an accepted step lowers λ tenfold
//!
//! Converged when the step is negligible relative to the state, the relative
//! cost decrease falls below the tolerance, or λ saturates (no descent
//! direction left).

use tracing::debug;

use crate::domain::{FitConfig, ParameterVector};
use crate::error::FitError;
use crate::fit::context::FitContext;

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// Objective interface for the driver.
pub(crate) trait DampedProblem {
    /// Linearize at `state` and return the objective there.
    fn linearize(&mut self, state: &[f64]) -> Result<f64, FitError>;

    /// Damped step from the last linearization; `None` if the solve fails.
    fn step(&self, lambda: f64) -> Option<Vec<f64>>;

    /// Objective at a trial state under the weights of the last
    /// linearization; `None` where the model is undefined.
    fn cost(&self, state: &[f64]) -> Option<f64>;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LmSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl From<&FitConfig> for LmSettings {
    fn from(config: &FitConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            tolerance: config.convergence_tolerance,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LmOutcome {
    pub state: Vec<f64>,
    pub iterations: usize,
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Minimize `problem` from `initial`.
///
/// `names` labels the leading entries of the state for error reporting; any
/// further entries (ODR x-corrections) are internal.
pub(crate) fn minimize<P: DampedProblem>(
    problem: &mut P,
    initial: Vec<f64>,
    names: &[String],
    settings: LmSettings,
    ctx: &FitContext<'_>,
) -> Result<LmOutcome, FitError> {
    let tol = settings.tolerance;
    let mut state = initial;
    let mut lambda = LAMBDA_INIT;
    let mut cost = f64::NAN;

    for iteration in 1..=settings.max_iterations {
        ctx.check_cancelled()?;
        cost = problem.linearize(&state)?;
        ctx.report(iteration, cost.sqrt());
        debug!(iteration, cost, lambda, "lm iteration");

        let done = |state: Vec<f64>| {
            Ok(LmOutcome {
                state,
                iterations: iteration,
            })
        };

        if cost == 0.0 {
            return done(state);
        }

        loop {
            let Some(delta) = problem.step(lambda) else {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    return done(state);
                }
                continue;
            };

            if norm(&delta) <= tol * (norm(&state) + tol) {
                return done(state);
            }

            let trial: Vec<f64> = state.iter().zip(&delta).map(|(s, d)| s + d).collect();
            match problem.cost(&trial) {
                Some(trial_cost) if trial_cost <= cost => {
                    let decrease = cost - trial_cost;
                    state = trial;
                    lambda = (lambda * 0.1).max(LAMBDA_MIN);
                    if decrease <= tol * cost {
                        return done(state);
                    }
                    // `cost` tracks `state` so a non-converged exit reports a matching norm.
                    cost = trial_cost;
                    break;
                }
                _ => {
                    lambda *= 10.0;
                    if lambda > LAMBDA_MAX {
                        return done(state);
                    }
                }
            }
        }
    }

    let p = names.len().min(state.len());
    Err(FitError::NonConvergence {
        iterations: settings.max_iterations,
        last_residual_norm: cost.sqrt(),
        last_parameters: ParameterVector::from_names_values(names, &state[..p]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::context::{CancelToken, NoProgress};

    /// `(s0 - 3)² + 10 (s1 + 1)²` as residuals `[s0 - 3, √10 (s1 + 1)]`.
    struct Quadratic {
        jac: [f64; 2],
        res: [f64; 2],
    }

    impl DampedProblem for Quadratic {
        fn linearize(&mut self, state: &[f64]) -> Result<f64, FitError> {
            self.res = [state[0] - 3.0, 10f64.sqrt() * (state[1] + 1.0)];
            self.jac = [1.0, 10f64.sqrt()];
            Ok(self.res.iter().map(|r| r * r).sum())
        }

        fn step(&self, lambda: f64) -> Option<Vec<f64>> {
            Some(
                (0..2)
                    .map(|i| -self.jac[i] * self.res[i] / (self.jac[i] * self.jac[i] * (1.0 + lambda)))
                    .collect(),
            )
        }

        fn cost(&self, state: &[f64]) -> Option<f64> {
            Some((state[0] - 3.0).powi(2) + 10.0 * (state[1] + 1.0).powi(2))
        }
    }

    fn settings() -> LmSettings {
        LmSettings {
            max_iterations: 100,
            tolerance: 1e-12,
        }
    }

    #[test]
    fn converges_on_separable_quadratic() {
        let mut problem = Quadratic { jac: [0.0; 2], res: [0.0; 2] };
        let token = CancelToken::new();
        let ctx = FitContext::new(&token, &NoProgress);
        let names = vec!["a".to_string(), "b".to_string()];
        let out = minimize(&mut problem, vec![0.0, 0.0], &names, settings(), &ctx).unwrap();
        assert!((out.state[0] - 3.0).abs() < 1e-9);
        assert!((out.state[1] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn starting_at_the_minimum_takes_one_iteration() {
        let mut problem = Quadratic { jac: [0.0; 2], res: [0.0; 2] };
        let token = CancelToken::new();
        let ctx = FitContext::new(&token, &NoProgress);
        let out = minimize(&mut problem, vec![3.0, -1.0], &[], settings(), &ctx).unwrap();
        assert_eq!(out.iterations, 1);
    }

    #[test]
    fn iteration_limit_reports_the_last_state() {
        let mut problem = Quadratic { jac: [0.0; 2], res: [0.0; 2] };
        let token = CancelToken::new();
        let ctx = FitContext::new(&token, &NoProgress);
        let names = vec!["a".to_string(), "b".to_string()];
        let limited = LmSettings { max_iterations: 1, ..settings() };
        match minimize(&mut problem, vec![0.0, 0.0], &names, limited, &ctx).unwrap_err() {
            FitError::NonConvergence {
                iterations,
                last_residual_norm,
                last_parameters,
            } => {
                assert_eq!(iterations, 1);
                assert_eq!(last_parameters.names(), vec!["a", "b"]);
                let state = last_parameters.values();
                assert!((state[0] - 3.0).abs() < 0.01);
                let expected = problem.cost(&state).unwrap().sqrt();
                assert!((last_residual_norm - expected).abs() < 1e-12);
            }
            other => panic!("expected non-convergence, got {other:?}"),
        }
    }

    #[test]
    fn observes_cancellation() {
        let mut problem = Quadratic { jac: [0.0; 2], res: [0.0; 2] };
        let token = CancelToken::new();
        token.cancel();
        let ctx = FitContext::new(&token, &NoProgress);
        let err = minimize(&mut problem, vec![0.0, 0.0], &[], settings(), &ctx).unwrap_err();
        assert!(err.is_cancelled());
    }
}
