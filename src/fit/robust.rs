//! Iteratively reweighted least squares with Huber weights.
//!
//! Each round fits weighted OLS with the current weight factors, then derives
//! new factors from the standardized residuals `(y − f) / σ_eff` and a MAD
//! scale. Rounds stop once both the factors and the parameters settle.

use tracing::debug;

use crate::domain::{FitConfig, ParameterVector};
use crate::error::FitError;
use crate::fit::backend::{AlgorithmBackend, BackendOutput, FitProblem};
use crate::fit::context::FitContext;
use crate::fit::objective::{effective_sigmas, weights_from_sigmas};
use crate::fit::ols::least_squares;
use crate::math::{huber_factors, mad_scale};

const SCALE_FLOOR: f64 = 1e-8;
const MIN_FACTOR: f64 = 1e-3;

#[derive(Debug, Clone, Copy, Default)]
pub struct RobustBackend;

fn standardized_residuals(problem: &FitProblem<'_>, params: &[f64]) -> Result<Vec<f64>, FitError> {
    let sigmas = effective_sigmas(problem.model, problem.points, params)?;
    let weights = weights_from_sigmas(&sigmas);
    problem
        .points
        .iter()
        .zip(&weights.values)
        .map(|(p, w)| Ok((p.y - problem.model.predict(p.x, params)?) * w.sqrt()))
        .collect()
}

fn relative_shift(old: &[f64], new: &[f64]) -> f64 {
    old.iter()
        .zip(new)
        .map(|(a, b)| (a - b).abs() / a.abs().max(b.abs()).max(f64::MIN_POSITIVE))
        .fold(0.0, f64::max)
}

impl AlgorithmBackend for RobustBackend {
    fn run(
        &self,
        problem: &FitProblem<'_>,
        initial: &[f64],
        config: &FitConfig,
        ctx: &FitContext<'_>,
    ) -> Result<BackendOutput, FitError> {
        let threshold = config.convergence_tolerance.sqrt();
        let mut factors = vec![1.0; problem.points.len()];
        let mut params = initial.to_vec();
        let mut iterations = 0;
        let mut last_norm = f64::NAN;

        for round in 1..=config.robust_iterations {
            ctx.check_cancelled()?;
            let fit = least_squares(problem, &params, Some(&factors), config, ctx)?;
            iterations += fit.iterations;
            last_norm = fit.cost.sqrt();

            let residuals = standardized_residuals(problem, &fit.params)?;
            let scale = mad_scale(&residuals, SCALE_FLOOR);
            let next = huber_factors(&residuals, config.huber_k, scale, MIN_FACTOR);

            let weight_shift = factors
                .iter()
                .zip(&next)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            let param_shift = relative_shift(&params, &fit.params);
            debug!(round, scale, weight_shift, param_shift, "robust round");

            params = fit.params;
            factors = next;
            // Stable weights mean the last fit already used them.
            if round > 1 && weight_shift <= threshold && param_shift <= threshold {
                return Ok(BackendOutput::new(params, fit.covariance, iterations));
            }
        }

        Err(FitError::NonConvergence {
            iterations,
            last_residual_norm: last_norm,
            last_parameters: ParameterVector::from_names_values(problem.parameter_names(), &params),
        })
    }
}
