//! Random-walk Metropolis sampling of the parameter posterior.
//!
//! The likelihood is Gaussian with the effective-variance weights taken at the
//! least squares optimum. When the data carry no usable σ those weights are
//! rescaled by the residual variance, mirroring the covariance convention of
//! the OLS backend.
//!
//! Proposals are `θ + L z` with `L Lᵀ = (2.38² / p) · Σ_ls` and `z ~ N(0, I)`.
//! The chain starts at the least squares optimum (clamped into any uniform
//! prior) and keeps the draws after `burn_in`.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::debug;

use crate::domain::{FitConfig, Prior};
use crate::error::FitError;
use crate::fit::backend::{AlgorithmBackend, BackendOutput, FitProblem, to_intervals};
use crate::fit::context::FitContext;
use crate::fit::objective::{Weighting, effective_sigmas, weighted_ssr, weights_from_sigmas};
use crate::fit::ols::least_squares;
use crate::math::{column_intervals, column_means, sample_covariance};

const REPORT_EVERY: usize = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct BayesianBackend;

struct Posterior<'a> {
    problem: &'a FitProblem<'a>,
    weights: Vec<f64>,
    priors: Vec<Option<Prior>>,
}

impl Posterior<'_> {
    /// Log-posterior and weighted SSR; `None` outside the support.
    fn evaluate(&self, theta: &[f64]) -> Option<(f64, f64)> {
        let mut log_prior = 0.0;
        for (prior, value) in self.priors.iter().zip(theta) {
            if let Some(prior) = prior {
                log_prior += prior.log_density(*value)?;
            }
        }
        let ssr = weighted_ssr(self.problem.model, self.problem.points, theta, &self.weights)?;
        Some((log_prior - 0.5 * ssr, ssr))
    }
}

fn proposal_factor(covariance: &DMatrix<f64>, params: &[f64]) -> DMatrix<f64> {
    let p = params.len();
    let scale = 2.38 * 2.38 / p as f64;
    if let Some(chol) = (covariance * scale).cholesky() {
        return chol.l();
    }
    // Singular or indefinite: independent steps per parameter.
    DMatrix::from_fn(p, p, |i, j| {
        if i != j {
            return 0.0;
        }
        let var = covariance[(i, i)];
        if var.is_finite() && var > 0.0 {
            (var * scale).sqrt()
        } else {
            1e-3 * (params[i].abs() + 1e-3)
        }
    })
}

fn clamp_into_support(theta: &mut [f64], priors: &[Option<Prior>]) {
    for (value, prior) in theta.iter_mut().zip(priors) {
        if let Some(Prior::Uniform { lower, upper }) = prior {
            *value = value.clamp(*lower, *upper);
        }
    }
}

impl AlgorithmBackend for BayesianBackend {
    fn run(
        &self,
        problem: &FitProblem<'_>,
        initial: &[f64],
        config: &FitConfig,
        ctx: &FitContext<'_>,
    ) -> Result<BackendOutput, FitError> {
        let ls = least_squares(problem, initial, None, config, ctx)?;

        let sigmas = effective_sigmas(problem.model, problem.points, &ls.params)?;
        let mut weights = weights_from_sigmas(&sigmas);
        if weights.mode == Weighting::Unweighted {
            let dof = problem.degrees_of_freedom().max(1) as f64;
            let variance = (ls.cost / dof).max(f64::MIN_POSITIVE);
            weights.values.iter_mut().for_each(|w| *w /= variance);
        }

        let priors: Vec<Option<Prior>> = problem
            .parameter_names()
            .iter()
            .map(|name| config.prior.as_ref().and_then(|spec| spec.get(name)).copied())
            .collect();
        let posterior = Posterior {
            problem,
            weights: weights.values,
            priors,
        };

        let mut current = ls.params.clone();
        clamp_into_support(&mut current, &posterior.priors);
        let (mut log_post, mut ssr) = posterior.evaluate(&current).ok_or_else(|| {
            FitError::Degenerate("posterior is zero at the least squares optimum".to_string())
        })?;

        let factor = proposal_factor(&ls.covariance, &current);
        let p = current.len();
        let total = config.burn_in + config.posterior_samples;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut draws = Vec::with_capacity(config.posterior_samples);
        let mut accepted = 0usize;

        for step in 1..=total {
            ctx.check_cancelled()?;

            let z = DVector::from_fn(p, |_, _| rng.sample::<f64, _>(StandardNormal));
            let jump = &factor * z;
            let candidate: Vec<f64> = current.iter().zip(jump.iter()).map(|(c, d)| c + d).collect();

            if let Some((candidate_lp, candidate_ssr)) = posterior.evaluate(&candidate) {
                let u: f64 = rng.r#gen();
                if u.ln() < candidate_lp - log_post {
                    current = candidate;
                    log_post = candidate_lp;
                    ssr = candidate_ssr;
                    if step > config.burn_in {
                        accepted += 1;
                    }
                }
            }
            if step > config.burn_in {
                draws.push(current.clone());
            }
            if step % REPORT_EVERY == 0 {
                ctx.report(step, ssr.sqrt());
            }
        }

        let acceptance_rate = accepted as f64 / config.posterior_samples as f64;
        debug!(draws = draws.len(), acceptance_rate, "posterior sampled");

        let mean = column_means(&draws)
            .ok_or_else(|| FitError::Degenerate("no posterior draws".to_string()))?;
        let covariance = sample_covariance(&draws)
            .map(|rows| DMatrix::from_fn(p, p, |i, j| rows[i][j]))
            .ok_or_else(|| FitError::Degenerate("posterior covariance unavailable".to_string()))?;

        let mut output = BackendOutput::new(mean, covariance, total);
        output.intervals = column_intervals(&draws, config.confidence_level).map(to_intervals);
        output.acceptance_rate = Some(acceptance_rate);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataPoint, PriorSpec};
    use crate::expr::compile;
    use crate::fit::context::{CancelToken, NoProgress};
    use crate::models::Model;

    fn line() -> Vec<DataPoint> {
        (0..20)
            .map(|i| {
                let x = i as f64 * 0.25;
                let noise = ((i * 37) % 7) as f64 / 7.0 - 0.5;
                DataPoint::new(x, 0.0, 0.5 * x + 2.0 + 0.1 * noise, 0.1)
            })
            .collect()
    }

    fn run(config: &FitConfig) -> BackendOutput {
        let expr = compile("a*x + b").unwrap();
        let model = Model::new(&expr, &["a".to_string(), "b".to_string()]).unwrap();
        let points = line();
        let problem = FitProblem { model: &model, points: &points };
        let token = CancelToken::new();
        let ctx = FitContext::new(&token, &NoProgress);
        BayesianBackend.run(&problem, &[1.0, 1.0], config, &ctx).unwrap()
    }

    #[test]
    fn posterior_mean_is_near_least_squares() {
        let config = FitConfig {
            posterior_samples: 4000,
            burn_in: 500,
            ..FitConfig::default()
        };
        let out = run(&config);
        assert!((out.parameters[0] - 0.5).abs() < 0.05);
        assert!((out.parameters[1] - 2.0).abs() < 0.1);
        let rate = out.acceptance_rate.unwrap();
        assert!(rate > 0.1 && rate < 0.9, "acceptance rate {rate}");
        assert_eq!(out.iterations, 4500);
    }

    #[test]
    fn same_seed_gives_same_chain() {
        let config = FitConfig {
            posterior_samples: 500,
            burn_in: 100,
            ..FitConfig::default()
        };
        assert_eq!(run(&config).parameters, run(&config).parameters);
    }

    #[test]
    fn uniform_prior_bounds_the_draws() {
        let mut prior = PriorSpec::new();
        prior.insert("a".to_string(), Prior::Uniform { lower: 0.0, upper: 0.49 });
        let config = FitConfig {
            posterior_samples: 1000,
            burn_in: 200,
            prior: Some(prior),
            ..FitConfig::default()
        };
        let out = run(&config);
        let interval = out.intervals.unwrap()[0];
        assert!(interval.upper <= 0.49);
        assert!(out.parameters[0] <= 0.49);
    }
}
