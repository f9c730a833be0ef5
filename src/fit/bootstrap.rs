//! Nonparametric bootstrap around the weighted least squares fit.
//!
//! Every resample draws `n` points with replacement from a generator seeded
//! with `seed + k`, so the set of resamples does not depend on thread
//! scheduling. Each one is refitted from the full-data optimum.

use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::domain::{DataPoint, FitConfig};
use crate::error::FitError;
use crate::fit::backend::{AlgorithmBackend, BackendOutput, FitProblem, to_intervals};
use crate::fit::context::FitContext;
use crate::fit::ols::least_squares;
use crate::math::{column_intervals, sample_covariance};

#[derive(Debug, Clone, Copy, Default)]
pub struct BootstrapBackend;

enum Resample {
    Completed(Vec<f64>),
    Failed,
    /// Not started, or interrupted by cancellation.
    Skipped,
}

fn draw(points: &[DataPoint], seed: u64) -> Vec<DataPoint> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..points.len())
        .map(|_| points[rng.gen_range(0..points.len())])
        .collect()
}

fn run_resamples(
    problem: &FitProblem<'_>,
    start: &[f64],
    config: &FitConfig,
    ctx: &FitContext<'_>,
) -> Vec<Resample> {
    let completed = AtomicUsize::new(0);
    let quiet = ctx.quiet();

    let run_one = |k: usize| -> Resample {
        if ctx.is_cancelled() {
            return Resample::Skipped;
        }
        let points = draw(problem.points, config.seed.wrapping_add(k as u64));
        let resample = FitProblem {
            model: problem.model,
            points: &points,
        };
        match least_squares(&resample, start, None, config, &quiet) {
            Ok(fit) => {
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                ctx.report(done, fit.cost.sqrt());
                Resample::Completed(fit.params)
            }
            Err(e) if e.is_cancelled() => Resample::Skipped,
            Err(e) => {
                warn!(resample = k, error = %e, "bootstrap resample failed");
                Resample::Failed
            }
        }
    };

    (0..config.resample_count).into_par_iter().map(&run_one).collect()
}

impl AlgorithmBackend for BootstrapBackend {
    fn run(
        &self,
        problem: &FitProblem<'_>,
        initial: &[f64],
        config: &FitConfig,
        ctx: &FitContext<'_>,
    ) -> Result<BackendOutput, FitError> {
        let base = least_squares(problem, initial, None, config, ctx)?;

        let outcomes = if config.workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.workers)
                .thread_name(|i| format!("ufit-bootstrap-{i}"))
                .build()
                .map_err(|e| FitError::Worker(format!("bootstrap pool: {e}")))?;
            pool.install(|| run_resamples(problem, &base.params, config, ctx))
        } else {
            run_resamples(problem, &base.params, config, ctx)
        };

        let mut failed = 0;
        let mut samples = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Resample::Completed(params) => samples.push(params),
                Resample::Failed => failed += 1,
                Resample::Skipped => {}
            }
        }
        let cancelled = ctx.is_cancelled();
        debug!(successful = samples.len(), failed, cancelled, "bootstrap finished");

        if samples.len() < 2 {
            return Err(if cancelled {
                FitError::Cancelled { partial: None }
            } else {
                FitError::Degenerate(format!(
                    "only {} of {} bootstrap resamples converged",
                    samples.len(),
                    config.resample_count
                ))
            });
        }

        let p = base.params.len();
        let covariance = sample_covariance(&samples)
            .map(|rows| DMatrix::from_fn(p, p, |i, j| rows[i][j]))
            .ok_or_else(|| FitError::Degenerate("bootstrap covariance unavailable".to_string()))?;
        let intervals = column_intervals(&samples, config.confidence_level).map(to_intervals);

        let mut output = BackendOutput::new(base.params, covariance, base.iterations);
        output.intervals = intervals;
        output.resamples = Some(samples.len());
        output.cancelled = cancelled;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile;
    use crate::fit::context::{CancelToken, NoProgress, ProgressQueue};
    use crate::models::Model;

    fn noisy_line() -> Vec<DataPoint> {
        (0..15)
            .map(|i| {
                let x = i as f64 * 0.5;
                let noise = ((i * 7919) % 11) as f64 / 11.0 - 0.5;
                DataPoint::new(x, 0.0, 3.0 * x - 1.0 + 0.2 * noise, 0.1)
            })
            .collect()
    }

    fn config() -> FitConfig {
        FitConfig {
            resample_count: 64,
            workers: 2,
            ..FitConfig::default()
        }
    }

    #[test]
    fn resamples_are_reproducible() {
        let expr = compile("a*x + b").unwrap();
        let model = Model::new(&expr, &["a".to_string(), "b".to_string()]).unwrap();
        let points = noisy_line();
        let problem = FitProblem { model: &model, points: &points };
        let token = CancelToken::new();
        let ctx = FitContext::new(&token, &NoProgress);

        let first = BootstrapBackend.run(&problem, &[1.0, 0.0], &config(), &ctx).unwrap();
        let second = BootstrapBackend.run(&problem, &[1.0, 0.0], &config(), &ctx).unwrap();
        assert_eq!(first.resamples, Some(64));
        assert_eq!(first.covariance, second.covariance);
        let intervals = first.intervals.unwrap();
        assert!(intervals[0].lower < first.parameters[0] && first.parameters[0] < intervals[0].upper);
    }

    #[test]
    fn progress_counts_resamples() {
        let expr = compile("a*x + b").unwrap();
        let model = Model::new(&expr, &["a".to_string(), "b".to_string()]).unwrap();
        let points = noisy_line();
        let problem = FitProblem { model: &model, points: &points };
        let token = CancelToken::new();
        let queue = ProgressQueue::new(1000);
        let ctx = FitContext::new(&token, &queue);

        BootstrapBackend.run(&problem, &[1.0, 0.0], &config(), &ctx).unwrap();
        let snapshots = queue.drain();
        // Base fit iterations followed by one snapshot per resample.
        let max = snapshots.iter().map(|s| s.iteration).max().unwrap();
        assert_eq!(max, 64);
    }

    #[test]
    fn draws_depend_only_on_seed() {
        let points = noisy_line();
        let a: Vec<f64> = draw(&points, 9).iter().map(|p| p.x).collect();
        let b: Vec<f64> = draw(&points, 9).iter().map(|p| p.x).collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), points.len());
    }
}
