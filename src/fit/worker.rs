//! Background fits with cancellation and progress observation.

use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::domain::{Algorithm, Dataset, FitConfig, FitResult, ParameterVector};
use crate::error::FitError;
use crate::expr::CompiledExpression;
use crate::fit::context::{CancelToken, FitContext, ProgressQueue};
use crate::fit::orchestrator::fit_with_context;

/// Handle to a fit running on its own thread.
///
/// Dropping the handle detaches the thread; call [`FitHandle::cancel`] first
/// to stop it early.
#[derive(Debug)]
pub struct FitHandle {
    cancel: CancelToken,
    progress: ProgressQueue,
    thread: JoinHandle<Result<FitResult, FitError>>,
}

impl FitHandle {
    /// Ask the fit to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Progress snapshots published by the fit. The queue is closed when the
    /// fit returns.
    pub fn progress(&self) -> &ProgressQueue {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the outcome.
    pub fn join(self) -> Result<FitResult, FitError> {
        self.thread
            .join()
            .unwrap_or_else(|_| Err(FitError::Worker("fit thread panicked".to_string())))
    }
}

/// Start a fit on a dedicated thread.
///
/// The dataset and expression are shared with the caller without copying
/// the points or the node arena.
pub fn spawn_fit(
    dataset: &Dataset,
    expr: &CompiledExpression,
    guess: ParameterVector,
    algorithm: Algorithm,
    config: FitConfig,
) -> Result<FitHandle, FitError> {
    let cancel = CancelToken::new();
    let progress = ProgressQueue::new(config.progress_capacity);

    let dataset = dataset.clone();
    let expr = expr.clone();
    let worker_cancel = cancel.clone();
    let worker_progress = progress.clone();

    let thread = thread::Builder::new()
        .name("ufit-fit".to_string())
        .spawn(move || {
            debug!(algorithm = algorithm.display_name(), "fit worker started");
            let ctx = FitContext::new(&worker_cancel, &worker_progress);
            let outcome = fit_with_context(&dataset, &expr, &guess, algorithm, &config, &ctx);
            worker_progress.close();
            outcome
        })
        .map_err(|e| FitError::Worker(format!("failed to spawn fit thread: {e}")))?;

    Ok(FitHandle {
        cancel,
        progress,
        thread,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DataPoint;
    use crate::expr::compile;

    fn line() -> Dataset {
        Dataset::new(
            (0..10)
                .map(|i| DataPoint::new(i as f64, 0.0, 2.0 * i as f64 + 1.0, 1.0))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn background_fit_publishes_progress_and_closes_queue() {
        let expr = compile("a*x + b").unwrap();
        let handle = spawn_fit(
            &line(),
            &expr,
            ParameterVector::uniform(&["a", "b"], 0.0),
            Algorithm::Ols,
            FitConfig::default(),
        )
        .unwrap();
        let progress = handle.progress().clone();
        let result = handle.join().unwrap();
        assert!((result.value("a").unwrap() - 2.0).abs() < 1e-6);
        assert!(progress.is_closed());
        assert!(progress.published() > 0);
    }

    #[test]
    fn cancelled_before_start_returns_cancelled() {
        let expr = compile("a*x + b").unwrap();
        let config = FitConfig {
            resample_count: 10_000,
            ..FitConfig::default()
        };
        let handle = spawn_fit(
            &line(),
            &expr,
            ParameterVector::uniform(&["a", "b"], 0.0),
            Algorithm::Bootstrap,
            config,
        )
        .unwrap();
        handle.cancel();
        let err = handle.join().unwrap_err();
        assert!(err.is_cancelled());
    }
}
