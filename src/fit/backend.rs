//! Backend interface and algorithm dispatch.

use nalgebra::DMatrix;

use crate::domain::{Algorithm, DataPoint, FitConfig, ParameterInterval};
use crate::error::FitError;
use crate::fit::bayesian::BayesianBackend;
use crate::fit::bootstrap::BootstrapBackend;
use crate::fit::context::FitContext;
use crate::fit::odr::OdrBackend;
use crate::fit::ols::OlsBackend;
use crate::fit::robust::RobustBackend;
use crate::models::Model;

/// The data a backend fits: the model and the points that survived the
/// initial domain check.
#[derive(Debug, Clone, Copy)]
pub struct FitProblem<'a> {
    pub model: &'a Model,
    pub points: &'a [DataPoint],
}

impl FitProblem<'_> {
    pub fn parameter_names(&self) -> &[String] {
        self.model.parameters()
    }

    pub fn degrees_of_freedom(&self) -> usize {
        self.points.len().saturating_sub(self.model.parameter_count())
    }
}

/// What a backend hands back to the orchestrator, which derives the
/// statistics (chi-square, R², correlation) from it.
#[derive(Debug, Clone)]
pub struct BackendOutput {
    pub parameters: Vec<f64>,
    pub covariance: DMatrix<f64>,
    pub iterations: usize,
    /// Backend-specific objective reported as chi-square (ODR).
    pub objective: Option<f64>,
    pub intervals: Option<Vec<ParameterInterval>>,
    pub resamples: Option<usize>,
    pub acceptance_rate: Option<f64>,
    /// Set when the output aggregates only the work finished before
    /// cancellation.
    pub cancelled: bool,
}

impl BackendOutput {
    pub fn new(parameters: Vec<f64>, covariance: DMatrix<f64>, iterations: usize) -> Self {
        Self {
            parameters,
            covariance,
            iterations,
            objective: None,
            intervals: None,
            resamples: None,
            acceptance_rate: None,
            cancelled: false,
        }
    }
}

/// One fitting algorithm.
pub trait AlgorithmBackend: Sync {
    fn run(
        &self,
        problem: &FitProblem<'_>,
        initial: &[f64],
        config: &FitConfig,
        ctx: &FitContext<'_>,
    ) -> Result<BackendOutput, FitError>;
}

impl Algorithm {
    /// Backend implementing this algorithm.
    pub fn backend(self) -> &'static dyn AlgorithmBackend {
        match self {
            Algorithm::Ols => &OlsBackend,
            Algorithm::Robust => &RobustBackend,
            Algorithm::Bootstrap => &BootstrapBackend,
            Algorithm::Bayesian => &BayesianBackend,
            Algorithm::Odr => &OdrBackend,
        }
    }
}

/// Interval pairs to the exported type.
pub(crate) fn to_intervals(pairs: Vec<(f64, f64)>) -> Vec<ParameterInterval> {
    pairs
        .into_iter()
        .map(|(lower, upper)| ParameterInterval { lower, upper })
        .collect()
}
