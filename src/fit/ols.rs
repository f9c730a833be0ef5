//! Weighted nonlinear least squares.
//!
//! Each Gauss–Newton step solves, in the least squares sense,
//!
//! ```text
//! [ √W J     ]       [ √W (y − f) ]
//! [ √λ · D   ] δ  =  [ 0          ]
//! ```
//!
//! with `D = diag(‖column_j(√W J)‖)` (Marquardt scaling). Weights follow the
//! effective-variance policy in [`crate::fit::objective`] and are frozen for
//! the duration of one step.

use nalgebra::{DMatrix, DVector};

use crate::domain::{DataPoint, FitConfig};
use crate::error::FitError;
use crate::fit::backend::{AlgorithmBackend, BackendOutput, FitProblem};
use crate::fit::context::FitContext;
use crate::fit::lm::{DampedProblem, LmSettings, minimize};
use crate::fit::objective::{Weighting, effective_sigmas, weighted_ssr, weights_from_sigmas};
use crate::math::{normal_covariance, solve_least_squares};
use crate::models::Model;

pub(crate) struct LeastSquares<'a> {
    model: &'a Model,
    points: &'a [DataPoint],
    /// Extra per-point weight factors (robust reweighting).
    multipliers: Option<&'a [f64]>,
    weights: Vec<f64>,
    weighting: Weighting,
    design: DMatrix<f64>,
    rhs: DVector<f64>,
}

impl<'a> LeastSquares<'a> {
    pub(crate) fn new(problem: &FitProblem<'a>, multipliers: Option<&'a [f64]>) -> Self {
        let n = problem.points.len();
        let p = problem.model.parameter_count();
        Self {
            model: problem.model,
            points: problem.points,
            multipliers,
            weights: vec![1.0; n],
            weighting: Weighting::Absolute,
            design: DMatrix::zeros(n, p),
            rhs: DVector::zeros(n),
        }
    }
}

impl DampedProblem for LeastSquares<'_> {
    fn linearize(&mut self, state: &[f64]) -> Result<f64, FitError> {
        let sigmas = effective_sigmas(self.model, self.points, state)?;
        let weights = weights_from_sigmas(&sigmas);
        self.weighting = weights.mode;
        self.weights = match self.multipliers {
            Some(m) => weights.values.iter().zip(m).map(|(w, k)| w * k).collect(),
            None => weights.values,
        };

        let mut row = vec![0.0; self.model.parameter_count()];
        for (i, p) in self.points.iter().enumerate() {
            let value = self.model.fill_gradient_row(p.x, state, &mut row)?;
            let sw = self.weights[i].sqrt();
            for (j, g) in row.iter().enumerate() {
                self.design[(i, j)] = sw * g;
            }
            self.rhs[i] = sw * (p.y - value);
        }
        Ok(self.rhs.norm_squared())
    }

    fn step(&self, lambda: f64) -> Option<Vec<f64>> {
        let (n, p) = self.design.shape();
        let mut augmented = DMatrix::<f64>::zeros(n + p, p);
        augmented.rows_mut(0, n).copy_from(&self.design);
        let damping = lambda.sqrt();
        for j in 0..p {
            augmented[(n + j, j)] = damping * self.design.column(j).norm();
        }
        let mut rhs = DVector::<f64>::zeros(n + p);
        rhs.rows_mut(0, n).copy_from(&self.rhs);

        solve_least_squares(&augmented, &rhs).map(|delta| delta.iter().copied().collect())
    }

    fn cost(&self, state: &[f64]) -> Option<f64> {
        weighted_ssr(self.model, self.points, state, &self.weights)
    }
}

/// Converged least squares fit.
#[derive(Debug, Clone)]
pub(crate) struct LsFit {
    pub params: Vec<f64>,
    pub covariance: DMatrix<f64>,
    /// Weighted SSR at the optimum.
    pub cost: f64,
    pub iterations: usize,
}

/// Run the LM driver and derive the covariance at the optimum.
pub(crate) fn least_squares(
    problem: &FitProblem<'_>,
    initial: &[f64],
    multipliers: Option<&[f64]>,
    config: &FitConfig,
    ctx: &FitContext<'_>,
) -> Result<LsFit, FitError> {
    let mut ls = LeastSquares::new(problem, multipliers);
    let outcome = minimize(
        &mut ls,
        initial.to_vec(),
        problem.parameter_names(),
        LmSettings::from(config),
        ctx,
    )?;

    // Relinearize so the Jacobian and weights belong to the final state.
    let cost = ls.linearize(&outcome.state)?;
    let mut covariance = normal_covariance(&ls.design)
        .ok_or_else(|| FitError::Degenerate("Jacobian is not finite at the optimum".to_string()))?;
    if ls.weighting == Weighting::Unweighted {
        let dof = problem.degrees_of_freedom().max(1) as f64;
        covariance *= cost / dof;
    }

    Ok(LsFit {
        params: outcome.state,
        covariance,
        cost,
        iterations: outcome.iterations,
    })
}

/// Levenberg–Marquardt weighted least squares.
#[derive(Debug, Clone, Copy, Default)]
pub struct OlsBackend;

impl AlgorithmBackend for OlsBackend {
    fn run(
        &self,
        problem: &FitProblem<'_>,
        initial: &[f64],
        config: &FitConfig,
        ctx: &FitContext<'_>,
    ) -> Result<BackendOutput, FitError> {
        let fit = least_squares(problem, initial, None, config, ctx)?;
        Ok(BackendOutput::new(fit.params, fit.covariance, fit.iterations))
    }
}
