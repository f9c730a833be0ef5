//! Orthogonal distance regression.
//!
//! Minimizes `Σ [ ((f(xᵢ + δᵢ) − yᵢ) / σyᵢ)² + (δᵢ / σxᵢ)² ]` over the
//! parameters β and one x-correction δᵢ per point with `σxᵢ > 0`. Points with
//! exact x carry no δ and contribute an ordinary weighted residual.
//!
//! The damped normal equations have a block-diagonal δ part, so each step
//! eliminates δ point by point and solves only the `p × p` reduced system:
//!
//! ```text
//! eᵢ = (f − y)/σy   dᵢ = δ/σx   s = ∂f/∂x
//! aᵢ = (1 + λ)(s²/σy² + 1/σx²)      cᵢ = s·e/σy + d/σx
//! ωᵢ = 1/σy² − s²/(σy⁴ aᵢ)          ρᵢ = e/σy − s·cᵢ/(σy² aᵢ)
//! (Σ ωᵢ gᵢgᵢᵀ + λ·diag M) Δβ = −Σ ρᵢ gᵢ,   M = Σ gᵢgᵢᵀ/σy²
//! Δδᵢ = −(cᵢ + s·gᵢᵀΔβ/σy²) / aᵢ
//! ```
//!
//! With every σx zero this is exactly the weighted Gauss–Newton step of OLS.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::domain::{DataPoint, FitConfig};
use crate::error::FitError;
use crate::fit::backend::{AlgorithmBackend, BackendOutput, FitProblem};
use crate::fit::context::FitContext;
use crate::fit::lm::{DampedProblem, LmSettings, minimize};
use crate::math::{solve_least_squares, symmetric_pseudo_inverse};
use crate::models::Model;

#[derive(Debug, Clone, Copy, Default)]
pub struct OdrBackend;

/// Linearization of one point.
#[derive(Debug, Clone, Default)]
struct PointTerms {
    gradient: Vec<f64>,
    e: f64,
    slope: f64,
    /// `d` and `1/σx²` for points carrying a correction.
    correction: Option<(f64, f64)>,
}

struct Orthogonal<'a> {
    model: &'a Model,
    points: &'a [DataPoint],
    sigma_y: Vec<f64>,
    /// Index into the δ block of the state, per point.
    slots: Vec<Option<usize>>,
    p: usize,
    terms: Vec<PointTerms>,
}

impl<'a> Orthogonal<'a> {
    fn new(problem: &FitProblem<'a>) -> (Self, bool) {
        let floor = problem
            .points
            .iter()
            .map(|p| p.sigma_y)
            .filter(|s| *s > 0.0)
            .fold(f64::INFINITY, f64::min);
        let weighted = floor.is_finite();
        let sigma_y = problem
            .points
            .iter()
            .map(|p| if weighted { p.sigma_y.max(floor) } else { 1.0 })
            .collect();

        let p = problem.model.parameter_count();
        let mut next = p;
        let slots = problem
            .points
            .iter()
            .map(|pt| {
                (pt.sigma_x > 0.0).then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();

        let odr = Self {
            model: problem.model,
            points: problem.points,
            sigma_y,
            slots,
            p,
            terms: vec![PointTerms::default(); problem.points.len()],
        };
        (odr, weighted)
    }

    fn state_len(&self) -> usize {
        self.p + self.slots.iter().flatten().count()
    }

    /// Reduced `p × p` system and right-hand side at damping `lambda`.
    fn reduced_system(&self, lambda: f64) -> (DMatrix<f64>, DVector<f64>, Vec<(f64, f64)>) {
        let p = self.p;
        let mut reduced = DMatrix::<f64>::zeros(p, p);
        let mut diag = vec![0.0; p];
        let mut rhs = DVector::<f64>::zeros(p);
        // (a, c) per point, reused for back-substitution.
        let mut blocks = Vec::with_capacity(self.terms.len());

        for (t, sy) in self.terms.iter().zip(&self.sigma_y) {
            let sy2 = sy * sy;
            let (omega, rho, block) = match t.correction {
                Some((d, inv_sx2)) => {
                    let a = (1.0 + lambda) * (t.slope * t.slope / sy2 + inv_sx2);
                    let c = t.slope * t.e / sy + d * inv_sx2.sqrt();
                    let omega = 1.0 / sy2 - t.slope * t.slope / (sy2 * sy2 * a);
                    let rho = t.e / sy - t.slope * c / (sy2 * a);
                    (omega, rho, (a, c))
                }
                None => (1.0 / sy2, t.e / sy, (1.0, 0.0)),
            };
            blocks.push(block);

            for i in 0..p {
                let gi = t.gradient[i];
                rhs[i] -= rho * gi;
                diag[i] += gi * gi / sy2;
                for j in 0..p {
                    reduced[(i, j)] += omega * gi * t.gradient[j];
                }
            }
        }
        for (i, d) in diag.iter().enumerate() {
            reduced[(i, i)] += lambda * d;
        }
        (reduced, rhs, blocks)
    }

    fn covariance(&self) -> Option<DMatrix<f64>> {
        let (reduced, _, _) = self.reduced_system(0.0);
        symmetric_pseudo_inverse(&reduced)
    }
}

impl DampedProblem for Orthogonal<'_> {
    fn linearize(&mut self, state: &[f64]) -> Result<f64, FitError> {
        let (beta, deltas) = state.split_at(self.p);
        let mut cost = 0.0;
        for (i, pt) in self.points.iter().enumerate() {
            let slot = self.slots[i];
            let delta = slot.map_or(0.0, |k| deltas[k - self.p]);
            let xi = pt.x + delta;

            let t = &mut self.terms[i];
            t.gradient.resize(self.p, 0.0);
            let value = self.model.fill_gradient_row(xi, beta, &mut t.gradient)?;
            t.slope = self.model.slope(xi, beta)?;
            t.e = (value - pt.y) / self.sigma_y[i];
            t.correction = slot.map(|_| (delta / pt.sigma_x, 1.0 / (pt.sigma_x * pt.sigma_x)));

            cost += t.e * t.e + t.correction.map_or(0.0, |(d, _)| d * d);
        }
        Ok(cost)
    }

    fn step(&self, lambda: f64) -> Option<Vec<f64>> {
        let (reduced, rhs, blocks) = self.reduced_system(lambda);
        let d_beta = solve_least_squares(&reduced, &rhs)?;

        let mut step = vec![0.0; self.state_len()];
        step[..self.p].copy_from_slice(d_beta.as_slice());
        for ((t, slot), ((a, c), sy)) in self
            .terms
            .iter()
            .zip(&self.slots)
            .zip(blocks.iter().zip(&self.sigma_y))
        {
            if let Some(k) = slot {
                let coupling: f64 = t.gradient.iter().zip(d_beta.iter()).map(|(g, b)| g * b).sum();
                step[*k] = -(c + t.slope * coupling / (sy * sy)) / a;
            }
        }
        Some(step)
    }

    fn cost(&self, state: &[f64]) -> Option<f64> {
        let (beta, deltas) = state.split_at(self.p);
        let mut total = 0.0;
        for (i, pt) in self.points.iter().enumerate() {
            let delta = self.slots[i].map_or(0.0, |k| deltas[k - self.p]);
            let e = (self.model.predict(pt.x + delta, beta).ok()? - pt.y) / self.sigma_y[i];
            total += e * e;
            if self.slots[i].is_some() {
                total += (delta / pt.sigma_x).powi(2);
            }
        }
        total.is_finite().then_some(total)
    }
}

impl AlgorithmBackend for OdrBackend {
    fn run(
        &self,
        problem: &FitProblem<'_>,
        initial: &[f64],
        config: &FitConfig,
        ctx: &FitContext<'_>,
    ) -> Result<BackendOutput, FitError> {
        let (mut odr, weighted) = Orthogonal::new(problem);
        let mut state = initial.to_vec();
        state.resize(odr.state_len(), 0.0);
        debug!(corrections = odr.state_len() - odr.p, weighted, "odr start");

        let outcome = minimize(
            &mut odr,
            state,
            problem.parameter_names(),
            LmSettings::from(config),
            ctx,
        )?;

        let cost = odr.linearize(&outcome.state)?;
        let mut covariance = odr
            .covariance()
            .ok_or_else(|| FitError::Degenerate("ODR normal matrix is not finite".to_string()))?;
        if !weighted {
            let dof = problem.degrees_of_freedom().max(1) as f64;
            covariance *= cost / dof;
        }

        let mut params = outcome.state;
        params.truncate(odr.p);
        let mut output = BackendOutput::new(params, covariance, outcome.iterations);
        output.objective = Some(cost);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile;
    use crate::fit::context::{CancelToken, NoProgress};
    use crate::fit::ols::OlsBackend;

    fn model(formula: &str, names: &[&str]) -> Model {
        let expr = compile(formula).unwrap();
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        Model::new(&expr, &names).unwrap()
    }

    fn run_both(model: &Model, points: &[DataPoint], guess: &[f64]) -> (BackendOutput, BackendOutput) {
        let problem = FitProblem { model, points };
        let token = CancelToken::new();
        let ctx = FitContext::new(&token, &NoProgress);
        let config = FitConfig::default();
        (
            OlsBackend.run(&problem, guess, &config, &ctx).unwrap(),
            OdrBackend.run(&problem, guess, &config, &ctx).unwrap(),
        )
    }

    #[test]
    fn matches_ols_when_x_is_exact() {
        let m = model("a*exp(b*x)", &["a", "b"]);
        let points: Vec<DataPoint> = (0..10)
            .map(|i| {
                let x = i as f64 * 0.3;
                let noise = if i % 3 == 0 { 0.02 } else { -0.01 };
                DataPoint::new(x, 0.0, 1.5 * (0.7 * x).exp() + noise, 0.05)
            })
            .collect();
        let (ols, odr) = run_both(&m, &points, &[1.0, 0.5]);
        for j in 0..2 {
            let rel = (ols.parameters[j] - odr.parameters[j]).abs() / ols.parameters[j].abs();
            assert!(rel < 1e-6);
            let rel_cov = (ols.covariance[(j, j)] - odr.covariance[(j, j)]).abs() / ols.covariance[(j, j)];
            assert!(rel_cov < 1e-6);
        }
    }

    #[test]
    fn x_errors_move_points_horizontally() {
        // Exact line with x observations perturbed; δ should absorb the shift.
        let m = model("a*x + b", &["a", "b"]);
        let points: Vec<DataPoint> = (0..8)
            .map(|i| {
                let x_true = i as f64;
                let shift = if i % 2 == 0 { 0.1 } else { -0.1 };
                DataPoint::new(x_true + shift, 0.1, 2.0 * x_true + 1.0, 0.01)
            })
            .collect();
        let (_, odr) = run_both(&m, &points, &[1.0, 0.0]);
        assert!((odr.parameters[0] - 2.0).abs() < 0.05);
        let objective = odr.objective.unwrap();
        assert!(objective.is_finite() && objective > 0.0);
    }

    #[test]
    fn state_layout_skips_exact_points() {
        let m = model("a*x", &["a"]);
        let points = [
            DataPoint::new(0.0, 0.0, 0.0, 1.0),
            DataPoint::new(1.0, 0.2, 1.0, 1.0),
            DataPoint::new(2.0, 0.0, 2.0, 1.0),
            DataPoint::new(3.0, 0.3, 3.0, 1.0),
        ];
        let problem = FitProblem { model: &m, points: &points };
        let (odr, weighted) = Orthogonal::new(&problem);
        assert!(weighted);
        assert_eq!(odr.slots, vec![None, Some(1), None, Some(2)]);
        assert_eq!(odr.state_len(), 3);
    }
}
