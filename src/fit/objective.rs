//! Weighting policy and goodness-of-fit statistics.
//!
//! Weights are `1/σ_eff²` with the effective variance
//! `σ_eff² = σy² + (∂f/∂x · σx)²`, which reduces to `σy²` for exact x.
//!
//! Zero uncertainties are allowed in the data. When only some σ_eff vanish they
//! are raised to the smallest positive σ_eff so no point gets infinite weight.
//! When all of them vanish the fit is unweighted (`w = 1`) and the covariance
//! is later scaled by the residual variance.

use crate::domain::DataPoint;
use crate::error::DomainError;
use crate::models::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Weighting {
    /// σ are absolute; covariance is `(JᵀWJ)⁻¹`.
    Absolute,
    /// No usable σ; covariance is scaled by `SSR / dof`.
    Unweighted,
}

#[derive(Debug, Clone)]
pub(crate) struct Weights {
    pub values: Vec<f64>,
    pub mode: Weighting,
}

/// Effective σ per point at `params`.
pub(crate) fn effective_sigmas(model: &Model, points: &[DataPoint], params: &[f64]) -> Result<Vec<f64>, DomainError> {
    points
        .iter()
        .map(|p| {
            if p.sigma_x > 0.0 {
                let s = model.slope(p.x, params)?;
                Ok(p.sigma_y.hypot(s * p.sigma_x))
            } else {
                Ok(p.sigma_y)
            }
        })
        .collect()
}

/// Apply the zero-σ policy and turn σ into weights.
pub(crate) fn weights_from_sigmas(sigmas: &[f64]) -> Weights {
    let floor = sigmas
        .iter()
        .copied()
        .filter(|s| *s > 0.0)
        .fold(f64::INFINITY, f64::min);
    if !floor.is_finite() {
        return Weights {
            values: vec![1.0; sigmas.len()],
            mode: Weighting::Unweighted,
        };
    }
    Weights {
        values: sigmas.iter().map(|s| 1.0 / s.max(floor).powi(2)).collect(),
        mode: Weighting::Absolute,
    }
}

/// `Σ wᵢ (yᵢ − f(xᵢ))²`, or `None` where the model is undefined.
pub(crate) fn weighted_ssr(model: &Model, points: &[DataPoint], params: &[f64], weights: &[f64]) -> Option<f64> {
    let mut total = 0.0;
    for (p, w) in points.iter().zip(weights) {
        let r = p.y - model.predict(p.x, params).ok()?;
        total += w * r * r;
    }
    total.is_finite().then_some(total)
}

/// Chi-square under the effective-variance weights at `params`.
pub(crate) fn chi_square(model: &Model, points: &[DataPoint], params: &[f64]) -> Result<f64, DomainError> {
    let sigmas = effective_sigmas(model, points, params)?;
    let weights = weights_from_sigmas(&sigmas);
    let mut total = 0.0;
    for (p, w) in points.iter().zip(&weights.values) {
        let r = p.y - model.predict(p.x, params)?;
        total += w * r * r;
    }
    Ok(total)
}

/// `1 − SS_res / SS_tot` (unweighted). `None` when y has no spread.
pub(crate) fn r_squared(model: &Model, points: &[DataPoint], params: &[f64]) -> Result<Option<f64>, DomainError> {
    let n = points.len() as f64;
    let mean = points.iter().map(|p| p.y).sum::<f64>() / n;
    let ss_tot: f64 = points.iter().map(|p| (p.y - mean).powi(2)).sum();
    let mut ss_res = 0.0;
    for p in points {
        ss_res += (p.y - model.predict(p.x, params)?).powi(2);
    }
    Ok((ss_tot > 0.0).then(|| 1.0 - ss_res / ss_tot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_zero_sigmas_are_floored() {
        let w = weights_from_sigmas(&[0.0, 0.5, 2.0]);
        assert_eq!(w.mode, Weighting::Absolute);
        assert_eq!(w.values, vec![4.0, 4.0, 0.25]);
    }

    #[test]
    fn all_zero_sigmas_mean_unweighted() {
        let w = weights_from_sigmas(&[0.0, 0.0]);
        assert_eq!(w.mode, Weighting::Unweighted);
        assert_eq!(w.values, vec![1.0, 1.0]);
    }

    #[test]
    fn effective_sigma_includes_slope_term() {
        let expr = crate::expr::compile("a*x").unwrap();
        let model = Model::new(&expr, &["a".to_string()]).unwrap();
        let points = [DataPoint::new(1.0, 0.4, 2.0, 0.3)];
        let sigmas = effective_sigmas(&model, &points, &[2.0]).unwrap();
        // sqrt(0.3² + (2 · 0.4)²)
        assert!((sigmas[0] - 0.73f64.sqrt()).abs() < 1e-12);
    }
}
