//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between the engine and its front-ends
//! - exported to JSON
//! - shared read-only across concurrent fits

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// One experimental record `(x, σx, y, σy)`.
///
/// A zero uncertainty means the coordinate is exact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub x: f64,
    pub sigma_x: f64,
    pub y: f64,
    pub sigma_y: f64,
}

impl DataPoint {
    pub fn new(x: f64, sigma_x: f64, y: f64, sigma_y: f64) -> Self {
        Self {
            x,
            sigma_x,
            y,
            sigma_y,
        }
    }
}

/// Ordered, immutable set of records plus optional axis captions.
///
/// Cloning is cheap: the records live behind an `Arc` so a dataset can be
/// handed to a background worker while the caller keeps its own copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    points: Arc<[DataPoint]>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
}

impl Dataset {
    /// Build a dataset, rejecting non-finite values and negative uncertainties.
    pub fn new(points: Vec<DataPoint>) -> Result<Self, DatasetError> {
        for (index, p) in points.iter().enumerate() {
            if !(p.x.is_finite() && p.y.is_finite() && p.sigma_x.is_finite() && p.sigma_y.is_finite()) {
                return Err(DatasetError::NonFinite { index });
            }
            if p.sigma_x < 0.0 || p.sigma_y < 0.0 {
                return Err(DatasetError::NegativeUncertainty { index });
            }
        }
        Ok(Self {
            points: points.into(),
            x_label: None,
            y_label: None,
        })
    }

    /// Build a dataset from four parallel columns.
    pub fn from_columns(
        x: &[f64],
        sigma_x: &[f64],
        y: &[f64],
        sigma_y: &[f64],
    ) -> Result<Self, DatasetError> {
        let n = x.len();
        if sigma_x.len() != n || y.len() != n || sigma_y.len() != n {
            return Err(DatasetError::ColumnLengthMismatch);
        }
        let points = (0..n)
            .map(|i| DataPoint::new(x[i], sigma_x[i], y[i], sigma_y[i]))
            .collect();
        Self::new(points)
    }

    pub fn with_labels(mut self, x_label: Option<String>, y_label: Option<String>) -> Self {
        self.x_label = x_label;
        self.y_label = y_label;
        self
    }

    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True when every σx is zero (explicit-function fitting is exact in x).
    pub fn x_is_exact(&self) -> bool {
        self.points.iter().all(|p| p.sigma_x == 0.0)
    }

    /// `(min, max)` of the x column, or `None` for an empty dataset.
    pub fn x_range(&self) -> Option<(f64, f64)> {
        let mut iter = self.points.iter().map(|p| p.x);
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), x| (lo.min(x), hi.max(x))))
    }
}

/// Ordered mapping from parameter name to value.
///
/// Insertion order is significant: it defines the Jacobian column order and the
/// covariance matrix indexing of a fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    entries: Vec<(String, f64)>,
}

impl ParameterVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same value for every name, in the given order.
    pub fn uniform<S: AsRef<str>>(names: &[S], value: f64) -> Self {
        Self {
            entries: names.iter().map(|n| (n.as_ref().to_string(), value)).collect(),
        }
    }

    pub fn from_names_values(names: &[String], values: &[f64]) -> Self {
        Self {
            entries: names.iter().cloned().zip(values.iter().copied()).collect(),
        }
    }

    /// Insert or update a value. Updating keeps the original position.
    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, v)| *v).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ParameterVector {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut out = ParameterVector::new();
        for (name, value) in iter {
            out.set(name, value);
        }
        out
    }
}

/// Fitting algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Weighted nonlinear least squares (Levenberg–Marquardt).
    Ols,
    /// Huber M-estimator via iteratively reweighted least squares.
    Robust,
    /// Resampling with replacement, OLS on each resample.
    Bootstrap,
    /// Posterior sampling (random-walk Metropolis).
    Bayesian,
    /// Orthogonal distance regression (errors in both variables).
    Odr,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Ols,
        Algorithm::Robust,
        Algorithm::Bootstrap,
        Algorithm::Bayesian,
        Algorithm::Odr,
    ];

    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            Algorithm::Ols => "Least squares",
            Algorithm::Robust => "Robust (Huber)",
            Algorithm::Bootstrap => "Bootstrap",
            Algorithm::Bayesian => "Bayesian (MCMC)",
            Algorithm::Odr => "Orthogonal distance",
        }
    }
}

/// Prior density for one parameter of a Bayesian fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Prior {
    /// Flat density on `[lower, upper]`, zero outside.
    Uniform { lower: f64, upper: f64 },
    /// Gaussian density.
    Normal { mean: f64, std_dev: f64 },
}

impl Prior {
    /// Log-density up to an additive constant; `None` outside the support.
    pub fn log_density(&self, value: f64) -> Option<f64> {
        match *self {
            Prior::Uniform { lower, upper } => (value >= lower && value <= upper).then_some(0.0),
            Prior::Normal { mean, std_dev } => {
                let z = (value - mean) / std_dev;
                Some(-0.5 * z * z)
            }
        }
    }

    fn is_valid(&self) -> bool {
        match *self {
            Prior::Uniform { lower, upper } => lower.is_finite() && upper.is_finite() && upper >= lower,
            Prior::Normal { mean, std_dev } => mean.is_finite() && std_dev.is_finite() && std_dev > 0.0,
        }
    }
}

/// Per-parameter priors. Parameters without an entry get a flat, improper prior.
pub type PriorSpec = BTreeMap<String, Prior>;

/// Fitting options.
///
/// Passed explicitly into every call; the engine keeps no process-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Iteration budget of the damped Gauss–Newton driver (per fit).
    pub max_iterations: usize,
    /// Relative tolerance on the objective decrease and on the step size.
    pub convergence_tolerance: f64,
    /// Coverage of Bootstrap confidence / Bayesian credible intervals.
    pub confidence_level: f64,
    /// Number of Bootstrap resamples.
    pub resample_count: usize,
    /// Bayesian priors (optional).
    pub prior: Option<PriorSpec>,
    /// Huber tuning constant, in units of the robust residual scale.
    pub huber_k: f64,
    /// Outer IRLS iterations of the robust backend.
    pub robust_iterations: usize,
    /// Number of retained posterior draws.
    pub posterior_samples: usize,
    /// Number of discarded warm-up draws.
    pub burn_in: usize,
    /// Seed for Bootstrap resampling and MCMC.
    pub seed: u64,
    /// Capacity of the progress queue of a background fit.
    pub progress_capacity: usize,
    /// Bootstrap pool size; `0` uses the global rayon pool.
    pub workers: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            convergence_tolerance: 1e-10,
            confidence_level: 0.95,
            resample_count: 1000,
            prior: None,
            huber_k: 1.345,
            robust_iterations: 50,
            posterior_samples: 5000,
            burn_in: 1000,
            seed: 42,
            progress_capacity: 64,
            workers: 0,
        }
    }
}

impl FitConfig {
    /// Check option ranges. Returns a description of the first invalid option.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("max_iterations must be > 0".to_string());
        }
        if !(self.convergence_tolerance.is_finite() && self.convergence_tolerance > 0.0) {
            return Err("convergence_tolerance must be finite and > 0".to_string());
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err("confidence_level must be in (0, 1)".to_string());
        }
        if !(self.huber_k.is_finite() && self.huber_k > 0.0) {
            return Err("huber_k must be finite and > 0".to_string());
        }
        if self.robust_iterations == 0 {
            return Err("robust_iterations must be > 0".to_string());
        }
        if self.resample_count < 2 {
            return Err("resample_count must be at least 2".to_string());
        }
        if self.posterior_samples < 2 {
            return Err("posterior_samples must be at least 2".to_string());
        }
        if let Some(prior) = &self.prior {
            if let Some((name, _)) = prior.iter().find(|(_, p)| !p.is_valid()) {
                return Err(format!("invalid prior for parameter '{name}'"));
            }
        }
        Ok(())
    }
}

/// Two-sided interval for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Outcome of one fit invocation. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub algorithm: Algorithm,
    pub parameters: ParameterVector,
    /// Square roots of the covariance diagonal.
    pub uncertainties: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    pub correlation: Vec<Vec<f64>>,
    pub chi_square: f64,
    pub reduced_chi_square: f64,
    pub degrees_of_freedom: usize,
    /// Coefficient of determination; `None` when y has no spread.
    pub r_squared: Option<f64>,
    pub iterations: usize,
    pub points_used: usize,
    /// Points skipped because the model is undefined there.
    pub points_excluded: usize,
    /// Confidence (Bootstrap) or credible (Bayesian) intervals.
    pub intervals: Option<Vec<ParameterInterval>>,
    /// Successful Bootstrap resamples.
    pub resamples: Option<usize>,
    /// Metropolis acceptance rate.
    pub acceptance_rate: Option<f64>,
}

impl FitResult {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameters.get(name)
    }

    pub fn uncertainty(&self, name: &str) -> Option<f64> {
        let idx = self.parameters.iter().position(|(n, _)| n == name)?;
        self.uncertainties.get(idx).copied()
    }
}

/// A measured quantity `value ± uncertainty`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub uncertainty: f64,
}

impl Measurement {
    pub fn new(value: f64, uncertainty: f64) -> Self {
        Self { value, uncertainty }
    }
}

/// Symbol bindings for uncertainty propagation.
pub type Bindings = BTreeMap<String, Measurement>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_vector_keeps_insertion_order() {
        let mut params = ParameterVector::new();
        params.set("b", 1.0);
        params.set("a", 2.0);
        params.set("b", 3.0);
        assert_eq!(params.names(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(params.values(), vec![3.0, 2.0]);
    }

    #[test]
    fn dataset_rejects_negative_uncertainty() {
        let err = Dataset::new(vec![DataPoint::new(0.0, -1.0, 0.0, 0.0)]).unwrap_err();
        assert_eq!(err, DatasetError::NegativeUncertainty { index: 0 });
    }

    #[test]
    fn default_config_is_valid() {
        assert!(FitConfig::default().validate().is_ok());
        let bad = FitConfig {
            confidence_level: 1.0,
            ..FitConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: FitConfig =
            serde_json::from_str(r#"{"resample_count": 10, "prior": {"a": {"kind": "uniform", "lower": 0.0, "upper": 5.0}}}"#)
                .unwrap();
        assert_eq!(cfg.resample_count, 10);
        assert_eq!(cfg.max_iterations, 200);
        let prior = cfg.prior.unwrap();
        assert_eq!(prior["a"], Prior::Uniform { lower: 0.0, upper: 5.0 });
    }

    #[test]
    fn uniform_prior_rejects_outside_support() {
        let prior = Prior::Uniform { lower: 0.0, upper: 1.0 };
        assert_eq!(prior.log_density(0.5), Some(0.0));
        assert_eq!(prior.log_density(1.5), None);
    }
}
