//! Reporting utilities: residuals and formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

pub mod format;

pub use format::*;

use tracing::debug;

use crate::domain::{Dataset, FitResult};
use crate::expr::{CompiledExpression, evaluate};

/// Fitted value and residual at one data point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Residual {
    pub x: f64,
    pub y: f64,
    pub y_fit: f64,
    pub residual: f64,
    /// `residual / σy`; `None` for exact y.
    pub normalized: Option<f64>,
}

/// Residuals of every point where the fitted model is defined.
pub fn compute_residuals(expr: &CompiledExpression, dataset: &Dataset, fit: &FitResult) -> Vec<Residual> {
    let independent = expr.independent().unwrap_or("x");
    let mut scope: Vec<(&str, f64)> = fit.parameters.iter().collect();
    scope.push((independent, 0.0));
    let slot = scope.len() - 1;

    let mut out = Vec::with_capacity(dataset.len());
    for p in dataset.points() {
        scope[slot].1 = p.x;
        let y_fit = match evaluate(expr, scope.as_slice()) {
            Ok(v) => v,
            Err(e) => {
                debug!(x = p.x, error = %e, "no residual for point");
                continue;
            }
        };
        let residual = p.y - y_fit;
        out.push(Residual {
            x: p.x,
            y: p.y,
            y_fit,
            residual,
            normalized: (p.sigma_y > 0.0).then(|| residual / p.sigma_y),
        });
    }
    out
}
