//! Model evaluation for fitting.
//!
//! The backends rely on three primitive operations per data point:
//! - predict `f(x; β)` (residuals, objective)
//! - fill a Jacobian row `∂f/∂β_j` (Gauss–Newton steps)
//! - the slope `∂f/∂x` (effective variance, ODR)
//!
//! All derivatives are symbolic and are built once, sharing one arena, when
//! the [`Model`] is constructed.

use crate::error::{DifferentiationError, DomainError};
use crate::expr::diff::gradient;
use crate::expr::eval::evaluate_into;
use crate::expr::{CompiledExpression, Scope};

/// Variable bindings for one data point: `x` plus the parameter vector.
pub struct PointScope<'a> {
    independent: &'a str,
    x: f64,
    names: &'a [String],
    values: &'a [f64],
}

impl Scope for PointScope<'_> {
    fn lookup(&self, name: &str) -> Option<f64> {
        if name == self.independent {
            return Some(self.x);
        }
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }
}

/// A compiled model with its parameter order and symbolic derivatives.
#[derive(Debug, Clone)]
pub struct Model {
    expr: CompiledExpression,
    independent: String,
    parameters: Vec<String>,
    gradient: Vec<CompiledExpression>,
    slope: CompiledExpression,
}

impl Model {
    /// `parameters` fixes the Jacobian column order.
    pub fn new(expr: &CompiledExpression, parameters: &[String]) -> Result<Self, DifferentiationError> {
        let independent = expr.independent().unwrap_or("x").to_string();
        let mut vars: Vec<&str> = parameters.iter().map(String::as_str).collect();
        vars.push(&independent);

        let mut derivatives = gradient(expr, &vars)?;
        let slope = derivatives
            .pop()
            .ok_or(DifferentiationError { function: "gradient" })?;

        Ok(Self {
            expr: expr.clone(),
            independent,
            parameters: parameters.to_vec(),
            gradient: derivatives,
            slope,
        })
    }

    pub fn expression(&self) -> &CompiledExpression {
        &self.expr
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    fn scope<'a>(&'a self, x: f64, params: &'a [f64]) -> PointScope<'a> {
        PointScope {
            independent: &self.independent,
            x,
            names: &self.parameters,
            values: params,
        }
    }

    /// `f(x; β)`.
    pub fn predict(&self, x: f64, params: &[f64]) -> Result<f64, DomainError> {
        let mut slots = Vec::new();
        evaluate_into(&self.expr, &self.scope(x, params), &mut slots)
    }

    /// `∂f/∂x` at `(x; β)`.
    pub fn slope(&self, x: f64, params: &[f64]) -> Result<f64, DomainError> {
        let mut slots = Vec::new();
        evaluate_into(&self.slope, &self.scope(x, params), &mut slots)
    }

    /// Fill `out` with `∂f/∂β_j` and return `f(x; β)`.
    ///
    /// # Panics
    /// Panics if `out.len()` differs from the parameter count.
    pub fn fill_gradient_row(&self, x: f64, params: &[f64], out: &mut [f64]) -> Result<f64, DomainError> {
        assert_eq!(out.len(), self.gradient.len());
        let scope = self.scope(x, params);
        let mut slots = Vec::new();
        let value = evaluate_into(&self.expr, &scope, &mut slots)?;
        // Gradient expressions share one arena, so the buffer is reused as is.
        let mut shared = Vec::new();
        for (slot, d) in out.iter_mut().zip(&self.gradient) {
            *slot = evaluate_into(d, &scope, &mut shared)?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn gradient_row_follows_parameter_order() {
        let expr = compile("a*x + b").unwrap();
        let model = Model::new(&expr, &names(&["b", "a"])).unwrap();
        let mut row = [0.0; 2];
        let value = model.fill_gradient_row(3.0, &[1.0, 2.0], &mut row).unwrap();
        assert_eq!(value, 7.0);
        assert_eq!(row, [1.0, 3.0]);
    }

    #[test]
    fn slope_is_derivative_in_x() {
        let expr = compile("a*exp(b*x)").unwrap();
        let model = Model::new(&expr, &names(&["a", "b"])).unwrap();
        let s = model.slope(1.0, &[2.0, 0.5]).unwrap();
        assert!((s - 0.5 * 2.0 * 0.5f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn predict_reports_domain_errors() {
        let expr = compile("a*ln(x)").unwrap();
        let model = Model::new(&expr, &names(&["a"])).unwrap();
        assert!(model.predict(-1.0, &[1.0]).is_err());
    }
}
