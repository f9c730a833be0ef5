//! First-order propagation of independent uncertainties.
//!
//! For `f(v₁, …, vₙ)` with inputs `vᵢ ± σᵢ`:
//!
//! ```text
//! σ_f = sqrt( Σ (|∂f/∂vᵢ| · σᵢ)² )
//! ```
//!
//! Besides the number, the result carries the formula itself as an expression
//! over the inputs and their uncertainties (`sigma_<name>` unless that name is
//! already taken), so it can be rendered or re-evaluated.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::domain::{Bindings, Measurement};
use crate::error::PropagationError;
use crate::expr::diff::derive_into;
use crate::expr::{CompiledExpression, ExprBuilder, Function, evaluate};

/// Names of the symbols standing for the uncertainties of `variables`.
///
/// `sigma_<name>` by default. A name already used by the expression or by an
/// earlier variable gets a numeric suffix (`sigma_a_2`, `sigma_a_3`, ...).
pub fn sigma_symbols<S: AsRef<str>>(expr_symbols: &[String], variables: &[S]) -> Vec<String> {
    let mut taken: BTreeSet<String> = expr_symbols.iter().cloned().collect();
    variables
        .iter()
        .map(|v| {
            let base = format!("sigma_{}", v.as_ref());
            let mut name = base.clone();
            let mut n = 2;
            while taken.contains(&name) {
                name = format!("{base}_{n}");
                n += 1;
            }
            taken.insert(name.clone());
            name
        })
        .collect()
}

/// One input's share of the propagated uncertainty.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub variable: String,
    /// Symbol for `σ_v` in the result formula.
    pub sigma: String,
    /// Symbolic `∂f/∂v`.
    pub derivative: CompiledExpression,
    /// `∂f/∂v` at the central values.
    pub partial: f64,
    /// `|∂f/∂v| · σ_v`.
    pub term: f64,
}

#[derive(Debug, Clone)]
pub struct UncertaintyResult {
    pub value: f64,
    pub uncertainty: f64,
    /// `σ_f` as an expression over the inputs and each contribution's `sigma` symbol.
    pub formula: CompiledExpression,
    /// Sorted by variable name.
    pub contributions: Vec<Contribution>,
}

impl UncertaintyResult {
    /// `\sigma_{f} = …`
    pub fn latex(&self) -> String {
        format!("\\sigma_{{f}} = {}", self.formula.to_latex())
    }

    /// `σ_f / |f|`; `None` when the value is zero.
    pub fn relative_uncertainty(&self) -> Option<f64> {
        (self.value != 0.0).then(|| self.uncertainty / self.value.abs())
    }
}

/// Serializable view for reports and JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct UncertaintySummary {
    pub value: f64,
    pub uncertainty: f64,
    pub relative_uncertainty: Option<f64>,
    pub formula: String,
    pub latex: String,
    pub contributions: BTreeMap<String, f64>,
}

impl From<&UncertaintyResult> for UncertaintySummary {
    fn from(result: &UncertaintyResult) -> Self {
        Self {
            value: result.value,
            uncertainty: result.uncertainty,
            relative_uncertainty: result.relative_uncertainty(),
            formula: result.formula.to_string(),
            latex: result.latex(),
            contributions: result
                .contributions
                .iter()
                .map(|c| (c.variable.clone(), c.term))
                .collect(),
        }
    }
}

fn check_bindings<'a>(expr: &CompiledExpression, bindings: &'a Bindings) -> Result<Vec<(&'a str, Measurement)>, PropagationError> {
    expr.symbols()
        .iter()
        .map(|name| {
            let (key, m) = bindings
                .get_key_value(name)
                .ok_or_else(|| PropagationError::UndefinedVariable { name: name.clone() })?;
            if !(m.uncertainty.is_finite() && m.uncertainty >= 0.0) {
                return Err(PropagationError::InvalidUncertainty {
                    name: name.clone(),
                    value: m.uncertainty,
                });
            }
            Ok((key.as_str(), *m))
        })
        .collect()
}

/// Value and propagated uncertainty of `expr`.
///
/// Every free symbol of `expr`, including the independent variable if one
/// is designated, must be bound. Extra bindings are ignored.
pub fn propagate(expr: &CompiledExpression, bindings: &Bindings) -> Result<UncertaintyResult, PropagationError> {
    let inputs = check_bindings(expr, bindings)?;

    let scope: BTreeMap<String, f64> = inputs.iter().map(|(n, m)| (n.to_string(), m.value)).collect();
    let value = evaluate(expr, &scope)?;

    let names: Vec<&str> = inputs.iter().map(|(n, _)| *n).collect();
    let sigmas = sigma_symbols(expr.symbols(), &names);

    let mut builder = ExprBuilder::extend(expr);
    let mut roots = Vec::with_capacity(inputs.len());
    let mut squares = Vec::with_capacity(inputs.len());
    for (name, sigma_name) in names.iter().zip(&sigmas) {
        let d = derive_into(&mut builder, expr, name)?;
        roots.push(d);
        let magnitude = match builder.constant_value(d) {
            Some(v) if v == 0.0 => continue,
            Some(v) => builder.constant(v.abs()),
            None => builder.call(Function::Abs, d),
        };
        let sigma = builder.symbol(sigma_name);
        let term = builder.mul(magnitude, sigma);
        let two = builder.constant(2.0);
        squares.push(builder.pow(term, two));
    }

    let root = match squares.split_first() {
        None => builder.constant(0.0),
        Some((first, rest)) => {
            let sum = rest.iter().fold(*first, |acc, &sq| builder.add(acc, sq));
            builder.call(Function::Sqrt, sum)
        }
    };
    let formula = builder.finish(root, None);

    let mut contributions = Vec::with_capacity(inputs.len());
    let mut sum_sq = 0.0;
    for (((name, m), d), sigma) in inputs.iter().zip(roots).zip(sigmas) {
        let derivative = formula.rooted_at(d).with_independent(expr.independent());
        let partial = evaluate(&derivative, &scope)?;
        let term = partial.abs() * m.uncertainty;
        sum_sq += term * term;
        contributions.push(Contribution {
            variable: name.to_string(),
            sigma,
            derivative,
            partial,
            term,
        });
    }
    let uncertainty = sum_sq.sqrt();
    debug!(value, uncertainty, formula = %formula, "propagated");

    Ok(UncertaintyResult {
        value,
        uncertainty,
        formula,
        contributions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainReason;
    use crate::expr::Compiler;

    fn bind(pairs: &[(&str, f64, f64)]) -> Bindings {
        pairs
            .iter()
            .map(|&(n, v, s)| (n.to_string(), Measurement::new(v, s)))
            .collect()
    }

    fn compile(text: &str) -> CompiledExpression {
        Compiler::new().independent(None).compile(text).unwrap()
    }

    #[test]
    fn product_rule() {
        let result = propagate(&compile("a*b"), &bind(&[("a", 2.0, 0.1), ("b", 3.0, 0.2)])).unwrap();
        assert!((result.value - 6.0).abs() < 1e-12);
        assert!((result.uncertainty - 0.5).abs() < 1e-12);
        assert_eq!(result.contributions.len(), 2);
        assert!((result.contributions[0].term - 0.3).abs() < 1e-12);
        assert!((result.contributions[1].term - 0.4).abs() < 1e-12);
    }

    #[test]
    fn formula_evaluates_to_the_uncertainty() {
        let expr = compile("a^2 / b + sin(c)");
        let bindings = bind(&[("a", 1.5, 0.05), ("b", 4.0, 0.1), ("c", 0.3, 0.01)]);
        let result = propagate(&expr, &bindings).unwrap();

        let from_formula = evaluate(&result.formula, &formula_scope(&result, &bindings)).unwrap();
        assert!((from_formula - result.uncertainty).abs() < 1e-12);
    }

    fn formula_scope(result: &UncertaintyResult, bindings: &Bindings) -> BTreeMap<String, f64> {
        let mut scope: BTreeMap<String, f64> = bindings.iter().map(|(n, m)| (n.clone(), m.value)).collect();
        for c in &result.contributions {
            scope.insert(c.sigma.clone(), bindings[&c.variable].uncertainty);
        }
        scope
    }

    #[test]
    fn uncertainty_symbols_avoid_input_names() {
        let expr = compile("a*sigma_a");
        let bindings = bind(&[("a", 2.0, 0.1), ("sigma_a", 3.0, 0.2)]);
        let result = propagate(&expr, &bindings).unwrap();
        assert!((result.uncertainty - 0.5).abs() < 1e-12);

        let sigmas: Vec<&str> = result.contributions.iter().map(|c| c.sigma.as_str()).collect();
        assert_eq!(sigmas, vec!["sigma_a_2", "sigma_sigma_a"]);
        assert_eq!(
            result.formula.symbols(),
            &["a", "sigma_a", "sigma_a_2", "sigma_sigma_a"].map(String::from)
        );
        let from_formula = evaluate(&result.formula, &formula_scope(&result, &bindings)).unwrap();
        assert!((from_formula - result.uncertainty).abs() < 1e-12);
    }

    #[test]
    fn suffixes_skip_every_taken_name() {
        let symbols = ["x", "sigma_x", "sigma_x_2"].map(String::from);
        assert_eq!(sigma_symbols(&symbols, &["x", "y"]), vec!["sigma_x_3", "sigma_y"]);
    }

    #[test]
    fn latex_names_the_uncertainties() {
        let result = propagate(&compile("a*b"), &bind(&[("a", 2.0, 0.1), ("b", 3.0, 0.2)])).unwrap();
        let latex = result.latex();
        assert!(latex.starts_with("\\sigma_{f} = \\sqrt"));
        assert!(latex.contains("\\sigma_{a}"));
        assert!(latex.contains("\\sigma_{b}"));
    }

    #[test]
    fn missing_binding_is_reported() {
        let err = propagate(&compile("a*b"), &bind(&[("a", 2.0, 0.1)])).unwrap_err();
        assert_eq!(err, PropagationError::UndefinedVariable { name: "b".to_string() });
    }

    #[test]
    fn negative_uncertainty_is_rejected() {
        let err = propagate(&compile("a"), &bind(&[("a", 2.0, -0.1)])).unwrap_err();
        assert!(matches!(err, PropagationError::InvalidUncertainty { .. }));
    }

    #[test]
    fn log_of_negative_is_a_domain_error() {
        let err = propagate(&compile("log(x)"), &bind(&[("x", -1.0, 0.1)])).unwrap_err();
        match err {
            PropagationError::Domain(e) => assert_eq!(e.reason, DomainReason::LogOfNonPositive),
            other => panic!("expected domain error, got {other:?}"),
        }
    }

    #[test]
    fn constant_expression_has_zero_uncertainty() {
        let result = propagate(&compile("2*pi"), &Bindings::new()).unwrap();
        assert_eq!(result.uncertainty, 0.0);
        assert_eq!(result.formula.as_constant(), Some(0.0));
        assert_eq!(result.relative_uncertainty(), Some(0.0));
    }
}
