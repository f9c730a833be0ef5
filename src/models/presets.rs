//! Built-in model formulas.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::expr::{CompiledExpression, compile};

/// Named model shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelPreset {
    Linear,
    Exponential,
    Power,
    Logarithmic,
    /// Polynomial of degree N (`c0 + c1 x + ... + cN x^N`).
    Polynomial,
    Gaussian,
    Lorentzian,
    Sine,
    Logistic,
}

impl ModelPreset {
    pub const ALL: [ModelPreset; 9] = [
        ModelPreset::Linear,
        ModelPreset::Exponential,
        ModelPreset::Power,
        ModelPreset::Logarithmic,
        ModelPreset::Polynomial,
        ModelPreset::Gaussian,
        ModelPreset::Lorentzian,
        ModelPreset::Sine,
        ModelPreset::Logistic,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            ModelPreset::Linear => "Linear",
            ModelPreset::Exponential => "Exponential",
            ModelPreset::Power => "Power law",
            ModelPreset::Logarithmic => "Logarithmic",
            ModelPreset::Polynomial => "Polynomial",
            ModelPreset::Gaussian => "Gaussian",
            ModelPreset::Lorentzian => "Lorentzian",
            ModelPreset::Sine => "Sinusoidal",
            ModelPreset::Logistic => "Logistic",
        }
    }

    /// Formula text in `x`. `degree` is only used by [`ModelPreset::Polynomial`].
    pub fn formula(self, degree: usize) -> String {
        match self {
            ModelPreset::Linear => "a*x + b".to_string(),
            ModelPreset::Exponential => "a*exp(b*x)".to_string(),
            ModelPreset::Power => "a*x^b".to_string(),
            ModelPreset::Logarithmic => "a*ln(x) + b".to_string(),
            ModelPreset::Polynomial => polynomial(degree),
            ModelPreset::Gaussian => "a*exp(-((x - b)/c)^2)".to_string(),
            ModelPreset::Lorentzian => "a/((x - b)^2 + c^2)".to_string(),
            ModelPreset::Sine => "a*sin(b*x + c) + d".to_string(),
            ModelPreset::Logistic => "a/(1 + b*exp(-c*x))".to_string(),
        }
    }

    pub fn compile(self, degree: usize) -> Result<CompiledExpression, ParseError> {
        compile(&self.formula(degree))
    }
}

fn polynomial(degree: usize) -> String {
    (0..=degree)
        .map(|k| match k {
            0 => "c0".to_string(),
            1 => "c1*x".to_string(),
            _ => format!("c{k}*x^{k}"),
        })
        .collect::<Vec<_>>()
        .join(" + ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_compiles_with_parameters() {
        for preset in ModelPreset::ALL {
            let expr = preset.compile(3).unwrap();
            assert!(!expr.parameters().is_empty(), "{preset:?}");
            assert_eq!(expr.independent(), Some("x"));
        }
    }

    #[test]
    fn polynomial_has_degree_plus_one_parameters() {
        let expr = ModelPreset::Polynomial.compile(2).unwrap();
        assert_eq!(
            expr.parameters(),
            vec!["c0".to_string(), "c1".to_string(), "c2".to_string()]
        );
    }

    #[test]
    fn gaussian_parameters_are_sorted() {
        let expr = ModelPreset::Gaussian.compile(0).unwrap();
        assert_eq!(
            expr.parameters(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}
