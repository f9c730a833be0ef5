//! Error types.
//!
//! The engine reports failures through typed enums so callers can tell a
//! malformed formula from a numeric domain problem or a fit that did not
//! converge. The `ufit` binary flattens all of them into [`AppError`], which
//! carries a process exit code.

use thiserror::Error;

use crate::domain::{FitResult, ParameterVector};

/// Failure to turn formula text into an expression tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expression is empty")]
    Empty,

    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedCharacter { ch: char, position: usize },

    #[error("invalid number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },

    #[error("unbalanced parentheses at position {position}")]
    UnbalancedParentheses { position: usize },

    #[error("unexpected '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown identifier '{name}' at position {position}")]
    UnknownIdentifier { name: String, position: usize },

    #[error("unknown function '{name}' at position {position}")]
    UnknownFunction { name: String, position: usize },

    #[error("function '{name}' at position {position} requires a parenthesized argument")]
    MissingArgument { name: String, position: usize },
}

/// Why a numeric evaluation is undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainReason {
    DivisionByZero,
    LogOfNonPositive,
    SqrtOfNegative,
    NegativeBaseFractionalExponent,
    OutsideFunctionDomain,
    Pole,
    Overflow,
    NotANumber,
    UnboundSymbol,
}

impl DomainReason {
    pub fn describe(self) -> &'static str {
        match self {
            DomainReason::DivisionByZero => "division by zero",
            DomainReason::LogOfNonPositive => "logarithm of a non-positive value",
            DomainReason::SqrtOfNegative => "square root of a negative value",
            DomainReason::NegativeBaseFractionalExponent => {
                "negative base raised to a non-integer power"
            }
            DomainReason::OutsideFunctionDomain => "argument outside the function domain",
            DomainReason::Pole => "pole of the function",
            DomainReason::Overflow => "overflow",
            DomainReason::NotANumber => "result is not a number",
            DomainReason::UnboundSymbol => "symbol has no value",
        }
    }
}

/// Numeric evaluation failed at a specific sub-expression.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} in `{expression}`", reason.describe())]
pub struct DomainError {
    /// Infix rendering of the offending sub-expression.
    pub expression: String,
    pub reason: DomainReason,
}

/// A node type has no derivative rule.
///
/// The supported function set always differentiates once; only derivatives of
/// internal helper functions (e.g. `trigamma`) can hit this.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("no derivative rule for '{function}'")]
pub struct DifferentiationError {
    pub function: &'static str,
}

/// A dataset record violates the input contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasetError {
    #[error("row {index}: non-finite value")]
    NonFinite { index: usize },

    #[error("row {index}: uncertainties must be non-negative")]
    NegativeUncertainty { index: usize },

    #[error("columns have different lengths")]
    ColumnLengthMismatch,
}

/// Terminal failure of a fit invocation.
#[derive(Debug, Clone, Error)]
pub enum FitError {
    #[error("invalid fit configuration: {0}")]
    InvalidConfig(String),

    #[error("insufficient data: {points} usable points for {parameters} parameters (need at least {})", parameters + 1)]
    InsufficientData { points: usize, parameters: usize },

    #[error("initial guess does not match model parameters (missing: {missing:?}, unexpected: {unexpected:?})")]
    ParameterMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("fit did not converge after {iterations} iterations (residual norm {last_residual_norm:.6e})")]
    NonConvergence {
        iterations: usize,
        last_residual_norm: f64,
        last_parameters: ParameterVector,
    },

    /// Cooperative cancellation. Bootstrap attaches the aggregate of the
    /// resamples that finished before the token was observed.
    #[error("fit cancelled")]
    Cancelled { partial: Option<Box<FitResult>> },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Differentiation(#[from] DifferentiationError),

    #[error("degenerate fit: {0}")]
    Degenerate(String),

    #[error("fit worker failed: {0}")]
    Worker(String),
}

impl FitError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FitError::Cancelled { .. })
    }
}

/// Failure of an uncertainty propagation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropagationError {
    #[error("variable '{name}' appears in the expression but has no value")]
    UndefinedVariable { name: String },

    #[error("uncertainty of '{name}' must be finite and non-negative (got {value})")]
    InvalidUncertainty { name: String, value: f64 },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Differentiation(#[from] DifferentiationError),
}

/// Error surfaced by the `ufit` binary, with the exit code it maps to.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        AppError::new(2, format!("Invalid formula: {err}"))
    }
}

impl From<DatasetError> for AppError {
    fn from(err: DatasetError) -> Self {
        AppError::new(2, format!("Invalid dataset: {err}"))
    }
}

impl From<DifferentiationError> for AppError {
    fn from(err: DifferentiationError) -> Self {
        AppError::new(4, format!("Differentiation failed: {err}"))
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let code = match &err {
            FitError::ParameterMismatch { .. } | FitError::InvalidConfig(_) => 2,
            FitError::InsufficientData { .. } => 3,
            FitError::Cancelled { .. } => 130,
            _ => 4,
        };
        AppError::new(code, format!("Fit failed: {err}"))
    }
}

impl From<PropagationError> for AppError {
    fn from(err: PropagationError) -> Self {
        let code = match &err {
            PropagationError::UndefinedVariable { .. }
            | PropagationError::InvalidUncertainty { .. } => 2,
            _ => 4,
        };
        AppError::new(code, format!("Propagation failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_names_expression_and_reason() {
        let err = DomainError {
            expression: "log(x)".to_string(),
            reason: DomainReason::LogOfNonPositive,
        };
        assert_eq!(err.to_string(), "logarithm of a non-positive value in `log(x)`");
    }

    #[test]
    fn fit_errors_map_to_exit_codes() {
        let err: AppError = FitError::InsufficientData {
            points: 1,
            parameters: 2,
        }
        .into();
        assert_eq!(err.exit_code(), 3);

        let err: AppError = FitError::Cancelled { partial: None }.into();
        assert_eq!(err.exit_code(), 130);
    }
}
