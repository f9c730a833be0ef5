//! `uncertain-fit` library crate.
//!
//! The binary (`ufit`) is a thin wrapper around this library so that:
//!
//! - the engine is testable without spawning processes
//! - front-ends other than the CLI can drive fits and propagations
//! - code stays easy to navigate as the project grows
//!
//! The engine entry points are re-exported here: [`compile`] a formula,
//! [`fit`] it to a [`Dataset`] (or [`spawn_fit`] it in the background), and
//! [`propagate`] measurement uncertainties through it.

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod expr;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod propagate;
pub mod report;

pub use domain::{
    Algorithm, Bindings, DataPoint, Dataset, FitConfig, FitResult, Measurement, ParameterInterval, ParameterVector,
    Prior, PriorSpec,
};
pub use error::{DomainError, DomainReason, FitError, ParseError, PropagationError};
pub use expr::{CompiledExpression, Compiler, compile, differentiate, evaluate};
pub use fit::{CancelToken, FitContext, FitHandle, ProgressQueue, ProgressSnapshot, fit, fit_with_context, spawn_fit};
pub use propagate::{UncertaintyResult, propagate};
