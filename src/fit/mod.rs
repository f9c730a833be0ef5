//! Curve fitting.
//!
//! Responsibilities:
//!
//! - validate the call and screen points at the initial guess (`orchestrator`)
//! - run one of five backends behind [`AlgorithmBackend`]
//! - aggregate parameters, covariance and goodness of fit into a
//!   [`FitResult`](crate::domain::FitResult)
//! - run fits in the background with cancellation and progress (`worker`)

pub mod backend;
pub mod bayesian;
pub mod bootstrap;
pub mod context;
mod lm;
mod objective;
pub mod odr;
pub mod ols;
pub mod orchestrator;
pub mod robust;
pub mod worker;

pub use backend::{AlgorithmBackend, BackendOutput, FitProblem};
pub use context::{CancelToken, FitContext, NoProgress, ProgressQueue, ProgressSink, ProgressSnapshot};
pub use orchestrator::{fit, fit_with_context};
pub use worker::{FitHandle, spawn_fit};
