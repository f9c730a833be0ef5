//! Mathematical utilities: least squares kernels, special functions and
//! sample statistics.

pub mod ols;
pub mod special;
pub mod stats;

pub use ols::*;
pub use stats::*;
