//! Fit models.
//!
//! A model is any compiled formula in the independent variable; presets cover
//! the common shapes. [`Model`] wraps a formula with its symbolic Jacobian so
//! the fitting backends can stay generic.

pub mod model;
pub mod presets;

pub use model::*;
pub use presets::*;
