//! Domain types used throughout the engine.
//!
//! This module defines:
//!
//! - experimental records (`DataPoint`, `Dataset`)
//! - fit inputs (`ParameterVector`, `Algorithm`, `FitConfig`, `Prior`)
//! - fit and propagation outputs (`FitResult`, `ParameterInterval`, `Measurement`)

pub mod types;

pub use types::*;
