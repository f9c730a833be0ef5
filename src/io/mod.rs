//! Input/output helpers.
//!
//! - dataset ingest: delimited text or JSON columns (`ingest`)
//! - fit result export to JSON (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
