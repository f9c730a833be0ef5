//! Command-line parsing for `ufit`.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! engine. Value parsers for `name=value` style options live here too.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{Algorithm, Measurement};
use crate::models::ModelPreset;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "ufit", version, about = "Curve fitting and uncertainty propagation")]
pub struct Cli {
    /// Log at debug level (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a model to a dataset and print parameters and statistics.
    Fit(FitArgs),
    /// Propagate input uncertainties through a formula.
    Propagate(PropagateArgs),
    /// Differentiate a formula symbolically.
    Derive(DeriveArgs),
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Data file: `x σx y σy` columns (tab, comma or semicolon separated) or JSON.
    #[arg(long, value_name = "FILE")]
    pub data: PathBuf,

    /// Model formula, e.g. `a*exp(-b*x) + c`.
    #[arg(long, conflicts_with = "preset", required_unless_present = "preset")]
    pub model: Option<String>,

    /// Predefined model.
    #[arg(long, value_enum)]
    pub preset: Option<ModelPreset>,

    /// Degree of the polynomial preset.
    #[arg(long, default_value_t = 2)]
    pub degree: usize,

    /// Name of the independent variable in `--model`.
    #[arg(long, default_value = "x")]
    pub independent: String,

    /// Fitting algorithm.
    #[arg(long, value_enum, default_value_t = Algorithm::Ols)]
    pub algorithm: Algorithm,

    /// Initial guesses, e.g. `a=1,b=0.5`. Unlisted parameters start at 1.
    #[arg(long, value_delimiter = ',', value_parser = parse_assignment)]
    pub guess: Vec<(String, f64)>,

    /// Fit options as JSON (`FitConfig` fields); flags below override it.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub max_iterations: Option<usize>,

    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Coverage of Bootstrap/Bayesian intervals.
    #[arg(long)]
    pub confidence: Option<f64>,

    /// Bootstrap resamples.
    #[arg(long)]
    pub resamples: Option<usize>,

    /// Retained posterior draws (Bayesian).
    #[arg(long)]
    pub samples: Option<usize>,

    /// Discarded warm-up draws (Bayesian).
    #[arg(long)]
    pub burn_in: Option<usize>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Bootstrap worker threads (0 = all cores).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Print the per-point residual table.
    #[arg(long)]
    pub residuals: bool,

    /// Do not print progress while fitting.
    #[arg(long)]
    pub quiet: bool,

    /// Export the fit (parameters, covariance, fitted grid) to JSON.
    #[arg(long = "export-json", value_name = "PATH")]
    pub export_json: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct PropagateArgs {
    /// Formula in the measured quantities, e.g. `m*g*h`.
    #[arg(long)]
    pub formula: String,

    /// Measured input `name=value:sigma` (repeatable).
    #[arg(long = "var", value_name = "NAME=VALUE:SIGMA", value_parser = parse_measurement)]
    pub vars: Vec<(String, Measurement)>,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct DeriveArgs {
    #[arg(long)]
    pub formula: String,

    /// Symbol to differentiate with respect to.
    #[arg(long, default_value = "x")]
    pub wrt: String,
}

fn split_assignment(s: &str) -> Result<(&str, &str), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{s}'"));
    }
    Ok((name, value.trim()))
}

fn parse_number(s: &str) -> Result<f64, String> {
    let v: f64 = s.trim().parse().map_err(|_| format!("'{s}' is not a number"))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("'{s}' is not finite"))
    }
}

/// `a=1.5`
pub fn parse_assignment(s: &str) -> Result<(String, f64), String> {
    let (name, value) = split_assignment(s)?;
    Ok((name.to_string(), parse_number(value)?))
}

/// `a=2:0.1`, `a=2±0.1` or `a=2+-0.1`. A bare value means σ = 0.
pub fn parse_measurement(s: &str) -> Result<(String, Measurement), String> {
    let (name, rest) = split_assignment(s)?;
    let (value, sigma) = match rest.split_once(':').or_else(|| rest.split_once('±')).or_else(|| rest.split_once("+-")) {
        Some((v, u)) => (parse_number(v)?, parse_number(u)?),
        None => (parse_number(rest)?, 0.0),
    };
    if sigma < 0.0 {
        return Err(format!("uncertainty of '{name}' must be non-negative"));
    }
    Ok((name.to_string(), Measurement::new(value, sigma)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn measurement_forms() {
        assert_eq!(parse_measurement("a=2:0.1").unwrap(), ("a".to_string(), Measurement::new(2.0, 0.1)));
        assert_eq!(parse_measurement("b = 3±0.2").unwrap().1, Measurement::new(3.0, 0.2));
        assert_eq!(parse_measurement("c=1e3+-5").unwrap().1, Measurement::new(1000.0, 5.0));
        assert_eq!(parse_measurement("d=4").unwrap().1, Measurement::new(4.0, 0.0));
        assert!(parse_measurement("e=1:-1").is_err());
        assert!(parse_measurement("=1").is_err());
    }

    #[test]
    fn fit_arguments_parse() {
        let cli = Cli::parse_from([
            "ufit", "fit", "--data", "d.tsv", "--preset", "exponential", "--algorithm", "bootstrap", "--guess",
            "a=2,b=-0.5",
        ]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.preset, Some(ModelPreset::Exponential));
        assert_eq!(args.algorithm, Algorithm::Bootstrap);
        assert_eq!(args.guess, vec![("a".to_string(), 2.0), ("b".to_string(), -0.5)]);
    }

    #[test]
    fn model_and_preset_conflict() {
        let err = Cli::try_parse_from(["ufit", "fit", "--data", "d", "--model", "a*x", "--preset", "linear"]);
        assert!(err.is_err());
    }
}
