//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - runs fits, propagations and derivatives
//! - prints reports
//! - writes optional exports

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, DeriveArgs, FitArgs, PropagateArgs};
use crate::domain::Bindings;
use crate::error::AppError;
use crate::expr::{Compiler, differentiate};
use crate::io::{FitFile, write_fit_json};
use crate::propagate::{UncertaintySummary, propagate};
use crate::report::{format_derivative, format_fit_report, format_propagation, format_residuals};

pub mod pipeline;

/// Entry point for the `ufit` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Propagate(args) => handle_propagate(args),
        Command::Derive(args) => handle_derive(args),
    }
}

/// Log to stderr. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let run = pipeline::run_fit(&args)?;

    println!(
        "{}",
        format_fit_report(&run.expr, &run.loaded.dataset, &run.result, run.config.confidence_level)
    );
    if args.residuals {
        println!("{}", format_residuals(&run.residuals));
    }

    if let Some(path) = &args.export_json {
        write_fit_json(path, &FitFile::new(&run.expr, &run.loaded.dataset, &run.result))?;
        debug!(path = %path.display(), "fit exported");
    }
    Ok(())
}

fn handle_propagate(args: PropagateArgs) -> Result<(), AppError> {
    let bindings: Bindings = args.vars.into_iter().collect();
    let expr = Compiler::new()
        .independent(None)
        .declared(bindings.keys().cloned())
        .compile(&args.formula)?;
    let result = propagate(&expr, &bindings)?;

    if args.json {
        let summary = UncertaintySummary::from(&result);
        let text = serde_json::to_string_pretty(&summary)
            .map_err(|e| AppError::new(4, format!("Failed to serialize result: {e}")))?;
        println!("{text}");
    } else {
        println!("{}", format_propagation(&expr, &result));
    }
    Ok(())
}

fn handle_derive(args: DeriveArgs) -> Result<(), AppError> {
    let expr = Compiler::new().independent(Some(&args.wrt)).compile(&args.formula)?;
    let derivative = differentiate(&expr, &args.wrt)?;
    println!("{}", format_derivative(&expr, &args.wrt, &derivative));
    Ok(())
}
