//! Shared "fit pipeline" used by the `fit` subcommand.
//!
//! Keeping this in one place avoids mixing the workflow with presentation:
//! load data -> compile model -> build guess/config -> background fit -> residuals
//!
//! `app.rs` then only decides what to print and what to export.

use std::fs;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::cli::FitArgs;
use crate::domain::{FitConfig, FitResult, ParameterVector};
use crate::error::AppError;
use crate::expr::{CompiledExpression, Compiler};
use crate::fit::spawn_fit;
use crate::io::{LoadedDataset, load_dataset};
use crate::report::{Residual, compute_residuals};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// All computed outputs of a single `ufit fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub loaded: LoadedDataset,
    pub expr: CompiledExpression,
    pub config: FitConfig,
    pub result: FitResult,
    pub residuals: Vec<Residual>,
}

/// Execute the full fitting pipeline and return the computed outputs.
pub fn run_fit(args: &FitArgs) -> Result<RunOutput, AppError> {
    // 1) Load and report skipped rows.
    let loaded = load_dataset(&args.data)?;
    for e in &loaded.row_errors {
        warn!(line = e.line, "skipped row: {}", e.message);
    }
    info!(
        points = loaded.dataset.len(),
        columns = loaded.columns,
        skipped = loaded.row_errors.len(),
        "dataset loaded"
    );

    // 2) Model, guess and options.
    let expr = compile_model(args)?;
    let guess = initial_guess(&expr, &args.guess)?;
    let config = fit_config_from_args(args)?;

    // 3) Fit in the background so progress can be shown.
    let handle = spawn_fit(&loaded.dataset, &expr, guess, args.algorithm, config.clone())?;
    while !handle.is_finished() {
        thread::sleep(POLL_INTERVAL);
        if let Some(last) = handle.progress().drain().into_iter().last() {
            if !args.quiet {
                eprint!("\r  iteration {:>6}  residual {:.6e}", last.iteration, last.residual_norm);
            }
        }
    }
    if !args.quiet {
        eprintln!();
    }
    let result = handle.join()?;

    // 4) Residuals.
    let residuals = compute_residuals(&expr, &loaded.dataset, &result);

    Ok(RunOutput {
        loaded,
        expr,
        config,
        result,
        residuals,
    })
}

/// Compile `--model` or the chosen preset.
pub fn compile_model(args: &FitArgs) -> Result<CompiledExpression, AppError> {
    match (&args.model, args.preset) {
        (Some(text), _) => Ok(Compiler::new().independent(Some(&args.independent)).compile(text)?),
        (None, Some(preset)) => Ok(preset.compile(args.degree)?),
        (None, None) => Err(AppError::new(2, "Either --model or --preset is required.")),
    }
}

/// Every model parameter starts at 1 unless overridden.
pub fn initial_guess(expr: &CompiledExpression, overrides: &[(String, f64)]) -> Result<ParameterVector, AppError> {
    let names = expr.parameters();
    let mut guess = ParameterVector::uniform(&names, 1.0);
    for (name, value) in overrides {
        if !names.contains(name) {
            return Err(AppError::new(
                2,
                format!("--guess names '{name}', which is not a model parameter (parameters: {}).", names.join(", ")),
            ));
        }
        guess.set(name.clone(), *value);
    }
    Ok(guess)
}

/// Options from `--config` (if any) with individual flags applied on top.
pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| AppError::new(2, format!("Failed to read config '{}': {e}", path.display())))?;
            serde_json::from_str(&text).map_err(|e| AppError::new(2, format!("Invalid fit config: {e}")))?
        }
        None => FitConfig::default(),
    };

    if let Some(v) = args.max_iterations {
        config.max_iterations = v;
    }
    if let Some(v) = args.tolerance {
        config.convergence_tolerance = v;
    }
    if let Some(v) = args.confidence {
        config.confidence_level = v;
    }
    if let Some(v) = args.resamples {
        config.resample_count = v;
    }
    if let Some(v) = args.samples {
        config.posterior_samples = v;
    }
    if let Some(v) = args.burn_in {
        config.burn_in = v;
    }
    if let Some(v) = args.seed {
        config.seed = v;
    }
    if let Some(v) = args.workers {
        config.workers = v;
    }
    Ok(config)
}
