//! Fit entry points: validation, point screening, dispatch and aggregation.

use std::time::Instant;

use tracing::{info, warn};

use crate::domain::{Algorithm, DataPoint, Dataset, FitConfig, FitResult, ParameterVector};
use crate::error::FitError;
use crate::expr::CompiledExpression;
use crate::fit::backend::{BackendOutput, FitProblem};
use crate::fit::context::{CancelToken, FitContext, NoProgress};
use crate::fit::objective::{chi_square, r_squared};
use crate::math::correlation_from_covariance;
use crate::models::Model;

/// Fit `expr` to `dataset` on the calling thread.
///
/// The guess must name exactly the free symbols of `expr` other than the
/// independent variable; its order fixes the order of the reported
/// parameters.
pub fn fit(
    dataset: &Dataset,
    expr: &CompiledExpression,
    guess: &ParameterVector,
    algorithm: Algorithm,
    config: &FitConfig,
) -> Result<FitResult, FitError> {
    let token = CancelToken::new();
    fit_with_context(dataset, expr, guess, algorithm, config, &FitContext::new(&token, &NoProgress))
}

/// [`fit`] with caller-provided cancellation and progress.
pub fn fit_with_context(
    dataset: &Dataset,
    expr: &CompiledExpression,
    guess: &ParameterVector,
    algorithm: Algorithm,
    config: &FitConfig,
    ctx: &FitContext<'_>,
) -> Result<FitResult, FitError> {
    config.validate().map_err(FitError::InvalidConfig)?;
    check_guess(expr, guess)?;

    let names = guess.names();
    if let Some(unknown) = config
        .prior
        .iter()
        .flat_map(|spec| spec.keys())
        .find(|name| !names.contains(*name))
    {
        return Err(FitError::InvalidConfig(format!(
            "prior given for unknown parameter '{unknown}'"
        )));
    }

    let p = names.len();
    if p == 0 {
        return Err(FitError::Degenerate("model has no free parameters".to_string()));
    }
    if dataset.len() < p + 1 {
        return Err(FitError::InsufficientData {
            points: dataset.len(),
            parameters: p,
        });
    }

    let model = Model::new(expr, &names)?;
    let initial = guess.values();
    let points = usable_points(&model, dataset.points(), &initial);
    let excluded = dataset.len() - points.len();
    if points.len() < p + 1 {
        return Err(FitError::InsufficientData {
            points: points.len(),
            parameters: p,
        });
    }

    info!(
        algorithm = algorithm.display_name(),
        points = points.len(),
        excluded,
        parameters = p,
        "fit started"
    );
    let started = Instant::now();

    let problem = FitProblem {
        model: &model,
        points: &points,
    };
    let output = algorithm.backend().run(&problem, &initial, config, ctx)?;
    let cancelled = output.cancelled;
    let result = assemble(algorithm, &problem, output, excluded)?;

    info!(
        algorithm = algorithm.display_name(),
        chi_square = result.chi_square,
        reduced_chi_square = result.reduced_chi_square,
        iterations = result.iterations,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "fit finished"
    );

    if cancelled {
        return Err(FitError::Cancelled {
            partial: Some(Box::new(result)),
        });
    }
    Ok(result)
}

fn check_guess(expr: &CompiledExpression, guess: &ParameterVector) -> Result<(), FitError> {
    let expected = expr.parameters();
    let given = guess.names();
    let missing: Vec<String> = expected.iter().filter(|n| !given.contains(*n)).cloned().collect();
    let mut unexpected: Vec<String> = given.iter().filter(|n| !expected.contains(*n)).cloned().collect();
    unexpected.sort();
    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(FitError::ParameterMismatch { missing, unexpected })
    }
}

/// Points where the model, its Jacobian row and (for uncertain x) its slope
/// are all defined at the initial guess.
fn usable_points(model: &Model, points: &[DataPoint], initial: &[f64]) -> Vec<DataPoint> {
    let mut row = vec![0.0; model.parameter_count()];
    points
        .iter()
        .enumerate()
        .filter(|(index, p)| {
            let check = model.fill_gradient_row(p.x, initial, &mut row).and_then(|_| {
                if p.sigma_x > 0.0 {
                    model.slope(p.x, initial).map(|_| ())
                } else {
                    Ok(())
                }
            });
            match check {
                Ok(()) => true,
                Err(e) => {
                    warn!(index, x = p.x, error = %e, "excluding point");
                    false
                }
            }
        })
        .map(|(_, p)| *p)
        .collect()
}

fn assemble(
    algorithm: Algorithm,
    problem: &FitProblem<'_>,
    output: BackendOutput,
    excluded: usize,
) -> Result<FitResult, FitError> {
    let params = output.parameters;
    if params.iter().any(|v| !v.is_finite()) {
        return Err(FitError::Degenerate("non-finite parameter estimate".to_string()));
    }

    let chi2 = match output.objective {
        Some(objective) => objective,
        None => chi_square(problem.model, problem.points, &params)?,
    };
    let dof = problem.degrees_of_freedom();
    let reduced = if dof > 0 { chi2 / dof as f64 } else { f64::NAN };
    let r2 = r_squared(problem.model, problem.points, &params)?;

    let p = params.len();
    let covariance: Vec<Vec<f64>> = (0..p)
        .map(|i| (0..p).map(|j| output.covariance[(i, j)]).collect())
        .collect();
    if covariance.iter().flatten().any(|v| !v.is_finite()) {
        return Err(FitError::Degenerate("covariance is not finite".to_string()));
    }
    let uncertainties = (0..p).map(|i| covariance[i][i].max(0.0).sqrt()).collect();
    let correlation = correlation_from_covariance(&covariance);

    Ok(FitResult {
        algorithm,
        parameters: ParameterVector::from_names_values(problem.parameter_names(), &params),
        uncertainties,
        covariance,
        correlation,
        chi_square: chi2,
        reduced_chi_square: reduced,
        degrees_of_freedom: dof,
        r_squared: r2,
        iterations: output.iterations,
        points_used: problem.points.len(),
        points_excluded: excluded,
        intervals: output.intervals,
        resamples: output.resamples,
        acceptance_rate: output.acceptance_rate,
    })
}
