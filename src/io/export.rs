//! JSON export of fit results.
//!
//! A fit file is the portable record of one fit:
//! - the model formula (infix and LaTeX) and the algorithm used
//! - the full [`FitResult`] (parameters, covariance, statistics)
//! - a fitted grid over the data range for quick plotting

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, FitResult};
use crate::error::AppError;
use crate::expr::{CompiledExpression, evaluate};

const GRID_POINTS: usize = 101;

/// Fitted curve sampled on an even grid. `y` is `None` where the model is
/// undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitGrid {
    pub x: Vec<f64>,
    pub y: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitFile {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub formula: String,
    pub latex: String,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub result: FitResult,
    pub grid: FitGrid,
}

impl FitFile {
    pub fn new(expr: &CompiledExpression, dataset: &Dataset, result: &FitResult) -> Self {
        let (lo, hi) = dataset.x_range().unwrap_or((0.0, 1.0));
        Self {
            tool: "ufit".to_string(),
            generated_at: Utc::now(),
            formula: expr.to_string(),
            latex: expr.to_latex(),
            x_label: dataset.x_label.clone(),
            y_label: dataset.y_label.clone(),
            result: result.clone(),
            grid: build_grid(expr, result, lo, hi, GRID_POINTS),
        }
    }
}

/// Write a fit JSON file.
pub fn write_fit_json(path: &Path, file: &FitFile) -> Result<(), AppError> {
    let out = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create fit JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(out, file).map_err(|e| AppError::new(2, format!("Failed to write fit JSON: {e}")))
}

/// Read a fit JSON file.
pub fn read_fit_json(path: &Path) -> Result<FitFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open fit JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid fit JSON: {e}")))
}

fn build_grid(expr: &CompiledExpression, result: &FitResult, x_min: f64, x_max: f64, n: usize) -> FitGrid {
    let n = n.max(2);
    let (mut x0, mut x1) = (x_min, x_max);
    if !(x0.is_finite() && x1.is_finite()) || x1 < x0 {
        x0 = 0.0;
        x1 = 1.0;
    }
    if (x1 - x0).abs() < 1e-12 {
        x0 -= 0.5;
        x1 += 0.5;
    }

    let independent = expr.independent().unwrap_or("x");
    let mut scope: Vec<(&str, f64)> = result.parameters.iter().collect();
    scope.push((independent, 0.0));
    let slot = scope.len() - 1;

    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    for i in 0..n {
        let u = i as f64 / (n as f64 - 1.0);
        let x = x0 + u * (x1 - x0);
        scope[slot].1 = x;
        xs.push(x);
        ys.push(evaluate(expr, scope.as_slice()).ok());
    }
    FitGrid { x: xs, y: ys }
}
