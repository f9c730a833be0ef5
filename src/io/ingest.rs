//! Dataset ingest.
//!
//! Turns a delimited text file (or a JSON column file) into a validated
//! [`Dataset`].
//!
//! Text layout, one point per line:
//! - 4 columns: `x σx y σy`
//! - 3 columns: `x y σy` (exact x)
//! - 2 columns: `x y` (no uncertainties)
//!
//! The delimiter is sniffed from the first non-empty line (tab, then
//! semicolon, then comma). With a tab or semicolon delimiter, decimal commas
//! (`1,5`) are accepted. A first row that does not parse as numbers is a
//! header; its x and y captions become the axis labels.
//!
//! Bad rows are skipped and reported with their line number; the load only
//! fails when no valid row remains.

use std::fs;
use std::path::Path;

use csv::StringRecord;
use serde::Deserialize;

use crate::domain::{DataPoint, Dataset};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output: the dataset plus what happened while reading it.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub dataset: Dataset,
    pub delimiter: char,
    pub columns: usize,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Column layout of the JSON input format.
#[derive(Debug, Deserialize)]
struct JsonColumns {
    x: Vec<f64>,
    #[serde(default)]
    sigma_x: Option<Vec<f64>>,
    y: Vec<f64>,
    #[serde(default)]
    sigma_y: Option<Vec<f64>>,
    #[serde(default)]
    x_label: Option<String>,
    #[serde(default)]
    y_label: Option<String>,
}

/// Load a dataset file. `.json` files use the column format, anything else
/// is treated as delimited text.
pub fn load_dataset(path: &Path) -> Result<LoadedDataset, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read data file '{}': {e}", path.display())))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        parse_json_dataset(&text)
    } else {
        parse_dataset(&text)
    }
}

/// Parse the JSON column format: `{"x": [...], "sigma_x": [...], "y": [...], "sigma_y": [...]}`.
/// Missing sigma columns mean zero uncertainty.
pub fn parse_json_dataset(text: &str) -> Result<LoadedDataset, AppError> {
    let cols: JsonColumns =
        serde_json::from_str(text).map_err(|e| AppError::new(2, format!("Invalid JSON dataset: {e}")))?;
    let n = cols.x.len();
    let zeros = || vec![0.0; n];
    let dataset = Dataset::from_columns(
        &cols.x,
        &cols.sigma_x.unwrap_or_else(zeros),
        &cols.y,
        &cols.sigma_y.unwrap_or_else(zeros),
    )?
    .with_labels(cols.x_label, cols.y_label);

    if dataset.is_empty() {
        return Err(AppError::new(3, "Dataset has no points."));
    }
    Ok(LoadedDataset {
        dataset,
        delimiter: ',',
        columns: 4,
        row_errors: Vec::new(),
        rows_read: n,
    })
}

/// Parse delimited text.
pub fn parse_dataset(text: &str) -> Result<LoadedDataset, AppError> {
    // Excel likes to prepend a BOM.
    let text = text.trim_start_matches('\u{feff}');
    let delimiter = sniff_delimiter(text);
    let decimal_comma = delimiter != ',';

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(delimiter as u8)
        .from_reader(text.as_bytes());

    let mut points = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut columns: Option<usize> = None;
    let mut labels: (Option<String>, Option<String>) = (None, None);

    for (idx, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line: idx + 1,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        let line = record.position().map_or(idx + 1, |p| p.line() as usize);
        if record.iter().all(str::is_empty) {
            continue;
        }

        let numbers = parse_numbers(&record, decimal_comma);
        if columns.is_none() && numbers.is_err() {
            labels = header_labels(&record);
            continue;
        }
        rows_read += 1;

        let width = *columns.get_or_insert(record.len());
        if !matches!(width, 2..=4) {
            return Err(AppError::new(
                2,
                format!(
                    "Line {line}: expected 2 (x y), 3 (x y σy) or 4 (x σx y σy) columns separated by {}, found {width}.",
                    describe_delimiter(delimiter)
                ),
            ));
        }
        if record.len() != width {
            row_errors.push(RowError {
                line,
                message: format!("expected {width} columns, found {}", record.len()),
            });
            continue;
        }

        match numbers.and_then(|values| to_point(&values)) {
            Ok(point) => points.push(point),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if points.is_empty() {
        return Err(AppError::new(3, "No valid data rows found."));
    }

    let dataset = Dataset::new(points)?.with_labels(labels.0, labels.1);
    Ok(LoadedDataset {
        dataset,
        delimiter,
        columns: columns.unwrap_or(0),
        row_errors,
        rows_read,
    })
}

fn sniff_delimiter(text: &str) -> char {
    let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    ['\t', ';', ',']
        .into_iter()
        .find(|d| first.contains(*d))
        .unwrap_or(',')
}

fn describe_delimiter(d: char) -> &'static str {
    match d {
        '\t' => "tabs",
        ';' => "semicolons",
        _ => "commas",
    }
}

fn parse_numbers(record: &StringRecord, decimal_comma: bool) -> Result<Vec<f64>, String> {
    record
        .iter()
        .map(|field| {
            let normalized = if decimal_comma {
                field.replace(',', ".")
            } else {
                field.to_string()
            };
            let v = normalized
                .parse::<f64>()
                .map_err(|_| format!("'{field}' is not a number"))?;
            if v.is_finite() {
                Ok(v)
            } else {
                Err(format!("'{field}' is not finite"))
            }
        })
        .collect()
}

fn to_point(values: &[f64]) -> Result<DataPoint, String> {
    let point = match *values {
        [x, y] => DataPoint::new(x, 0.0, y, 0.0),
        [x, y, sy] => DataPoint::new(x, 0.0, y, sy),
        [x, sx, y, sy] => DataPoint::new(x, sx, y, sy),
        _ => return Err(format!("unsupported column count {}", values.len())),
    };
    if point.sigma_x < 0.0 || point.sigma_y < 0.0 {
        return Err("uncertainties must be non-negative".to_string());
    }
    Ok(point)
}

fn header_labels(record: &StringRecord) -> (Option<String>, Option<String>) {
    let label = |i: usize| record.get(i).filter(|s| !s.is_empty()).map(str::to_string);
    match record.len() {
        4 => (label(0), label(2)),
        _ => (label(0), label(1)),
    }
}
