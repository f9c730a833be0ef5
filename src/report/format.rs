//! Terminal formatting for fits, propagations and derivatives.

use crate::domain::{Dataset, FitResult};
use crate::expr::CompiledExpression;
use crate::propagate::UncertaintyResult;
use crate::report::Residual;

/// Format the fit summary: model, parameters, statistics, correlations.
pub fn format_fit_report(
    expr: &CompiledExpression,
    dataset: &Dataset,
    result: &FitResult,
    confidence_level: f64,
) -> String {
    let mut out = String::new();

    out.push_str("=== ufit - Curve Fit ===\n");
    out.push_str(&format!("Model: y = {expr}\n"));
    out.push_str(&format!("LaTeX: y = {}\n", expr.to_latex()));
    out.push_str(&format!("Algorithm: {}\n", result.algorithm.display_name()));
    if let Some((lo, hi)) = dataset.x_range() {
        out.push_str(&format!(
            "Points: n={} used={} excluded={} | x=[{}, {}]\n",
            dataset.len(),
            result.points_used,
            result.points_excluded,
            fmt_num(lo),
            fmt_num(hi),
        ));
    }
    if dataset.x_label.is_some() || dataset.y_label.is_some() {
        out.push_str(&format!(
            "Axes: {} vs {}\n",
            dataset.y_label.as_deref().unwrap_or("y"),
            dataset.x_label.as_deref().unwrap_or("x"),
        ));
    }

    out.push_str("\nParameters:\n");
    let intervals = result.intervals.as_deref();
    let header = match intervals {
        Some(_) => format!(
            "{:<12} {:>14} {:>14} {:>30}",
            "name",
            "value",
            "std.err",
            format!("{:.0}% interval", confidence_level * 100.0)
        ),
        None => format!("{:<12} {:>14} {:>14}", "name", "value", "std.err"),
    };
    out.push_str(header.trim_end());
    out.push('\n');
    for (i, (name, value)) in result.parameters.iter().enumerate() {
        let sigma = result.uncertainties.get(i).copied().unwrap_or(f64::NAN);
        let mut line = format!("{:<12} {:>14} {:>14}", truncate(name, 12), fmt_num(value), fmt_num(sigma));
        if let Some(iv) = intervals.and_then(|ivs| ivs.get(i)) {
            line.push_str(&format!(" {:>30}", format!("[{}, {}]", fmt_num(iv.lower), fmt_num(iv.upper))));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }

    out.push_str("\nStatistics:\n");
    out.push_str(&format!("- chi^2         : {}\n", fmt_num(result.chi_square)));
    out.push_str(&format!(
        "- reduced chi^2 : {} (dof={})\n",
        fmt_num(result.reduced_chi_square),
        result.degrees_of_freedom
    ));
    match result.r_squared {
        Some(r2) => out.push_str(&format!("- R^2           : {r2:.6}\n")),
        None => out.push_str("- R^2           : n/a\n"),
    }
    out.push_str(&format!("- iterations    : {}\n", result.iterations));
    if let Some(n) = result.resamples {
        out.push_str(&format!("- resamples     : {n}\n"));
    }
    if let Some(rate) = result.acceptance_rate {
        out.push_str(&format!("- acceptance    : {:.1}%\n", rate * 100.0));
    }

    if result.parameters.len() > 1 {
        out.push_str("\nCorrelation:\n");
        out.push_str(&format_correlation(result));
    }

    out
}

fn format_correlation(result: &FitResult) -> String {
    let names = result.parameters.names();
    let mut out = String::new();

    let mut header = format!("{:<12}", "");
    for n in &names {
        header.push_str(&format!(" {:>9}", truncate(n, 9)));
    }
    out.push_str(header.trim_end());
    out.push('\n');

    for (name, row) in names.iter().zip(&result.correlation) {
        let mut line = format!("{:<12}", truncate(name, 12));
        for v in row {
            line.push_str(&format!(" {v:>9.4}"));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Format the per-point residual table.
pub fn format_residuals(rows: &[Residual]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:>12} {:>12} {:>12} {:>12} {:>10}\n",
            "x", "y", "y_fit", "residual", "resid/σy"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<12} {:-<12} {:-<12} {:-<12} {:-<10}\n", "", "", "", "", "").trim_end());
    out.push('\n');

    for r in rows {
        let normalized = r.normalized.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
        out.push_str(
            format!(
                "{:>12} {:>12} {:>12} {:>12} {:>10}\n",
                fmt_num(r.x),
                fmt_num(r.y),
                fmt_num(r.y_fit),
                fmt_num(r.residual),
                normalized,
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Format a propagated uncertainty with the per-input breakdown.
pub fn format_propagation(expr: &CompiledExpression, result: &UncertaintyResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("f = {expr}\n"));
    out.push_str(&format!("f = {} ± {}", fmt_num(result.value), fmt_num(result.uncertainty)));
    if let Some(rel) = result.relative_uncertainty() {
        out.push_str(&format!(" ({:.3}%)", rel * 100.0));
    }
    out.push('\n');
    out.push_str(&format!("sigma_f = {}\n", result.formula));
    out.push_str(&format!("LaTeX: {}\n", result.latex()));

    if !result.contributions.is_empty() {
        out.push('\n');
        out.push_str(format!("{:<12} {:>14} {:>14}  {}\n", "input", "df/dv", "|df/dv|·σ", "df/dv (symbolic)").trim_end());
        out.push('\n');
        for c in &result.contributions {
            out.push_str(
                format!(
                    "{:<12} {:>14} {:>14}  {}\n",
                    truncate(&c.variable, 12),
                    fmt_num(c.partial),
                    fmt_num(c.term),
                    c.derivative,
                )
                .trim_end(),
            );
            out.push('\n');
        }
    }
    out
}

/// Format a symbolic derivative as infix and LaTeX.
pub fn format_derivative(expr: &CompiledExpression, wrt: &str, derivative: &CompiledExpression) -> String {
    format!(
        "f = {expr}\nd/d{wrt} f = {derivative}\nLaTeX: \\frac{{d}}{{d{wrt}}} f = {}\n",
        derivative.to_latex()
    )
}

/// Compact number formatting: fixed for ordinary magnitudes, scientific otherwise.
pub fn fmt_num(v: f64) -> String {
    if !v.is_finite() {
        return format!("{v}");
    }
    let a = v.abs();
    if a == 0.0 || (1e-3..1e6).contains(&a) {
        format!("{v:.6}")
    } else {
        format!("{v:.6e}")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Algorithm, Bindings, DataPoint, FitConfig, Measurement, ParameterVector};
    use crate::expr::{Compiler, compile, differentiate};
    use crate::fit::fit;
    use crate::propagate::propagate;

    #[test]
    fn fit_report_lists_parameters_and_statistics() {
        let data = Dataset::new((0..6).map(|i| DataPoint::new(i as f64, 0.0, 2.0 * i as f64 + 1.0, 0.1)).collect())
            .unwrap();
        let expr = compile("a*x + b").unwrap();
        let guess = ParameterVector::uniform(&["a", "b"], 1.0);
        let result = fit(&data, &expr, &guess, Algorithm::Ols, &FitConfig::default()).unwrap();

        let text = format_fit_report(&expr, &data, &result, 0.95);
        assert!(text.contains("Algorithm: Least squares"));
        assert!(text.contains("Model: y = a * x + b"));
        assert!(text.lines().any(|l| l.starts_with("a ") && l.contains("2.000000")));
        assert!(text.contains("(dof=4)"));
        assert!(text.contains("Correlation:"));
        assert!(!text.contains("interval"));
    }

    #[test]
    fn residual_table_marks_exact_points() {
        let rows = [
            Residual { x: 1.0, y: 2.0, y_fit: 1.5, residual: 0.5, normalized: Some(5.0) },
            Residual { x: 2.0, y: 3.0, y_fit: 3.0, residual: 0.0, normalized: None },
        ];
        let text = format_residuals(&rows);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].ends_with("5.000"));
        assert!(lines[3].ends_with('-'));
    }

    #[test]
    fn propagation_report_shows_value_and_terms() {
        let expr = Compiler::new().independent(None).compile("a*b").unwrap();
        let bindings: Bindings = [
            ("a".to_string(), Measurement::new(2.0, 0.1)),
            ("b".to_string(), Measurement::new(3.0, 0.2)),
        ]
        .into_iter()
        .collect();
        let result = propagate(&expr, &bindings).unwrap();
        let text = format_propagation(&expr, &result);
        assert!(text.contains("f = 6.000000 ± 0.500000"));
        assert!(text.contains("sigma_f = "));
        assert!(text.lines().any(|l| l.starts_with("a ") && l.contains("0.300000")));
    }

    #[test]
    fn derivative_report() {
        let expr = compile("x^2").unwrap();
        let d = differentiate(&expr, "x").unwrap();
        let text = format_derivative(&expr, "x", &d);
        assert!(text.starts_with("f = x^2\nd/dx f = "));
        assert!(text.contains("\\frac{d}{dx} f = "));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(fmt_num(0.0), "0.000000");
        assert_eq!(fmt_num(1.5), "1.500000");
        assert_eq!(fmt_num(1.5e-5), "1.500000e-5");
        assert_eq!(fmt_num(-2.5e7), "-2.500000e7");
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("alpha", 12), "alpha");
        assert_eq!(truncate("a_very_long_parameter", 6), "a_ver.");
    }
}
