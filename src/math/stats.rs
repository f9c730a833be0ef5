//! Sample statistics shared by the fitting backends.

use std::cmp::Ordering;

/// Median, sorting the slice in place.
pub fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Robust residual scale: `MAD / 0.6745`, floored at `floor`.
pub fn mad_scale(residuals: &[f64], floor: f64) -> f64 {
    let mut abs: Vec<f64> = residuals
        .iter()
        .map(|r| r.abs())
        .filter(|v| v.is_finite())
        .collect();
    let mad = median_mut(&mut abs).unwrap_or(0.0);
    (mad / 0.6745).max(floor)
}

/// Huber weight factors in `[min_factor, 1]` for standardized residuals.
///
/// Residuals inside `k · scale` keep full weight; larger ones are scaled by
/// `k · scale / |r|`.
pub fn huber_factors(residuals: &[f64], k: f64, scale: f64, min_factor: f64) -> Vec<f64> {
    let cutoff = k.max(1e-6) * scale;
    residuals
        .iter()
        .map(|&r| {
            let ar = r.abs();
            let factor = if ar <= cutoff || !ar.is_finite() {
                1.0
            } else {
                cutoff / ar
            };
            factor.max(min_factor)
        })
        .collect()
}

/// Percentile with linear interpolation between order statistics.
///
/// `sorted` must be ascending; `q` is in `[0, 1]`.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Column means of a set of equally sized samples.
pub fn column_means(samples: &[Vec<f64>]) -> Option<Vec<f64>> {
    let first = samples.first()?;
    let mut mean = vec![0.0; first.len()];
    for sample in samples {
        for (m, v) in mean.iter_mut().zip(sample) {
            *m += v;
        }
    }
    let n = samples.len() as f64;
    mean.iter_mut().for_each(|m| *m /= n);
    Some(mean)
}

/// Unbiased sample covariance (`n - 1` denominator). Needs two or more samples.
pub fn sample_covariance(samples: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    if samples.len() < 2 {
        return None;
    }
    let mean = column_means(samples)?;
    let p = mean.len();
    let mut cov = vec![vec![0.0; p]; p];
    for sample in samples {
        for i in 0..p {
            let di = sample[i] - mean[i];
            for j in i..p {
                cov[i][j] += di * (sample[j] - mean[j]);
            }
        }
    }
    let denom = (samples.len() - 1) as f64;
    for i in 0..p {
        for j in i..p {
            cov[i][j] /= denom;
            cov[j][i] = cov[i][j];
        }
    }
    Some(cov)
}

/// Equal-tailed interval of each column at the given coverage.
pub fn column_intervals(samples: &[Vec<f64>], level: f64) -> Option<Vec<(f64, f64)>> {
    let p = samples.first()?.len();
    let tail = (1.0 - level) / 2.0;
    (0..p)
        .map(|j| {
            let mut column: Vec<f64> = samples.iter().map(|s| s[j]).collect();
            column.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            Some((
                percentile_sorted(&column, tail)?,
                percentile_sorted(&column, 1.0 - tail)?,
            ))
        })
        .collect()
}

/// Correlation matrix `cov_ij / (σ_i σ_j)`; entries with a zero σ are `0`
/// off the diagonal and `1` on it.
pub fn correlation_from_covariance(cov: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let sd: Vec<f64> = (0..cov.len()).map(|i| cov[i][i].max(0.0).sqrt()).collect();
    (0..cov.len())
        .map(|i| {
            (0..cov.len())
                .map(|j| {
                    if i == j {
                        1.0
                    } else if sd[i] > 0.0 && sd[j] > 0.0 {
                        (cov[i][j] / (sd[i] * sd[j])).clamp(-1.0, 1.0)
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median_mut(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median_mut(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median_mut(&mut Vec::<f64>::new()), None);
    }

    #[test]
    fn huber_downweights_only_large_residuals() {
        let residuals = [0.1, -0.2, 0.15, 10.0];
        let scale = mad_scale(&residuals, 1e-12);
        let factors = huber_factors(&residuals, 1.345, scale, 1e-3);
        assert_eq!(&factors[..3], &[1.0, 1.0, 1.0]);
        assert!(factors[3] < 0.1);
    }

    #[test]
    fn percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&sorted, 0.5), Some(3.0));
        assert_eq!(percentile_sorted(&sorted, 0.125), Some(1.5));
        assert_eq!(percentile_sorted(&sorted, 1.0), Some(5.0));
    }

    #[test]
    fn covariance_of_perfectly_correlated_columns() {
        let samples = vec![vec![1.0, 2.0], vec![2.0, 4.0], vec![3.0, 6.0]];
        let cov = sample_covariance(&samples).unwrap();
        assert!((cov[0][0] - 1.0).abs() < 1e-12);
        assert!((cov[0][1] - 2.0).abs() < 1e-12);
        assert!((cov[1][1] - 4.0).abs() < 1e-12);
        let corr = correlation_from_covariance(&cov);
        assert!((corr[0][1] - 1.0).abs() < 1e-12);
    }
}
