//! Goodness-of-fit scores.
//!
//! Every metric requires equal, non-empty sequences; anything else is an
//! input-shape error rather than a silently truncated comparison.

use statrs::statistics::Statistics;

use crate::domain::FitMetrics;
use crate::error::AppError;

/// Mean and population standard deviation of `truth - pred`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualStats {
    pub mean: f64,
    pub std: f64,
}

/// Relative absolute error `Σ|y - ŷ| / Σ|y - mean(y)|`.
///
/// A perfect fit scores 0 even for a flat truth; a flat truth with any error
/// scores infinity.
pub fn rae(truth: &[f64], pred: &[f64]) -> Result<f64, AppError> {
    check_lengths(truth, pred)?;
    let numerator: f64 = truth.iter().zip(pred).map(|(t, p)| (t - p).abs()).sum();
    if numerator == 0.0 {
        return Ok(0.0);
    }
    let mean = truth.iter().mean();
    let denominator: f64 = truth.iter().map(|t| (t - mean).abs()).sum();
    if denominator == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(numerator / denominator)
}

/// Mean absolute error.
pub fn mae(truth: &[f64], pred: &[f64]) -> Result<f64, AppError> {
    check_lengths(truth, pred)?;
    Ok(truth.iter().zip(pred).map(|(t, p)| (t - p).abs()).mean())
}

/// Mean squared error.
pub fn mse(truth: &[f64], pred: &[f64]) -> Result<f64, AppError> {
    check_lengths(truth, pred)?;
    Ok(truth.iter().zip(pred).map(|(t, p)| (t - p).powi(2)).mean())
}

/// Bias and scatter of the residuals `truth - pred`.
pub fn residual_stats(truth: &[f64], pred: &[f64]) -> Result<ResidualStats, AppError> {
    check_lengths(truth, pred)?;
    let residuals: Vec<f64> = truth.iter().zip(pred).map(|(t, p)| t - p).collect();
    Ok(ResidualStats {
        mean: residuals.iter().mean(),
        std: residuals.iter().population_std_dev(),
    })
}

/// All summary scores at once.
pub fn score(truth: &[f64], pred: &[f64]) -> Result<FitMetrics, AppError> {
    let stats = residual_stats(truth, pred)?;
    Ok(FitMetrics {
        rae: rae(truth, pred)?,
        mae: mae(truth, pred)?,
        mean_residual: stats.mean,
        std_residual: stats.std,
    })
}

fn check_lengths(truth: &[f64], pred: &[f64]) -> Result<(), AppError> {
    if truth.len() != pred.len() {
        return Err(AppError::input_shape(format!(
            "Length mismatch: {} observed vs {} predicted values.",
            truth.len(),
            pred.len()
        )));
    }
    if truth.is_empty() {
        return Err(AppError::input_shape("Cannot score an empty curve."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use approx::assert_relative_eq;

    #[test]
    fn identity_fit_has_zero_error() {
        let x = [0.0, 0.3, 1.2, 0.7, 0.1];
        assert_eq!(rae(&x, &x).unwrap(), 0.0);
        assert_eq!(mae(&x, &x).unwrap(), 0.0);
        let s = residual_stats(&x, &x).unwrap();
        assert_eq!(s.mean, 0.0);
        assert_eq!(s.std, 0.0);
    }

    #[test]
    fn length_mismatch_is_an_input_error() {
        let err = rae(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputShape);
        let err = mae(&[1.0], &[1.0, 2.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputShape);
        assert!(residual_stats(&[], &[]).is_err());
    }

    #[test]
    fn known_values() {
        let truth = [1.0, 2.0, 3.0, 4.0];
        let pred = [1.5, 2.0, 2.0, 4.5];
        // |e| = [0.5, 0, 1, 0.5], |y - 2.5| = [1.5, 0.5, 0.5, 1.5]
        assert_relative_eq!(rae(&truth, &pred).unwrap(), 0.5);
        assert_relative_eq!(mae(&truth, &pred).unwrap(), 0.5);
        // residuals = [-0.5, 0, 1, -0.5]
        let s = residual_stats(&truth, &pred).unwrap();
        assert_relative_eq!(s.mean, 0.0, epsilon = 1e-15);
        assert_relative_eq!(s.std, (1.5_f64 / 4.0).sqrt(), max_relative = 1e-12);
    }

    #[test]
    fn flat_truth_with_error_is_infinite_rae() {
        assert!(rae(&[1.0, 1.0], &[1.0, 2.0]).unwrap().is_infinite());
    }
}
