//! Simple exponential smoothing

/// Result of smoothing a series
#[derive(Debug, Clone, PartialEq)]
pub struct Smoothing {
    /// Smoothed level at every position of the input
    pub smoothed: Vec<f64>,
    /// One-step-ahead forecast, equal to the last smoothed level
    pub forecast_next: f64,
    /// Mean squared difference between actual and smoothed values
    pub mse: f64,
}

/// Smooths `series` with factor `alpha`.
///
/// `S[0] = x[0]` and `S[t] = alpha * x[t] + (1 - alpha) * S[t-1]`.
/// Returns `None` for an empty series or an alpha outside `(0, 1]`.
pub fn exponential_smoothing(series: &[f64], alpha: f64) -> Option<Smoothing> {
    if !(alpha > 0.0 && alpha <= 1.0) {
        return None;
    }
    let (&first, rest) = series.split_first()?;

    let mut smoothed = Vec::with_capacity(series.len());
    smoothed.push(first);
    let mut level = first;
    for &x in rest {
        level = alpha * x + (1.0 - alpha) * level;
        smoothed.push(level);
    }

    let mse = series
        .iter()
        .zip(smoothed.iter())
        .map(|(actual, s)| (actual - s).powi(2))
        .sum::<f64>()
        / series.len() as f64;

    Some(Smoothing {
        forecast_next: level,
        smoothed,
        mse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_point_series() {
        let result = exponential_smoothing(&[10.0, 20.0], 0.3).unwrap();
        assert_eq!(result.smoothed.len(), 2);
        assert!((result.smoothed[0] - 10.0).abs() < 1e-12);
        assert!((result.smoothed[1] - 13.0).abs() < 1e-12);
        assert!((result.forecast_next - 13.0).abs() < 1e-12);
        // ((10-10)^2 + (20-13)^2) / 2
        assert!((result.mse - 24.5).abs() < 1e-9);
    }

    #[test]
    fn test_alpha_one_tracks_input() {
        let result = exponential_smoothing(&[3.0, 7.0, 1.0], 1.0).unwrap();
        assert_eq!(result.smoothed, vec![3.0, 7.0, 1.0]);
        assert_eq!(result.mse, 0.0);
    }

    #[test]
    fn test_rejects_empty_and_bad_alpha() {
        assert!(exponential_smoothing(&[], 0.3).is_none());
        assert!(exponential_smoothing(&[1.0], 0.0).is_none());
        assert!(exponential_smoothing(&[1.0], 1.5).is_none());
        assert!(exponential_smoothing(&[1.0], f64::NAN).is_none());
    }
}
