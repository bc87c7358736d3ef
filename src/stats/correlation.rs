//! Pearson correlation

/// Pearson correlation coefficient of two paired series.
///
/// Returns `None` when the series are empty, differ in length, or either
/// has zero variance. Callers surface `None` as Null.
pub fn pearson_correlation(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.is_empty() || xs.len() != ys.len() {
        return None;
    }

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }

    let r = cov / (var_x * var_y).sqrt();
    // Rounding can push a perfect correlation just past the unit interval.
    Some(r.clamp(-1.0, 1.0))
}
