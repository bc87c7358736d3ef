//! Online mean and variance

/// Running mean and population variance using Welford's algorithm.
///
/// The mean is updated incrementally rather than computed as sum / count,
/// which keeps floating error bounded over long inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one observation
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the observations, `None` when empty
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Population variance, `None` when empty
    pub fn variance_pop(&self) -> Option<f64> {
        (self.count > 0).then(|| self.m2 / self.count as f64)
    }

    /// Population standard deviation, `None` when empty
    pub fn stddev_pop(&self) -> Option<f64> {
        self.variance_pop().map(f64::sqrt)
    }
}

impl Extend<f64> for RunningStats {
    fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
        for x in iter {
            self.push(x);
        }
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = RunningStats::new();
        stats.extend(iter);
        stats
    }
}

/// Population standard deviation of `values`.
///
/// An empty input yields 0.0.
pub fn stddev_pop(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .collect::<RunningStats>()
        .stddev_pop()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_pass_stddev(values: &[f64]) -> f64 {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt()
    }

    #[test]
    fn test_stddev_of_one_to_five_is_sqrt_two() {
        let s = stddev_pop(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((s - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_matches_two_pass_reference() {
        let values: Vec<f64> = (0..1000).map(|i| 1000.0 + (i as f64 * 0.37).sin()).collect();
        let online = stddev_pop(&values);
        let reference = two_pass_stddev(&values);
        assert!(((online - reference) / reference).abs() < 1e-9);
    }

    #[test]
    fn test_running_mean() {
        let stats: RunningStats = [10.0, 15.0, 20.0].into_iter().collect();
        assert_eq!(stats.count(), 3);
        assert!((stats.mean().unwrap() - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty() {
        let stats = RunningStats::new();
        assert_eq!(stats.mean(), None);
        assert_eq!(stats.stddev_pop(), None);
        assert_eq!(stddev_pop(&[]), 0.0);
    }
}
