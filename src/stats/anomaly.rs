//! Threshold anomaly detection

/// Default number of standard deviations beyond which a value is anomalous
pub const DEFAULT_K: f64 = 1.5;

/// True iff `|value - mean| > k * stddev`
pub fn classify_anomaly(value: f64, mean: f64, stddev: f64, k: f64) -> bool {
    (value - mean).abs() > k * stddev
}

/// One metric observation checked against its baseline
#[derive(Debug, Clone, PartialEq)]
pub struct MetricCheck<'a> {
    pub name: &'a str,
    pub value: f64,
    pub mean: f64,
    pub stddev: f64,
}

/// Names of the metrics whose observation is anomalous, in input order
pub fn anomaly_report<'a>(checks: &[MetricCheck<'a>], k: f64) -> Vec<&'a str> {
    checks
        .iter()
        .filter(|c| classify_anomaly(c.value, c.mean, c.stddev, k))
        .map(|c| c.name)
        .collect()
}
