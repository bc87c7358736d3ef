//! Statistics library
//!
//! Pure numeric functions shared by group accumulators, window functions
//! and the statistical expression operators. Nothing here touches
//! documents or performs I/O.

mod anomaly;
mod correlation;
mod smoothing;
mod welford;

pub use anomaly::{anomaly_report, classify_anomaly, MetricCheck, DEFAULT_K};
pub use correlation::pearson_correlation;
pub use smoothing::{exponential_smoothing, Smoothing};
pub use welford::{stddev_pop, RunningStats};
