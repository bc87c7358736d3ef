//! Observability
//!
//! - Structured logging (JSON lines on stderr)
//! - Typed lifecycle events
//! - Atomic counters
//!
//! Observability is read-only: nothing here influences query results.
//!
//! ```ignore
//! use stratus::observability::{Event, Logger, Severity};
//!
//! Logger::set_min_severity(Severity::Warn);
//! Event::PlanRejected.emit(&[("code", "STRATUS_STAGE_CONFIG")]);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};
