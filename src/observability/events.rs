//! Observable query lifecycle events

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration loaded
    ConfigLoaded,

    // Planning
    /// Pipeline passed validation
    PlanValidated,
    /// Pipeline rejected before execution
    PlanRejected,
    /// Explain produced
    ExplainComplete,

    // Execution
    /// Query received by the orchestrator
    QueryReceived,
    /// Collection scanned from the store
    CollectionScanned,
    /// A stage finished
    StageComplete,
    /// Query produced its full result
    QueryExecuted,
    /// Query aborted with an error
    QueryFailed,
    /// Query aborted by its deadline
    QueryTimedOut,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::PlanValidated => "PLAN_VALIDATED",
            Event::PlanRejected => "PLAN_REJECTED",
            Event::ExplainComplete => "EXPLAIN_COMPLETE",
            Event::QueryReceived => "QUERY_BEGIN",
            Event::CollectionScanned => "COLLECTION_SCANNED",
            Event::StageComplete => "STAGE_COMPLETE",
            Event::QueryExecuted => "QUERY_COMPLETE",
            Event::QueryFailed => "QUERY_FAILED",
            Event::QueryTimedOut => "QUERY_TIMEOUT",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::CollectionScanned | Event::StageComplete => Severity::Trace,
            Event::PlanRejected | Event::QueryFailed | Event::QueryTimedOut => Severity::Error,
            _ => Severity::Info,
        }
    }

    /// Logs this event at its own severity
    pub fn emit(&self, fields: &[(&str, &str)]) {
        super::Logger::log(self.severity(), self.as_str(), fields);
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::ConfigLoaded,
            Event::PlanValidated,
            Event::PlanRejected,
            Event::ExplainComplete,
            Event::QueryReceived,
            Event::CollectionScanned,
            Event::StageComplete,
            Event::QueryExecuted,
            Event::QueryFailed,
            Event::QueryTimedOut,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_failure_events_are_errors() {
        assert_eq!(Event::QueryFailed.severity(), Severity::Error);
        assert_eq!(Event::QueryTimedOut.severity(), Severity::Error);
        assert_eq!(Event::StageComplete.severity(), Severity::Trace);
        assert_eq!(Event::QueryExecuted.severity(), Severity::Info);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::QueryTimedOut), "QUERY_TIMEOUT");
    }
}
