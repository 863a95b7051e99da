//! User-visible engine events.
//!
//! Tracing output is developer diagnostics; these events are the product
//! surface: each carries a stable machine-readable code and a single-line
//! description, and the launcher renders them. Tests assert against the
//! recorded sequence.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventCode {
    /// A foreground command was handed to a subprocess.
    CommandDispatched,
    /// A background command was spawned detached.
    CommandBackground,
    /// A command matched the destructive patterns and was dropped.
    DangerousCommand,
    /// A foreground command exited non-zero; later commands were held.
    CommandFailed,
    TaskVerified,
    TaskFailed,
    TaskSkipped,
    /// A task exhausted its fix attempts and escalated.
    Escalation,
    /// Model output yielded no parseable files; counted as a failure.
    ParseEmpty,
    PlanRejected,
    FileWritten,
    ModelPulled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineEvent {
    pub code: EventCode,
    pub detail: String,
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.detail)
    }
}

/// Append-only shared event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<Vec<EngineEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, code: EventCode, detail: impl Into<String>) {
        let event = EngineEvent {
            code,
            detail: detail.into(),
        };
        self.inner.lock().expect("event log lock").push(event);
    }

    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.inner.lock().expect("event log lock").clone()
    }

    pub fn count(&self, code: EventCode) -> usize {
        self.inner
            .lock()
            .expect("event log lock")
            .iter()
            .filter(|e| e.code == code)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_records_in_order_and_counts() {
        let log = EventLog::new();
        log.record(EventCode::CommandDispatched, "false");
        log.record(EventCode::CommandFailed, "exit 1");
        log.record(EventCode::CommandDispatched, "echo hi");

        let events = log.snapshot();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].code, EventCode::CommandDispatched);
        assert_eq!(log.count(EventCode::CommandDispatched), 2);
        assert_eq!(log.count(EventCode::DangerousCommand), 0);
    }

    #[test]
    fn codes_serialize_kebab_case() {
        let json = serde_json::to_string(&EventCode::DangerousCommand).expect("serialize");
        assert_eq!(json, "\"dangerous-command\"");
    }
}
