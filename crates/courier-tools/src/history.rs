use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use courier_observability::redact_value;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationRecord {
    pub at: DateTime<Utc>,
    pub name: String,
    pub arguments: Value,
    pub ok: bool,
}

impl InvocationRecord {
    pub fn summary_line(&self) -> String {
        format!("{} {}", self.name, self.arguments)
    }
}

/// Fixed-capacity log of recent dispatches, oldest evicted first. The lock
/// is only held for the push or the snapshot copy.
pub struct InvocationLog {
    capacity: usize,
    entries: Mutex<VecDeque<InvocationRecord>>,
}

impl InvocationLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn record(&self, name: &str, arguments: &Value, ok: bool) {
        let record = InvocationRecord {
            at: Utc::now(),
            name: name.to_string(),
            arguments: redact_value(arguments),
            ok,
        };
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<InvocationRecord> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<InvocationRecord> {
        self.entries.lock().iter().rev().cloned().collect()
    }
}

impl Default for InvocationLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest() {
        let log = InvocationLog::default();
        for i in 0..(DEFAULT_HISTORY_CAPACITY + 7) {
            log.record(&format!("tool_{i}"), &json!({}), true);
        }
        assert_eq!(log.len(), DEFAULT_HISTORY_CAPACITY);
        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].name, "tool_7");
        assert_eq!(
            log.recent()[0].name,
            format!("tool_{}", DEFAULT_HISTORY_CAPACITY + 6)
        );
    }

    #[test]
    fn arguments_are_redacted_before_storage() {
        let log = InvocationLog::new(2);
        log.record("send_email", &json!({"to": "a@b.c", "token": "t"}), false);
        let record = &log.snapshot()[0];
        assert_eq!(record.arguments["token"], "[REDACTED]");
        assert!(!record.ok);
        assert!(record.summary_line().starts_with("send_email {"));
    }
}
