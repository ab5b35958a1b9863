use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

/// Keys whose values never reach an audit sink, compared case-insensitively.
pub const SENSITIVE_KEYS: [&str; 4] = ["token", "secret", "api_key", "access_token"];
pub const REDACTION_MARKER: &str = "[REDACTED]";

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYS.contains(&lower.as_str())
}

/// Replaces sensitive mapping values with [`REDACTION_MARKER`], walking
/// nested objects and arrays. Scalars pass through untouched.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                let redacted = if is_sensitive_key(key) {
                    Value::String(REDACTION_MARKER.to_string())
                } else {
                    redact_value(child)
                };
                out.insert(key.clone(), redacted);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub request: Value,
    pub response: Value,
}

impl AuditEntry {
    /// Builds an entry with both payloads already redacted.
    pub fn redacted(name: impl Into<String>, request: &Value, response: &Value) -> Self {
        Self {
            timestamp: Utc::now(),
            name: name.into(),
            request: redact_value(request),
            response: redact_value(response),
        }
    }
}

/// Append-only, best-effort recorder of tool and model calls.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Writes each entry as one JSON line on the `courier.audit` target, which
/// the JSONL file layer picks up.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        match serde_json::to_string(&entry) {
            Ok(line) => tracing::info!(target: "courier.audit", name = %entry.name, "{line}"),
            Err(err) => tracing::warn!(target: "courier.audit", "audit entry dropped: {err}"),
        }
    }
}

/// Keeps the most recent entries in memory.
pub struct MemoryAuditSink {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.name.clone()).collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}
