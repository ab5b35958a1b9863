use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub calendar_id: String,
    pub max_results: Option<u32>,
    pub time_min: Option<String>,
    pub time_max: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub query: String,
    pub label_id: Option<String>,
    pub max_results: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

/// Mail and calendar data source behind the dispatcher. Results are the
/// provider's raw JSON documents so they can ride along in response extras.
#[async_trait]
pub trait WorkspaceBackend: Send + Sync {
    /// Events ordered by start time.
    async fn list_events(&self, query: &EventQuery) -> anyhow::Result<Vec<Value>>;
    async fn insert_event(&self, calendar_id: &str, event: &Value) -> anyhow::Result<Value>;
    async fn list_labels(&self) -> anyhow::Result<Vec<Label>>;
    async fn label_details(&self, label_id: &str) -> anyhow::Result<Value>;
    /// One page of message references: `{"messages": [{"id": ..}, ..]}`.
    async fn search_messages(&self, query: &MessageQuery) -> anyhow::Result<Value>;
    async fn message_metadata(&self, message_id: &str) -> anyhow::Result<Value>;
    async fn send_message(&self, raw: &str) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixtures {
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub labels: Vec<Value>,
    #[serde(default)]
    pub messages: Vec<Value>,
}

#[derive(Default)]
struct InMemoryState {
    fixtures: Fixtures,
    sent: Vec<String>,
    next_id: u64,
}

/// Fixture-backed backend for offline runs and tests.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<InMemoryState>,
    failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new(fixtures: Fixtures) -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                fixtures,
                sent: Vec::new(),
                next_id: 1,
            }),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let fixtures = serde_json::from_str::<Fixtures>(&raw)?;
        Ok(Self::new(fixtures))
    }

    pub fn with_event(self, event: Value) -> Self {
        self.state.lock().fixtures.events.push(event);
        self
    }

    pub fn with_label(self, id: &str, name: &str, messages_total: u64) -> Self {
        self.state.lock().fixtures.labels.push(json!({
            "id": id,
            "name": name,
            "messagesTotal": messages_total,
        }));
        self
    }

    pub fn with_message(self, message: Value) -> Self {
        self.state.lock().fixtures.messages.push(message);
        self
    }

    /// Every subsequent call fails with `reason` until cleared.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    pub fn events(&self) -> Vec<Value> {
        self.state.lock().fixtures.events.clone()
    }

    fn enter(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.failure.lock().clone() {
            anyhow::bail!(reason);
        }
        Ok(())
    }
}

fn event_start(event: &Value) -> Option<DateTime<FixedOffset>> {
    let start = event.get("start")?;
    if let Some(raw) = start.get("dateTime").and_then(|v| v.as_str()) {
        return DateTime::parse_from_rfc3339(raw).ok();
    }
    let date = start.get("date").and_then(|v| v.as_str())?;
    DateTime::parse_from_rfc3339(&format!("{date}T00:00:00Z")).ok()
}

fn event_end(event: &Value) -> Option<DateTime<FixedOffset>> {
    let end = event.get("end")?;
    if let Some(raw) = end.get("dateTime").and_then(|v| v.as_str()) {
        return DateTime::parse_from_rfc3339(raw).ok();
    }
    let date = end.get("date").and_then(|v| v.as_str())?;
    DateTime::parse_from_rfc3339(&format!("{date}T00:00:00Z")).ok()
}

#[async_trait]
impl WorkspaceBackend for InMemoryBackend {
    async fn list_events(&self, query: &EventQuery) -> anyhow::Result<Vec<Value>> {
        self.enter()?;
        let time_min = query
            .time_min
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok());
        let time_max = query
            .time_max
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok());

        let mut events = self
            .state
            .lock()
            .fixtures
            .events
            .iter()
            .filter(|ev| {
                let calendar = ev
                    .get("calendarId")
                    .and_then(|v| v.as_str())
                    .unwrap_or("primary");
                calendar == query.calendar_id
            })
            .filter(|ev| match (time_min, event_end(ev)) {
                (Some(min), Some(end)) => end > min,
                _ => true,
            })
            .filter(|ev| match (time_max, event_start(ev)) {
                (Some(max), Some(start)) => start < max,
                _ => true,
            })
            .cloned()
            .collect::<Vec<_>>();
        events.sort_by_key(event_start);
        if let Some(max) = query.max_results {
            events.truncate(max as usize);
        }
        Ok(events)
    }

    async fn insert_event(&self, calendar_id: &str, event: &Value) -> anyhow::Result<Value> {
        self.enter()?;
        let mut state = self.state.lock();
        let id = format!("evt-{}", state.next_id);
        state.next_id += 1;
        let mut stored = event.clone();
        stored["id"] = Value::String(id);
        stored["calendarId"] = Value::String(calendar_id.to_string());
        state.fixtures.events.push(stored.clone());
        Ok(stored)
    }

    async fn list_labels(&self) -> anyhow::Result<Vec<Label>> {
        self.enter()?;
        let labels = self
            .state
            .lock()
            .fixtures
            .labels
            .iter()
            .filter_map(|raw| serde_json::from_value::<Label>(raw.clone()).ok())
            .collect();
        Ok(labels)
    }

    async fn label_details(&self, label_id: &str) -> anyhow::Result<Value> {
        self.enter()?;
        self.state
            .lock()
            .fixtures
            .labels
            .iter()
            .find(|raw| raw.get("id").and_then(|v| v.as_str()) == Some(label_id))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Requested entity was not found: label {label_id}"))
    }

    async fn search_messages(&self, query: &MessageQuery) -> anyhow::Result<Value> {
        self.enter()?;
        let refs = self
            .state
            .lock()
            .fixtures
            .messages
            .iter()
            .filter(|msg| match &query.label_id {
                Some(label) => msg
                    .get("labelIds")
                    .and_then(|v| v.as_array())
                    .is_some_and(|ids| ids.iter().any(|id| id.as_str() == Some(label))),
                None => true,
            })
            .take(query.max_results as usize)
            .map(|msg| json!({"id": msg.get("id").cloned().unwrap_or(Value::Null)}))
            .collect::<Vec<_>>();
        let estimate = refs.len();
        Ok(json!({"messages": refs, "resultSizeEstimate": estimate}))
    }

    async fn message_metadata(&self, message_id: &str) -> anyhow::Result<Value> {
        self.enter()?;
        self.state
            .lock()
            .fixtures
            .messages
            .iter()
            .find(|msg| msg.get("id").and_then(|v| v.as_str()) == Some(message_id))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Requested entity was not found: message {message_id}"))
    }

    async fn send_message(&self, raw: &str) -> anyhow::Result<Value> {
        self.enter()?;
        let mut state = self.state.lock();
        let id = format!("sent-{}", state.next_id);
        state.next_id += 1;
        state.sent.push(raw.to_string());
        Ok(json!({"id": id}))
    }
}
