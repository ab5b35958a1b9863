use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::Level;

use courier_observability::{emit_event, AuditEntry, AuditSink, ObservabilityEvent, ProcessKind};
use courier_types::{DayWindow, ToolRequest, ToolResponse, ToolSchema};

use crate::args::{
    AvailabilityArgs, CreateEventArgs, ListEventsArgs, RecentEmailsArgs, SendEmailArgs, ToolCall,
};
use crate::availability::{clip_to_window, format_schedule, free_slots, interval_from_event};
use crate::backend::{EventQuery, MessageQuery, WorkspaceBackend};
use crate::catalog::tool_schemas;
use crate::error::ToolError;
use crate::history::{InvocationLog, DEFAULT_HISTORY_CAPACITY};

/// Routes tool requests to the workspace backend and renders the uniform
/// response envelope. Every call, successful or not, lands in the
/// invocation log and the audit sink.
pub struct ToolDispatcher {
    backend: Arc<dyn WorkspaceBackend>,
    audit: Arc<dyn AuditSink>,
    history: InvocationLog,
    process: ProcessKind,
}

impl ToolDispatcher {
    pub fn new(backend: Arc<dyn WorkspaceBackend>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            backend,
            audit,
            history: InvocationLog::new(DEFAULT_HISTORY_CAPACITY),
            process: ProcessKind::Cli,
        }
    }

    pub fn for_process(mut self, process: ProcessKind) -> Self {
        self.process = process;
        self
    }

    pub fn history(&self) -> &InvocationLog {
        &self.history
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        tool_schemas()
    }

    /// Never fails: errors come back as error-kind responses.
    pub async fn dispatch(&self, request: &ToolRequest) -> ToolResponse {
        match self.execute(request).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    }

    pub async fn execute(&self, request: &ToolRequest) -> Result<ToolResponse, ToolError> {
        let result = match ToolCall::decode(request) {
            Ok(call) => self.run(call).await,
            Err(err) => Err(err),
        };

        let arguments = request.arguments_value();
        self.history.record(&request.name, &arguments, result.is_ok());
        let response_value = match &result {
            Ok(response) => response.to_value(),
            Err(err) => err.to_response().to_value(),
        };
        self.audit
            .record(AuditEntry::redacted(request.name.as_str(), &arguments, &response_value));
        self.observe(&request.name, &result);
        result
    }

    fn observe(&self, tool: &str, result: &Result<ToolResponse, ToolError>) {
        let (level, status, error_code, detail) = match result {
            Ok(_) => (Level::INFO, "ok", None, None),
            Err(err @ ToolError::Backend { .. }) => {
                (Level::ERROR, "error", Some(err.code()), Some(err.to_string()))
            }
            Err(err) => (Level::WARN, "rejected", Some(err.code()), Some(err.to_string())),
        };
        emit_event(
            level,
            self.process,
            ObservabilityEvent {
                event: "tool.dispatch",
                component: "dispatcher",
                tool: Some(tool),
                status: Some(status),
                error_code,
                detail: detail.as_deref(),
                ..ObservabilityEvent::default()
            },
        );
    }

    async fn run(&self, call: ToolCall) -> Result<ToolResponse, ToolError> {
        match call {
            ToolCall::ListCalendarEvents(args) => self.list_calendar_events(args).await,
            ToolCall::CreateCalendarEvent(args) => self.create_calendar_event(args).await,
            ToolCall::CheckDayAvailability(args) => self.check_day_availability(args).await,
            ToolCall::ListRecentEmails(args) => self.list_recent_emails(args).await,
            ToolCall::CountEmailsByLabel { label_id } => self.count_emails_by_label(&label_id).await,
            ToolCall::ListGmailLabels => self.list_gmail_labels().await,
            ToolCall::SendEmail(args) => self.send_email(args).await,
        }
    }

    async fn list_calendar_events(&self, args: ListEventsArgs) -> Result<ToolResponse, ToolError> {
        let query = EventQuery {
            calendar_id: args.calendar_id,
            max_results: Some(args.max_results),
            time_min: args.time_min,
            time_max: args.time_max,
        };
        let events = self
            .backend
            .list_events(&query)
            .await
            .map_err(|err| ToolError::backend("access calendar", err))?;

        let lines = events
            .iter()
            .map(|event| {
                let start = &event["start"];
                let when = start["dateTime"]
                    .as_str()
                    .or_else(|| start["date"].as_str())
                    .unwrap_or_default();
                let summary = event["summary"].as_str().unwrap_or("(no title)");
                format!("{when} {summary}")
            })
            .collect::<Vec<_>>();
        let text = if lines.is_empty() {
            "No events found.".to_string()
        } else {
            lines.join("\n")
        };
        Ok(ToolResponse::text(text).with_extra("events", Value::Array(events)))
    }

    async fn create_calendar_event(&self, args: CreateEventArgs) -> Result<ToolResponse, ToolError> {
        let mut body = json!({
            "summary": args.summary,
            "start": {"dateTime": args.start.to_rfc3339()},
            "end": {"dateTime": args.end.to_rfc3339()},
        });
        if !args.attendees.is_empty() {
            body["attendees"] = args
                .attendees
                .iter()
                .map(|email| json!({"email": email}))
                .collect();
        }
        let created = self
            .backend
            .insert_event(&args.calendar_id, &body)
            .await
            .map_err(|err| ToolError::backend("create calendar event", err))?;
        let id = created.get("id").cloned().unwrap_or(Value::Null);
        Ok(ToolResponse::text("Event created.").with_extra("id", id))
    }

    async fn check_day_availability(
        &self,
        args: AvailabilityArgs,
    ) -> Result<ToolResponse, ToolError> {
        const ACTION: &str = "check calendar availability";
        let window = DayWindow::for_date(args.date, args.offset);
        let query = EventQuery {
            calendar_id: args.calendar_id,
            max_results: None,
            time_min: Some(window.start().to_rfc3339()),
            time_max: Some(window.end().to_rfc3339()),
        };
        let raw_events = self
            .backend
            .list_events(&query)
            .await
            .map_err(|err| ToolError::backend(ACTION, err))?;
        let events = raw_events
            .iter()
            .map(|event| interval_from_event(event, args.offset))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(|err| ToolError::backend(ACTION, err))?;

        let availability = free_slots(&events, &window);
        let text = if clip_to_window(&events, &window).is_empty() {
            format!("You are free all day on {}", args.date.format("%Y-%m-%d"))
        } else {
            format_schedule(args.date, &events, &availability, &window)
        };
        Ok(ToolResponse::text(text)
            .with_extra("busy", serde_json::to_value(&availability.busy).unwrap_or_default())
            .with_extra("free", serde_json::to_value(&availability.free).unwrap_or_default()))
    }

    async fn list_recent_emails(&self, args: RecentEmailsArgs) -> Result<ToolResponse, ToolError> {
        const ACTION: &str = "list recent emails";
        let backend_err = |err: anyhow::Error| ToolError::backend(ACTION, err);

        let label_names = self
            .backend
            .list_labels()
            .await
            .map_err(backend_err)?
            .into_iter()
            .map(|label| (label.id, label.name))
            .collect::<HashMap<_, _>>();

        let targets: Vec<Option<String>> = if args.label_ids.is_empty() {
            vec![None]
        } else {
            args.label_ids.iter().cloned().map(Some).collect()
        };

        let mut seen = HashSet::new();
        let mut collected = Vec::new();
        let mut list_results = Vec::new();
        for label_id in targets {
            let page = self
                .backend
                .search_messages(&MessageQuery {
                    query: args.query.clone(),
                    label_id,
                    max_results: args.max_results,
                })
                .await
                .map_err(backend_err)?;
            let ids = page["messages"]
                .as_array()
                .map(|refs| {
                    refs.iter()
                        .filter_map(|r| r["id"].as_str().map(str::to_string))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            for id in ids {
                if seen.insert(id.clone()) {
                    collected.push(id);
                }
            }
            list_results.push(page);
        }

        let mut raw_messages = Vec::with_capacity(collected.len());
        let mut blocks = Vec::with_capacity(collected.len());
        for id in &collected {
            let message = self
                .backend
                .message_metadata(id)
                .await
                .map_err(backend_err)?;
            blocks.push(render_message_block(&message, &label_names));
            raw_messages.push(message);
        }

        self.audit.record(AuditEntry::redacted(
            "list_recent_emails_raw",
            &json!({"query": args.query, "label_ids": args.label_ids, "max_results": args.max_results}),
            &json!({"list_results": list_results, "messages": raw_messages}),
        ));

        let text = if blocks.is_empty() {
            "No recent emails found.".to_string()
        } else {
            blocks.join("\n\n")
        };
        Ok(ToolResponse::text(text)
            .with_extra("count", json!(collected.len()))
            .with_extra("messages", Value::Array(raw_messages)))
    }

    async fn count_emails_by_label(&self, label_id: &str) -> Result<ToolResponse, ToolError> {
        let details = self
            .backend
            .label_details(label_id)
            .await
            .map_err(|err| ToolError::backend("count emails", err))?;
        let total = details["messagesTotal"].as_u64().unwrap_or(0);
        Ok(ToolResponse::text(total.to_string()))
    }

    async fn list_gmail_labels(&self) -> Result<ToolResponse, ToolError> {
        let labels = self
            .backend
            .list_labels()
            .await
            .map_err(|err| ToolError::backend("list labels", err))?;
        let lines = labels
            .iter()
            .map(|label| format!("{}: {}", label.id, label.name))
            .collect::<Vec<_>>();
        let text = if lines.is_empty() {
            "No labels found.".to_string()
        } else {
            lines.join("\n")
        };
        Ok(ToolResponse::text(text)
            .with_extra("labels", serde_json::to_value(&labels).unwrap_or_default()))
    }

    async fn send_email(&self, args: SendEmailArgs) -> Result<ToolResponse, ToolError> {
        let raw = encode_raw_message(&args);
        self.backend
            .send_message(&raw)
            .await
            .map_err(|err| ToolError::backend("send email", err))?;
        Ok(ToolResponse::text("Email sent."))
    }
}

/// Minimal RFC 822 message, base64url encoded as Gmail expects in `raw`.
pub fn encode_raw_message(args: &SendEmailArgs) -> String {
    let message = format!(
        "To: {}\r\nSubject: {}\r\n\r\n{}",
        args.to, args.subject, args.message
    );
    URL_SAFE.encode(message.as_bytes())
}

fn render_message_block(message: &Value, label_names: &HashMap<String, String>) -> String {
    let headers = message["payload"]["headers"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|h| Some((h["name"].as_str()?, h["value"].as_str()?)))
                .collect::<HashMap<_, _>>()
        })
        .unwrap_or_default();
    let header = |name: &str, fallback: &'static str| -> String {
        headers
            .get(name)
            .map(|v| v.to_string())
            .unwrap_or_else(|| fallback.to_string())
    };
    let labels = message["labelIds"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str())
                .map(|id| label_names.get(id).cloned().unwrap_or_else(|| id.to_string()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    format!(
        "Date: {}\nFrom: {}\nSubject: {}\nLabels: {}\n{}",
        header("Date", "(unknown)"),
        header("From", "(unknown)"),
        header("Subject", "(no subject)"),
        labels.join(", "),
        message["snippet"].as_str().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn raw_message_round_trips_through_base64url() {
        let raw = encode_raw_message(&SendEmailArgs {
            to: "a@example.com".to_string(),
            subject: "Hi?".to_string(),
            message: "body >> text".to_string(),
        });
        assert!(!raw.contains('+') && !raw.contains('/'));
        let decoded = URL_SAFE.decode(raw).expect("decode");
        assert_eq!(
            String::from_utf8(decoded).expect("utf8"),
            "To: a@example.com\r\nSubject: Hi?\r\n\r\nbody >> text"
        );
    }

    #[test]
    fn message_block_falls_back_for_missing_headers() {
        let names = HashMap::from([("Label_1".to_string(), "Receipts".to_string())]);
        let block = render_message_block(
            &json!({
                "labelIds": ["Label_1", "UNREAD"],
                "snippet": "Your order shipped",
                "payload": {"headers": [{"name": "Subject", "value": "Order"}]}
            }),
            &names,
        );
        assert_eq!(
            block,
            "Date: (unknown)\nFrom: (unknown)\nSubject: Order\nLabels: Receipts, UNREAD\nYour order shipped"
        );
    }
}
