use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde_json::{json, Value};

use courier_observability::{MemoryAuditSink, REDACTION_MARKER};
use courier_tools::{InMemoryBackend, ToolDispatcher, ToolError, DEFAULT_HISTORY_CAPACITY};
use courier_types::{ResponseKind, ToolRequest};

fn message(id: &str, subject: &str, labels: &[&str]) -> Value {
    json!({
        "id": id,
        "labelIds": labels,
        "snippet": format!("snippet for {id}"),
        "payload": {"headers": [
            {"name": "From", "value": "alice@example.com"},
            {"name": "Date", "value": "Mon, 19 May 2025 09:00:00 +0000"},
            {"name": "Subject", "value": subject}
        ]}
    })
}

fn instant(value: &Value) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(value.as_str().expect("timestamp string")).expect("rfc3339")
}

fn fixture_backend() -> InMemoryBackend {
    InMemoryBackend::default()
        .with_label("INBOX", "INBOX", 42)
        .with_label("Label_1", "Receipts", 7)
        .with_message(message("m1", "Report", &["INBOX"]))
        .with_message(message("m2", "Invoice", &["INBOX", "Label_1"]))
        .with_message(message("m3", "Report", &["Label_1"]))
        .with_event(json!({
            "summary": "A",
            "start": {"dateTime": "2025-05-19T09:00:00Z"},
            "end": {"dateTime": "2025-05-19T10:00:00Z"}
        }))
        .with_event(json!({
            "summary": "B",
            "start": {"dateTime": "2025-05-19T09:30:00Z"},
            "end": {"dateTime": "2025-05-19T09:45:00Z"}
        }))
}

fn harness() -> (Arc<InMemoryBackend>, Arc<MemoryAuditSink>, ToolDispatcher) {
    let backend = Arc::new(fixture_backend());
    let audit = Arc::new(MemoryAuditSink::new(64));
    let dispatcher = ToolDispatcher::new(backend.clone(), audit.clone());
    (backend, audit, dispatcher)
}

#[tokio::test]
async fn unknown_tool_never_reaches_the_backend() {
    let (backend, _audit, dispatcher) = harness();
    let response = dispatcher
        .dispatch(&ToolRequest::new("drop_tables", json!({})))
        .await;
    assert_eq!(response.kind, ResponseKind::Error);
    assert_eq!(response.text, "unknown tool drop_tables");
    assert_eq!(response.error_code(), Some("unknown_tool"));
    assert_eq!(backend.calls(), 0);
    assert_eq!(dispatcher.history().len(), 1);
}

#[tokio::test]
async fn missing_required_field_fails_before_any_backend_call() {
    let (backend, _audit, dispatcher) = harness();
    let err = dispatcher
        .execute(&ToolRequest::new(
            "create_calendar_event",
            json!({"summary": "Sync", "start": "2025-05-19T09:00:00Z"}),
        ))
        .await
        .expect_err("missing end");
    assert!(matches!(err, ToolError::MissingField(ref f) if f == "end"));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn availability_merges_overlaps_and_reports_free_slots() {
    let (_backend, _audit, dispatcher) = harness();
    let response = dispatcher
        .dispatch(&ToolRequest::new(
            "check_day_availability",
            json!({"date": "2025-05-19"}),
        ))
        .await;
    assert_eq!(response.kind, ResponseKind::Text);
    let busy = response.extra["busy"].as_array().expect("busy");
    assert_eq!(busy.len(), 1);
    assert_eq!(instant(&busy[0]["start"]), instant(&json!("2025-05-19T09:00:00Z")));
    assert_eq!(instant(&busy[0]["end"]), instant(&json!("2025-05-19T10:00:00Z")));
    let free = response.extra["free"].as_array().expect("free");
    assert_eq!(free.len(), 2);
    assert_eq!(instant(&free[0]["start"]), instant(&json!("2025-05-19T00:00:00Z")));
    assert_eq!(instant(&free[1]["end"]), instant(&json!("2025-05-20T00:00:00Z")));
    assert!(response.text.contains("Available Time Slots:\n12:00 AM - 09:00 AM\n10:00 AM - 12:00 AM"));
}

#[tokio::test]
async fn empty_day_reads_as_free_all_day() {
    let (_backend, _audit, dispatcher) = harness();
    let response = dispatcher
        .dispatch(&ToolRequest::new(
            "check_day_availability",
            json!({"date": "2025-05-21"}),
        ))
        .await;
    assert_eq!(response.text, "You are free all day on 2025-05-21");
    assert_eq!(response.extra["free"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn recent_emails_dedupe_ids_across_labels_and_audit_raw_payloads() {
    let (_backend, audit, dispatcher) = harness();
    let response = dispatcher
        .dispatch(&ToolRequest::new(
            "list_recent_emails",
            json!({"label_ids": ["INBOX", "Label_1"], "max_results": "10"}),
        ))
        .await;
    assert_eq!(response.kind, ResponseKind::Text);
    assert_eq!(response.extra["count"], 3);
    let blocks = response.text.split("\n\n").collect::<Vec<_>>();
    assert_eq!(blocks.len(), 3);
    assert!(blocks[1].contains("Subject: Invoice\nLabels: INBOX, Receipts"));
    assert_eq!(
        audit.names(),
        vec!["list_recent_emails_raw".to_string(), "list_recent_emails".to_string()]
    );
}

#[tokio::test]
async fn bare_label_string_is_accepted() {
    let (_backend, _audit, dispatcher) = harness();
    let response = dispatcher
        .dispatch(&ToolRequest::new(
            "list_recent_emails",
            json!({"label_ids": "Label_1"}),
        ))
        .await;
    assert_eq!(response.extra["count"], 2);
}

#[tokio::test]
async fn empty_search_is_informational_not_an_error() {
    let backend = Arc::new(InMemoryBackend::default());
    let dispatcher = ToolDispatcher::new(backend, Arc::new(MemoryAuditSink::default()));
    let response = dispatcher
        .dispatch(&ToolRequest::new("list_recent_emails", json!({})))
        .await;
    assert_eq!(response.kind, ResponseKind::Text);
    assert_eq!(response.text, "No recent emails found.");
    assert_eq!(response.extra["count"], 0);
}

#[tokio::test]
async fn backend_failure_becomes_error_envelope_with_cause() {
    let (backend, _audit, dispatcher) = harness();
    backend.fail_with("invalid_grant");
    let response = dispatcher
        .dispatch(&ToolRequest::new("list_calendar_events", json!({})))
        .await;
    assert!(response.is_error());
    assert_eq!(
        response.text,
        "Unable to access calendar. Please check your credentials. Error: invalid_grant"
    );
    assert_eq!(response.error_code(), Some("backend"));
    assert!(!dispatcher.history().snapshot()[0].ok);
}

#[tokio::test]
async fn counts_labels_and_sends_mail() {
    let (backend, _audit, dispatcher) = harness();
    let count = dispatcher
        .dispatch(&ToolRequest::new("count_emails_by_label", json!({})))
        .await;
    assert_eq!(count.text, "42");

    let labels = dispatcher
        .dispatch(&ToolRequest::new("list_gmail_labels", json!({})))
        .await;
    assert_eq!(labels.text, "INBOX: INBOX\nLabel_1: Receipts");

    let sent = dispatcher
        .dispatch(&ToolRequest::new(
            "send_email",
            json!({"to": "bob@example.com", "message": "hello"}),
        ))
        .await;
    assert_eq!(sent.text, "Email sent.");
    assert_eq!(backend.sent().len(), 1);
}

#[tokio::test]
async fn created_event_is_listed_afterwards() {
    let (_backend, _audit, dispatcher) = harness();
    let created = dispatcher
        .dispatch(&ToolRequest::new(
            "create_calendar_event",
            json!({
                "summary": "Review",
                "start": "2025-05-19T14:00:00Z",
                "end": "2025-05-19T15:00:00Z",
                "attendees": "carol@example.com"
            }),
        ))
        .await;
    assert_eq!(created.text, "Event created.");
    assert!(created.extra["id"].as_str().is_some());

    let listed = dispatcher
        .dispatch(&ToolRequest::new(
            "list_calendar_events",
            json!({"time_min": "2025-05-19T12:00:00Z"}),
        ))
        .await;
    assert_eq!(listed.text, "2025-05-19T14:00:00+00:00 Review");
    assert_eq!(listed.extra["events"][0]["attendees"][0]["email"], "carol@example.com");
}

#[tokio::test]
async fn audit_entries_are_redacted() {
    let (_backend, audit, dispatcher) = harness();
    dispatcher
        .dispatch(&ToolRequest::new(
            "count_emails_by_label",
            json!({"label_id": "INBOX", "access_token": "ya29.secret"}),
        ))
        .await;
    let entry = audit.entries().pop().expect("entry");
    assert_eq!(entry.request["access_token"], REDACTION_MARKER);
    assert_eq!(entry.request["label_id"], "INBOX");
}

#[tokio::test]
async fn history_is_bounded() {
    let (_backend, _audit, dispatcher) = harness();
    for _ in 0..(DEFAULT_HISTORY_CAPACITY + 5) {
        dispatcher
            .dispatch(&ToolRequest::new("list_gmail_labels", json!({})))
            .await;
    }
    assert_eq!(dispatcher.history().len(), DEFAULT_HISTORY_CAPACITY);
}

#[tokio::test]
async fn fixtures_load_from_json_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fixtures.json");
    std::fs::write(
        &path,
        json!({"labels": [{"id": "INBOX", "name": "INBOX", "messagesTotal": 3}]}).to_string(),
    )
    .expect("write");
    let backend = Arc::new(InMemoryBackend::from_json_file(&path).expect("fixtures"));
    let dispatcher = ToolDispatcher::new(backend, Arc::new(MemoryAuditSink::default()));
    let response = dispatcher
        .dispatch(&ToolRequest::new("count_emails_by_label", json!({"label_id": "INBOX"})))
        .await;
    assert_eq!(response.text, "3");
}
