//! Decoding of raw JSON tool arguments into typed per-tool calls.
//!
//! Every argument is checked against the catalogue field table before any
//! backend is touched. Coercion rules:
//! - string fields accept numbers and booleans and stringify them
//! - integer fields accept integers or numeric strings
//! - string-array fields accept a bare string as a one-element array
//! - `null` and the empty string count as absent

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde_json::{Map, Value};

use courier_types::ToolRequest;

use crate::catalog::{find_spec, FieldKind, ToolSpec};
use crate::error::ToolError;

pub const DEFAULT_CALENDAR_ID: &str = "primary";
pub const DEFAULT_EMAIL_QUERY: &str = "newer_than:1d";
pub const DEFAULT_LABEL_ID: &str = "INBOX";
pub const DEFAULT_MAX_RESULTS: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ListEventsArgs {
    pub calendar_id: String,
    pub max_results: u32,
    pub time_min: Option<String>,
    pub time_max: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateEventArgs {
    pub calendar_id: String,
    pub summary: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityArgs {
    pub calendar_id: String,
    pub date: NaiveDate,
    pub offset: FixedOffset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentEmailsArgs {
    pub query: String,
    pub label_ids: Vec<String>,
    pub max_results: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendEmailArgs {
    pub to: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    ListCalendarEvents(ListEventsArgs),
    CreateCalendarEvent(CreateEventArgs),
    CheckDayAvailability(AvailabilityArgs),
    ListRecentEmails(RecentEmailsArgs),
    CountEmailsByLabel { label_id: String },
    ListGmailLabels,
    SendEmail(SendEmailArgs),
}

impl ToolCall {
    pub fn decode(request: &ToolRequest) -> Result<Self, ToolError> {
        let name = request.name.trim();
        let spec = find_spec(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = Args::new(spec, &request.arguments)?;

        let call = match spec.name {
            "list_calendar_events" => ToolCall::ListCalendarEvents(ListEventsArgs {
                calendar_id: args.string_or("calendar_id", DEFAULT_CALENDAR_ID)?,
                max_results: args.max_results()?,
                time_min: args.string("time_min")?,
                time_max: args.string("time_max")?,
            }),
            "create_calendar_event" => {
                let start = parse_timestamp("start", &args.required_string("start")?)?;
                let end = parse_timestamp("end", &args.required_string("end")?)?;
                if start > end {
                    return Err(ToolError::invalid("end", "must not be before start"));
                }
                ToolCall::CreateCalendarEvent(CreateEventArgs {
                    calendar_id: args.string_or("calendar_id", DEFAULT_CALENDAR_ID)?,
                    summary: args.required_string("summary")?,
                    start,
                    end,
                    attendees: args.string_array("attendees")?,
                })
            }
            "check_day_availability" => {
                let raw_date = args.required_string("date")?;
                let date = NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d")
                    .map_err(|_| ToolError::invalid("date", "expected YYYY-MM-DD"))?;
                let offset = match args.string("utc_offset")? {
                    Some(raw) => parse_offset(&raw)?,
                    None => utc(),
                };
                ToolCall::CheckDayAvailability(AvailabilityArgs {
                    calendar_id: args.string_or("calendar_id", DEFAULT_CALENDAR_ID)?,
                    date,
                    offset,
                })
            }
            "list_recent_emails" => ToolCall::ListRecentEmails(RecentEmailsArgs {
                query: args.string_or("query", DEFAULT_EMAIL_QUERY)?,
                label_ids: args.string_array("label_ids")?,
                max_results: args.max_results()?,
            }),
            "count_emails_by_label" => ToolCall::CountEmailsByLabel {
                label_id: args.string_or("label_id", DEFAULT_LABEL_ID)?,
            },
            "list_gmail_labels" => ToolCall::ListGmailLabels,
            "send_email" => ToolCall::SendEmail(SendEmailArgs {
                to: args.required_string("to")?,
                subject: args.string("subject")?.unwrap_or_default(),
                message: args.required_string("message")?,
            }),
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };
        Ok(call)
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<FixedOffset>, ToolError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|_| ToolError::invalid(field, "expected an RFC 3339 timestamp"))
}

/// Accepts `Z`, `+HH:MM`, `-HH:MM` and `+HHMM`.
pub fn parse_offset(raw: &str) -> Result<FixedOffset, ToolError> {
    let invalid = || ToolError::invalid("utc_offset", "expected +HH:MM or -HH:MM");
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") {
        return Ok(utc());
    }
    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(invalid()),
    };
    let digits = rest.replace(':', "");
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Coerced view over the raw argument map for one tool.
struct Args<'a> {
    spec: &'static ToolSpec,
    raw: &'a Map<String, Value>,
}

impl<'a> Args<'a> {
    /// Fails fast on the first absent required field, in declaration order.
    fn new(spec: &'static ToolSpec, raw: &'a Map<String, Value>) -> Result<Self, ToolError> {
        for field in spec.required_fields() {
            if is_absent(raw.get(field.name)) {
                return Err(ToolError::MissingField(field.name.to_string()));
            }
        }
        Ok(Self { spec, raw })
    }

    fn present(&self, name: &str) -> Option<&'a Value> {
        let value = self.raw.get(name);
        if is_absent(value) {
            None
        } else {
            value
        }
    }

    fn string(&self, name: &str) -> Result<Option<String>, ToolError> {
        debug_assert_eq!(
            self.spec.field(name).map(|f| f.kind),
            Some(FieldKind::String)
        );
        let Some(value) = self.present(name) else {
            return Ok(None);
        };
        match value {
            Value::String(s) => Ok(Some(s.clone())),
            Value::Number(n) => Ok(Some(n.to_string())),
            Value::Bool(b) => Ok(Some(b.to_string())),
            _ => Err(ToolError::invalid(name, "expected a string")),
        }
    }

    fn string_or(&self, name: &str, default: &str) -> Result<String, ToolError> {
        Ok(self.string(name)?.unwrap_or_else(|| default.to_string()))
    }

    fn required_string(&self, name: &str) -> Result<String, ToolError> {
        self.string(name)?
            .ok_or_else(|| ToolError::MissingField(name.to_string()))
    }

    fn integer(&self, name: &str) -> Result<Option<i64>, ToolError> {
        let Some(value) = self.present(name) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| ToolError::invalid(name, "expected an integer"))
    }

    fn max_results(&self) -> Result<u32, ToolError> {
        match self.integer("max_results")? {
            None => Ok(DEFAULT_MAX_RESULTS),
            Some(n) if n >= 1 => {
                u32::try_from(n).map_err(|_| ToolError::invalid("max_results", "too large"))
            }
            Some(_) => Err(ToolError::invalid("max_results", "must be at least 1")),
        }
    }

    fn string_array(&self, name: &str) -> Result<Vec<String>, ToolError> {
        let Some(value) = self.present(name) else {
            return Ok(Vec::new());
        };
        match value {
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Array(items) => items
                .iter()
                .filter(|item| !is_absent(Some(item)))
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    _ => Err(ToolError::invalid(name, "expected an array of strings")),
                })
                .collect(),
            _ => Err(ToolError::invalid(name, "expected an array of strings")),
        }
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}
