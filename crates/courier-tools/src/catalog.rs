use serde_json::{json, Map, Value};

use courier_types::ToolSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    StringArray,
}

impl FieldKind {
    fn schema(self, description: &str) -> Value {
        match self {
            FieldKind::String => json!({"type": "string", "description": description}),
            FieldKind::Integer => json!({"type": "integer", "description": description}),
            FieldKind::StringArray => json!({
                "type": "array",
                "items": {"type": "string"},
                "description": description
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    required: bool,
    description: &'static str,
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required,
        description,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

impl ToolSpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn schema(&self) -> ToolSchema {
        let mut properties = Map::new();
        for f in self.fields {
            properties.insert(f.name.to_string(), f.kind.schema(f.description));
        }
        let mut input_schema = json!({
            "type": "object",
            "properties": properties,
        });
        let required = self
            .required_fields()
            .map(|f| Value::String(f.name.to_string()))
            .collect::<Vec<_>>();
        if !required.is_empty() {
            input_schema["required"] = Value::Array(required);
        }
        ToolSchema {
            name: self.name.to_string(),
            description: self.description.to_string(),
            input_schema,
        }
    }
}

const CALENDAR_ID: FieldSpec = field(
    "calendar_id",
    FieldKind::String,
    false,
    "Calendar identifier. Defaults to 'primary'.",
);

pub static TOOL_SPECS: [ToolSpec; 7] = [
    ToolSpec {
        name: "list_calendar_events",
        description: "List upcoming events from Google Calendar.",
        fields: &[
            CALENDAR_ID,
            field(
                "max_results",
                FieldKind::Integer,
                false,
                "Maximum number of events to return.",
            ),
            field("time_min", FieldKind::String, false, "ISO start time"),
            field("time_max", FieldKind::String, false, "ISO end time"),
        ],
    },
    ToolSpec {
        name: "create_calendar_event",
        description: "Create a new Google Calendar event.",
        fields: &[
            CALENDAR_ID,
            field("summary", FieldKind::String, true, "Event summary"),
            field("start", FieldKind::String, true, "ISO start datetime"),
            field("end", FieldKind::String, true, "ISO end datetime"),
            field(
                "attendees",
                FieldKind::StringArray,
                false,
                "Emails of attendees",
            ),
        ],
    },
    ToolSpec {
        name: "check_day_availability",
        description: "Return free slots for a specific day.",
        fields: &[
            CALENDAR_ID,
            field("date", FieldKind::String, true, "Date YYYY-MM-DD"),
            field(
                "utc_offset",
                FieldKind::String,
                false,
                "UTC offset of the day window, e.g. +02:00. Defaults to +00:00.",
            ),
        ],
    },
    ToolSpec {
        name: "list_recent_emails",
        description:
            "List snippets of recent Gmail messages matching an optional search query.",
        fields: &[
            field(
                "query",
                FieldKind::String,
                false,
                "Gmail search query. Defaults to 'newer_than:1d'.",
            ),
            field(
                "label_ids",
                FieldKind::StringArray,
                false,
                "Restrict the search to these label identifiers.",
            ),
            field(
                "max_results",
                FieldKind::Integer,
                false,
                "Maximum number of messages to return.",
            ),
        ],
    },
    ToolSpec {
        name: "count_emails_by_label",
        description: "Return the total number of messages with the given Gmail label ID.",
        fields: &[field(
            "label_id",
            FieldKind::String,
            false,
            "Label identifier (e.g. INBOX).",
        )],
    },
    ToolSpec {
        name: "list_gmail_labels",
        description: "List all Gmail labels for the current user.",
        fields: &[],
    },
    ToolSpec {
        name: "send_email",
        description: "Send an email using Gmail.",
        fields: &[
            field("to", FieldKind::String, true, "Recipient address."),
            field("subject", FieldKind::String, false, "Email subject."),
            field("message", FieldKind::String, true, "Email body."),
        ],
    },
];

pub fn find_spec(name: &str) -> Option<&'static ToolSpec> {
    TOOL_SPECS.iter().find(|spec| spec.name == name)
}

pub fn tool_schemas() -> Vec<ToolSchema> {
    TOOL_SPECS.iter().map(ToolSpec::schema).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSchemaValidationError {
    pub tool_name: String,
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for ToolSchemaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid tool schema `{}` at `{}`: {}",
            self.tool_name, self.path, self.reason
        )
    }
}

impl std::error::Error for ToolSchemaValidationError {}

/// Structural check run over published schemas: every array declares its
/// items and every required name is a declared property.
pub fn validate_tool_schemas(schemas: &[ToolSchema]) -> Result<(), ToolSchemaValidationError> {
    for schema in schemas {
        validate_schema_node(&schema.name, "$", &schema.input_schema)?;
    }
    Ok(())
}

fn validate_schema_node(
    tool_name: &str,
    path: &str,
    value: &Value,
) -> Result<(), ToolSchemaValidationError> {
    let Some(obj) = value.as_object() else {
        return Ok(());
    };
    let fail = |reason: String| ToolSchemaValidationError {
        tool_name: tool_name.to_string(),
        path: path.to_string(),
        reason,
    };

    if obj.get("type").and_then(|t| t.as_str()) == Some("array") && !obj.contains_key("items") {
        return Err(fail("array schema missing items".to_string()));
    }
    if let Some(items) = obj.get("items") {
        validate_schema_node(tool_name, &format!("{path}.items"), items)?;
    }

    let props = obj.get("properties").and_then(|v| v.as_object());
    if let Some(props) = props {
        for (key, child) in props {
            validate_schema_node(tool_name, &format!("{path}.properties.{key}"), child)?;
        }
    }
    if let Some(required) = obj.get("required").and_then(|v| v.as_array()) {
        for name in required.iter().filter_map(|v| v.as_str()) {
            if !props.is_some_and(|p| p.contains_key(name)) {
                return Err(fail(format!("required field `{name}` is not declared")));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn validator_rejects_array_without_items() {
        let schemas = vec![ToolSchema {
            name: "bad".to_string(),
            description: "bad schema".to_string(),
            input_schema: json!({
                "type":"object",
                "properties":{"attendees":{"type":"array"}}
            }),
        }];
        let err = validate_tool_schemas(&schemas).expect_err("expected schema validation failure");
        assert_eq!(err.tool_name, "bad");
        assert!(err.path.contains("properties.attendees"));
    }

    #[test]
    fn validator_rejects_undeclared_required_field() {
        let schemas = vec![ToolSchema {
            name: "bad".to_string(),
            description: "bad schema".to_string(),
            input_schema: json!({"type": "object", "properties": {}, "required": ["date"]}),
        }];
        let err = validate_tool_schemas(&schemas).expect_err("expected failure");
        assert!(err.reason.contains("date"));
    }

    #[test]
    fn catalogue_schemas_are_unique_and_valid() {
        let schemas = tool_schemas();
        validate_tool_schemas(&schemas).expect("catalogue schemas should validate");
        let unique = schemas
            .iter()
            .map(|schema| schema.name.as_str())
            .collect::<HashSet<_>>();
        assert_eq!(unique.len(), schemas.len());
        assert_eq!(schemas.len(), 7);
    }

    #[test]
    fn required_list_is_generated_from_field_table() {
        let schema = find_spec("create_calendar_event").expect("spec").schema();
        assert_eq!(schema.input_schema["required"], json!(["summary", "start", "end"]));
        let labels = find_spec("list_gmail_labels").expect("spec").schema();
        assert!(labels.input_schema.get("required").is_none());
        assert_eq!(labels.input_schema["properties"], json!({}));
    }
}
