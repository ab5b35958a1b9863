use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Text,
    Error,
}

/// Uniform envelope returned for every tool call.
///
/// `extra` is flattened next to `type` and `text` on the wire, so raw
/// event or message lists ride along without changing the text contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Text,
            text: text.into(),
            extra: Map::new(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            text: text.into(),
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }

    pub fn error_code(&self) -> Option<&str> {
        if !self.is_error() {
            return None;
        }
        self.extra
            .get("error")
            .and_then(|v| v.get("code"))
            .and_then(|v| v.as_str())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_flattens_extra_next_to_text() {
        let resp = ToolResponse::text("Event created.").with_extra("id", json!("abc"));
        let value = resp.to_value();
        assert_eq!(value["type"], "text");
        assert_eq!(value["text"], "Event created.");
        assert_eq!(value["id"], "abc");
    }

    #[test]
    fn error_code_reads_nested_error_object() {
        let resp = ToolResponse::error("unknown tool nope")
            .with_extra("error", json!({"code": "unknown_tool", "detail": "nope"}));
        assert!(resp.is_error());
        assert_eq!(resp.error_code(), Some("unknown_tool"));
        assert_eq!(ToolResponse::text("ok").error_code(), None);
    }

    #[test]
    fn request_ignores_non_object_arguments() {
        let req = ToolRequest::new("list_gmail_labels", json!("oops"));
        assert!(req.arguments.is_empty());
        let decoded: ToolRequest =
            serde_json::from_value(json!({"name": "list_gmail_labels"})).expect("decode");
        assert!(decoded.arguments.is_empty());
    }
}
