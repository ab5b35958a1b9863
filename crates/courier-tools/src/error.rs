use serde_json::json;
use thiserror::Error;

use courier_types::ToolResponse;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool {0}")]
    UnknownTool(String),
    #[error("missing field {0}")]
    MissingField(String),
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },
    #[error("Unable to {action}. Please check your credentials. Error: {cause}")]
    Backend { action: &'static str, cause: String },
}

impl ToolError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn backend(action: &'static str, err: anyhow::Error) -> Self {
        Self::Backend {
            action,
            cause: format!("{err:#}"),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::MissingField(_) | Self::InvalidArgument { .. } => "validation",
            Self::Backend { .. } => "backend",
        }
    }

    pub fn is_validation(&self) -> bool {
        self.code() == "validation"
    }

    fn detail(&self) -> String {
        match self {
            Self::UnknownTool(name) => name.clone(),
            Self::MissingField(field) => field.clone(),
            Self::InvalidArgument { field, reason } => format!("{field}: {reason}"),
            Self::Backend { cause, .. } => cause.clone(),
        }
    }

    pub fn to_response(&self) -> ToolResponse {
        ToolResponse::error(self.to_string()).with_extra(
            "error",
            json!({
                "code": self.code(),
                "detail": self.detail(),
            }),
        )
    }

    pub fn into_response(self) -> ToolResponse {
        self.to_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_renders_credentials_hint() {
        let err = ToolError::backend("access calendar", anyhow::anyhow!("401 Unauthorized"));
        assert_eq!(
            err.to_string(),
            "Unable to access calendar. Please check your credentials. Error: 401 Unauthorized"
        );
        let resp = err.into_response();
        assert!(resp.is_error());
        assert_eq!(resp.error_code(), Some("backend"));
    }

    #[test]
    fn validation_errors_share_a_code() {
        assert_eq!(ToolError::MissingField("date".into()).code(), "validation");
        assert_eq!(ToolError::invalid("date", "bad").code(), "validation");
        assert_eq!(ToolError::UnknownTool("x".into()).to_string(), "unknown tool x");
    }
}
