pub mod args;
pub mod availability;
pub mod backend;
pub mod catalog;
pub mod dispatcher;
pub mod error;
pub mod google;
pub mod history;

pub use args::ToolCall;
pub use availability::{free_slots, Availability};
pub use backend::{EventQuery, Fixtures, InMemoryBackend, Label, MessageQuery, WorkspaceBackend};
pub use catalog::{tool_schemas, validate_tool_schemas, ToolSchemaValidationError};
pub use dispatcher::ToolDispatcher;
pub use error::ToolError;
pub use google::{GoogleCredentials, GoogleWorkspaceBackend};
pub use history::{InvocationLog, InvocationRecord, DEFAULT_HISTORY_CAPACITY};
