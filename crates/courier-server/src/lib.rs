use std::sync::Arc;

use chrono::{DateTime, Utc};

use courier_tools::ToolDispatcher;

mod http;

pub use http::*;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ToolDispatcher>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            dispatcher,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0)
    }
}
