use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use courier_tools::ToolError;
use courier_types::ToolRequest;

use crate::AppState;

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "courier server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await?;
    tracing::info!("courier server stopped");
    Ok(())
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/global/health", get(global_health))
        .route("/tools", get(list_tools))
        .route("/call_tool", post(call_tool))
        .route("/dev", get(dev_page))
        .layer(cors)
        .with_state(state)
}

async fn global_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
        "tools": state.dispatcher.schemas().len(),
        "recent_calls": state.dispatcher.history().len(),
        "uptime_ms": state.uptime_ms(),
    }))
}

async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.schemas())
}

fn status_for(err: &ToolError) -> StatusCode {
    match err {
        ToolError::UnknownTool(_) => StatusCode::NOT_FOUND,
        ToolError::MissingField(_) | ToolError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
        ToolError::Backend { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(err: &ToolError) -> Response {
    (status_for(err), Json(err.to_response())).into_response()
}

/// Accepts `{name, arguments}` where `arguments` may be absent or null.
fn tool_request_from_body(body: Value) -> Result<ToolRequest, ToolError> {
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ToolError::MissingField("name".to_string()))?;
    let arguments = match body.get("arguments") {
        None | Some(Value::Null) => json!({}),
        Some(value @ Value::Object(_)) => value.clone(),
        Some(_) => return Err(ToolError::invalid("arguments", "expected an object")),
    };
    Ok(ToolRequest::new(name, arguments))
}

async fn call_tool(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let request = match tool_request_from_body(body) {
        Ok(request) => request,
        Err(err) => return error_response(&err),
    };
    match state.dispatcher.execute(&request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => error_response(&err),
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

async fn dev_page(State(state): State<AppState>) -> Html<String> {
    let rows = state
        .dispatcher
        .history()
        .recent()
        .iter()
        .map(|record| {
            format!(
                "<li><code>{}</code> {} {}</li>",
                record.at.format("%Y-%m-%d %H:%M:%S"),
                if record.ok { "ok" } else { "error" },
                escape_html(&record.summary_line())
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    Html(format!(
        "<html><body><h1>Recent Tool Calls</h1><ul>{rows}</ul></body></html>"
    ))
}
