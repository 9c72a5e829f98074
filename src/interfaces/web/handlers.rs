use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::AppState;
use crate::core::progress::LogProgress;
use crate::core::tools::{self, ToolResult};

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "server": state.server_name,
        "endpoints": {
            "health": "/health",
            "info": "/info",
            "tools": "/api/tools",
            "call": "/api/tools/{name}"
        }
    }))
}

pub async fn info(State(state): State<AppState>) -> Json<Value> {
    let names: Vec<&str> = tools::descriptors().iter().map(|t| t.name).collect();
    Json(json!({
        "server_name": state.server_name,
        "version": env!("CARGO_PKG_VERSION"),
        "description": "OGE job graph orchestration server",
        "apis": {
            "dag_api": state.dag_base_url,
            "catalog_api": state.catalog_url
        },
        "available_tools": names,
        "token_management": {
            "type": "automatic",
            "auto_refresh": "refreshed once when a call reports code 40003 or HTTP 401",
            "manual_refresh": "refresh_token tool",
            "format": "Bearer <jwt_token>"
        }
    }))
}

pub async fn list_tools() -> Json<Value> {
    Json(json!({ "tools": tools::descriptors() }))
}

pub async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<Value>>,
) -> impl IntoResponse {
    if !tools::descriptors().iter().any(|t| t.name == name) {
        let result = ToolResult::failed(&name, "Dispatch", format!("unknown tool '{}'", name));
        return (StatusCode::NOT_FOUND, Json(result));
    }
    let args = body.map(|Json(v)| v).unwrap_or(Value::Null);
    // Cancelled when the request future is dropped.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let result = state
        .toolbox
        .dispatch(&name, args, &LogProgress, &cancel)
        .await;
    (StatusCode::OK, Json(result))
}
