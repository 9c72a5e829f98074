use serde::Deserialize;
use serde_json::{Value, json};

/// Accepts numbers written as strings ("1000") as well as bare numbers.
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected a non-negative integer, got {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected an integer, got '{}'", s))),
        Some(other) => Err(D::Error::custom(format!("expected an integer, got {}", other))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecuteCodeArgs {
    pub code: String,
    pub user_id: Option<String>,
    pub sample_name: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTaskArgs {
    pub dag_id: String,
    pub task_name: Option<String>,
    pub filename: Option<String>,
    pub crs: Option<String>,
    #[serde(default, deserialize_with = "crate::core::dag::types::lenient_string")]
    pub scale: Option<String>,
    pub format: Option<String>,
    pub username: Option<String>,
    #[serde(default)]
    pub script: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryStatusArgs {
    pub dag_id: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WorkflowArgs {
    pub code: String,
    pub user_id: Option<String>,
    pub sample_name: Option<String>,
    pub task_name: Option<String>,
    pub filename: Option<String>,
    pub crs: Option<String>,
    #[serde(default, deserialize_with = "crate::core::dag::types::lenient_string")]
    pub scale: Option<String>,
    pub format: Option<String>,
    pub username: Option<String>,
    pub auth_token: Option<String>,
    pub auto_submit: Option<bool>,
    pub wait_for_completion: Option<bool>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub check_interval: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64", alias = "max_wait")]
    pub max_wait_time: Option<u64>,
}

fn auth_token_property() -> Value {
    json!({
        "type": "string",
        "description": "Bearer token to use instead of the managed one. Never refreshed."
    })
}

pub fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub fn execute_code_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "code": { "type": "string", "description": "OGE script source" },
            "user_id": { "type": "string", "description": "Owner id; defaults to the configured user" },
            "sample_name": { "type": "string", "description": "Free-form label for the run" },
            "auth_token": auth_token_property()
        },
        "required": ["code"]
    })
}

pub fn submit_task_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "dag_id": { "type": "string", "description": "Job graph id returned by execute_code_to_dag" },
            "task_name": { "type": "string", "description": "Defaults to task_<timestamp>" },
            "filename": { "type": "string", "description": "Defaults to file_<timestamp>" },
            "crs": { "type": "string", "default": "EPSG:4326" },
            "scale": { "type": "string", "default": "1000" },
            "format": { "type": "string", "default": "geojson" },
            "username": { "type": "string" },
            "script": { "type": "string", "description": "Script source the graph was built from" },
            "auth_token": auth_token_property()
        },
        "required": ["dag_id"]
    })
}

pub fn query_status_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "dag_id": { "type": "string" },
            "auth_token": auth_token_property()
        },
        "required": ["dag_id"]
    })
}

pub fn workflow_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "code": { "type": "string", "description": "OGE script source" },
            "user_id": { "type": "string" },
            "sample_name": { "type": "string" },
            "task_name": { "type": "string" },
            "filename": { "type": "string" },
            "crs": { "type": "string", "default": "EPSG:4326" },
            "scale": { "type": "string", "default": "1000" },
            "format": { "type": "string", "default": "tif" },
            "username": { "type": "string" },
            "auth_token": auth_token_property(),
            "auto_submit": { "type": "boolean", "default": true },
            "wait_for_completion": { "type": "boolean", "default": false },
            "check_interval": { "type": "integer", "minimum": 1, "default": 10 },
            "max_wait_time": { "type": "integer", "minimum": 0, "default": 300 }
        },
        "required": ["code"]
    })
}
