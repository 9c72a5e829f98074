use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use super::prune::strip_script;
use super::types::TaskRecord;
use crate::core::client::{ApiClient, ApiError, AuthMode, Payload, RemoteCall, Timed};

#[derive(Debug, Clone)]
pub struct TaskSubmission {
    pub dag_id: String,
    pub task_name: Option<String>,
    pub filename: Option<String>,
    pub crs: String,
    pub scale: String,
    pub format: String,
    pub username: String,
    pub script: String,
}

/// `<prefix>_YYYY_MM_DD_HH_MM_SS` from local time. Two calls within the same
/// second produce the same name.
pub fn timestamped_name(prefix: &str) -> String {
    format!("{}_{}", prefix, chrono::Local::now().format("%Y_%m_%d_%H_%M_%S"))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub struct BatchTaskService {
    client: Arc<ApiClient>,
    endpoint: String,
    timeout: Duration,
}

impl BatchTaskService {
    pub fn new(client: Arc<ApiClient>, dag_base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: format!("{}/addTaskRecord", dag_base_url.trim_end_matches('/')),
            timeout,
        }
    }

    pub async fn register_task(
        &self,
        task: &TaskSubmission,
        auth: AuthMode,
    ) -> Timed<Result<TaskRecord, ApiError>> {
        let task_name = non_blank(&task.task_name)
            .map(str::to_string)
            .unwrap_or_else(|| timestamped_name("task"));
        let filename = non_blank(&task.filename)
            .map(str::to_string)
            .unwrap_or_else(|| timestamped_name("file"));

        info!(
            "Registering batch task {} for dag {} (format={}, crs={})",
            task_name, task.dag_id, task.format, task.crs
        );
        let call = RemoteCall::post(
            &self.endpoint,
            serde_json::json!({
                "taskName": task_name,
                "crs": task.crs,
                "scale": task.scale,
                "filename": filename,
                "format": task.format,
                "id": task.dag_id,
                "userName": task.username,
                "script": task.script,
            }),
        )
        .auth(auth)
        .timeout(self.timeout);

        self.client
            .call(&call)
            .await
            .map(|result| decode_record(result?, &task.script))
    }
}

fn decode_record(payload: Payload, script: &str) -> Result<TaskRecord, ApiError> {
    let mut body = match payload {
        Payload::Json(v @ Value::Object(_)) => v,
        other => {
            return Err(ApiError::UnexpectedPayload(format!(
                "addTaskRecord returned {}",
                other.into_value()
            )));
        }
    };

    let removed = strip_script(&mut body, script);
    if removed > 0 {
        info!("Removed {} script field(s) from registration response", removed);
    }

    if body.get("code").and_then(Value::as_i64) != Some(200) {
        let message = body
            .get("msg")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());
        warn!("Batch task registration rejected: {}", message);
        return Err(ApiError::Rejected { message });
    }

    let data = match body.get("data") {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => serde_json::json!({}),
    };
    let mut record: TaskRecord = serde_json::from_value(data)
        .map_err(|e| ApiError::UnexpectedPayload(format!("addTaskRecord data: {}", e)))?;
    record.api_response = body;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::client::testing::{DAG_URL, ScriptedTransport, client_for};

    const SCRIPT: &str = "var dem = oge.Image.load('ASTER_GDEM'); dem.export('out');";

    fn submission(task_name: Option<&str>) -> TaskSubmission {
        TaskSubmission {
            dag_id: "dag-1".to_string(),
            task_name: task_name.map(str::to_string),
            filename: None,
            crs: "EPSG:4326".to_string(),
            scale: "1000".to_string(),
            format: "geojson".to_string(),
            username: "edu_admin".to_string(),
            script: SCRIPT.to_string(),
        }
    }

    fn service(transport: Arc<ScriptedTransport>) -> BatchTaskService {
        BatchTaskService::new(client_for(transport, Some("Bearer t")), DAG_URL, Duration::from_secs(300))
    }

    #[test]
    fn generated_names_follow_timestamp_pattern() {
        let name = timestamped_name("task");
        let parts: Vec<&str> = name.split('_').collect();
        assert_eq!(parts[0], "task");
        assert_eq!(parts.len(), 7);
        assert!(parts[1..].iter().all(|p| p.chars().all(|c| c.is_ascii_digit())));
        assert_eq!(parts[1].len(), 4);
    }

    #[tokio::test]
    async fn registration_strips_script_from_record() {
        let transport = ScriptedTransport::new();
        transport.once_json(
            "/addTaskRecord",
            json!({
                "code": 200,
                "msg": "ok",
                "data": {
                    "id": 42,
                    "batchSessionId": "bs-7",
                    "dagId": "dag-1",
                    "taskName": "job",
                    "state": "starting",
                    "script": SCRIPT,
                    "detail": { "history": [{ "source": SCRIPT }] }
                }
            }),
        );

        let out = service(transport.clone())
            .register_task(&submission(Some("job")), AuthMode::Stored)
            .await;
        let record = out.value.unwrap();

        assert_eq!(record.task_id.as_deref(), Some("42"));
        assert_eq!(record.batch_session_id.as_deref(), Some("bs-7"));
        assert!(!record.to_report().to_string().contains("oge.Image.load"));

        let sent = transport.requests()[0].json.clone().unwrap();
        assert_eq!(sent["taskName"], "job");
        assert_eq!(sent["id"], "dag-1");
        assert_eq!(sent["userName"], "edu_admin");
        assert!(sent["filename"].as_str().unwrap().starts_with("file_"));
    }

    #[tokio::test]
    async fn non_200_code_is_rejected_with_message() {
        let transport = ScriptedTransport::new();
        transport.once_json("/addTaskRecord", json!({ "code": 500, "msg": "dag not found" }));

        let out = service(transport)
            .register_task(&submission(None), AuthMode::Stored)
            .await;
        match out.value {
            Err(ApiError::Rejected { message }) => assert_eq!(message, "dag not found"),
            other => panic!("expected Rejected, got {:?}", other),
        }
    }
}
