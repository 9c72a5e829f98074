mod polling;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::core::client::testing::{CATALOG_URL, DAG_URL, ScriptedTransport, client_for};

pub(super) const SCRIPT: &str = "var img = oge.Image.load('LC08'); img.export('ndvi');";
pub(super) const EXECUTE: &str = "/executeCode";
pub(super) const REGISTER: &str = "/addTaskRecord";
pub(super) const STATE: &str = "/getState";
pub(super) const CATALOG: &str = "/batch-result/catalog";

pub(super) fn orchestrator(transport: Arc<ScriptedTransport>, settle: Duration) -> WorkflowOrchestrator {
    let client = client_for(transport, Some("Bearer t"));
    WorkflowOrchestrator::new(
        Arc::new(JobSubmissionService::new(client.clone(), DAG_URL, Duration::from_secs(300))),
        Arc::new(BatchTaskService::new(client.clone(), DAG_URL, Duration::from_secs(300))),
        Arc::new(StatusService::new(client, DAG_URL, CATALOG_URL, Duration::from_secs(30))),
        settle,
    )
}

pub(super) fn request() -> WorkflowRequest {
    WorkflowRequest {
        code: SCRIPT.to_string(),
        user_id: "user-1".to_string(),
        sample_name: "ndvi".to_string(),
        task_name: Some("task_ndvi".to_string()),
        filename: Some("ndvi_out".to_string()),
        crs: "EPSG:4326".to_string(),
        scale: "1000".to_string(),
        format: "tif".to_string(),
        username: "edu_admin".to_string(),
        auth: AuthMode::Stored,
        auto_submit: true,
        wait_for_completion: true,
        check_interval: Duration::from_secs(10),
        max_wait: Duration::from_secs(300),
    }
}

/// Backend that accepts the script and registers the task, echoing the
/// script back at several depths.
pub(super) fn accepting_backend() -> Arc<ScriptedTransport> {
    let transport = ScriptedTransport::new();
    transport.always_json(
        EXECUTE,
        json!({ "dags": { "dag-1": { "nodes": 2 } }, "spaceParams": {}, "log": "" }),
    );
    transport.always_json(
        REGISTER,
        json!({
            "code": 200,
            "msg": "success",
            "data": {
                "id": 5,
                "dagId": "dag-1",
                "taskName": "task_ndvi",
                "state": "starting",
                "script": SCRIPT,
                "meta": { "audit": [{ "payload": { "code": SCRIPT } }] }
            }
        }),
    );
    transport
}
