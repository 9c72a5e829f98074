use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::types::DagTable;
use crate::core::client::{ApiClient, ApiError, AuthMode, Payload, RemoteCall, Timed};

/// Result of turning a script into one or more job graphs.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub dags: Value,
    pub dag_ids: Vec<String>,
    pub space_params: Value,
    pub log: String,
    pub user_id: String,
    pub sample_name: String,
}

#[derive(Deserialize)]
struct ExecuteCodeResponse {
    #[serde(default)]
    dags: DagTable,
    #[serde(default, rename = "spaceParams")]
    space_params: Value,
    #[serde(default)]
    log: Value,
}

pub struct JobSubmissionService {
    client: Arc<ApiClient>,
    endpoint: String,
    timeout: Duration,
}

impl JobSubmissionService {
    pub fn new(client: Arc<ApiClient>, dag_base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: format!("{}/executeCode", dag_base_url.trim_end_matches('/')),
            timeout,
        }
    }

    pub async fn submit(
        &self,
        script: &str,
        owner_id: &str,
        label: &str,
        auth: AuthMode,
    ) -> Timed<Result<Submission, ApiError>> {
        info!("Submitting script for job graph creation (userId={}, sampleName={})", owner_id, label);
        let call = RemoteCall::post(
            &self.endpoint,
            serde_json::json!({
                "code": script,
                "userId": owner_id,
                "sampleName": label,
            }),
        )
        .auth(auth)
        .timeout(self.timeout);

        self.client.call(&call).await.map(|result| {
            let payload = result?;
            let submission = decode_submission(payload, owner_id, label)?;
            info!("Job graph creation produced {} id(s)", submission.dag_ids.len());
            Ok(submission)
        })
    }
}

fn decode_submission(payload: Payload, owner_id: &str, label: &str) -> Result<Submission, ApiError> {
    let raw = match payload {
        Payload::Json(v @ Value::Object(_)) => v,
        other => {
            return Err(ApiError::UnexpectedPayload(format!(
                "executeCode returned {}",
                other.into_value()
            )));
        }
    };
    let parsed: ExecuteCodeResponse = serde_json::from_value(raw.clone())
        .map_err(|e| ApiError::UnexpectedPayload(format!("executeCode: {}", e)))?;

    let dag_ids = parsed.dags.graph_ids();
    if dag_ids.is_empty() {
        return Err(ApiError::NoJobGraph);
    }

    let log = match parsed.log {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    };

    Ok(Submission {
        dags: raw.get("dags").cloned().unwrap_or(Value::Null),
        dag_ids,
        space_params: parsed.space_params,
        log,
        user_id: owner_id.to_string(),
        sample_name: label.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::client::testing::{DAG_URL, ScriptedTransport, client_for};

    fn service(transport: Arc<ScriptedTransport>) -> JobSubmissionService {
        JobSubmissionService::new(
            client_for(transport, Some("Bearer t")),
            DAG_URL,
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn submit_posts_code_and_extracts_ids() {
        let transport = ScriptedTransport::new();
        transport.once_json(
            "/executeCode",
            json!({
                "dags": { "dag-1": { "layers": [] }, "extra": "dag-2" },
                "spaceParams": { "zoom": 8 },
                "log": "compiled"
            }),
        );

        let out = service(transport.clone())
            .submit("print(1)", "user-1", "demo", AuthMode::Stored)
            .await;
        let submission = out.value.unwrap();

        assert_eq!(submission.dag_ids, vec!["dag-1", "dag-2"]);
        assert_eq!(submission.space_params["zoom"], 8);
        assert_eq!(submission.log, "compiled");

        let body = transport.requests()[0].json.clone().unwrap();
        assert_eq!(body, json!({ "code": "print(1)", "userId": "user-1", "sampleName": "demo" }));
    }

    #[tokio::test]
    async fn empty_dag_mapping_is_no_job_graph() {
        let transport = ScriptedTransport::new();
        transport.once_json("/executeCode", json!({ "dags": {}, "log": "nothing to run" }));

        let out = service(transport)
            .submit("x", "user-1", "", AuthMode::Stored)
            .await;
        assert!(matches!(out.value, Err(ApiError::NoJobGraph)));
    }

    #[tokio::test]
    async fn non_object_payload_is_unexpected() {
        let transport = ScriptedTransport::new();
        transport.once("/executeCode", 200, "internal error");

        let out = service(transport)
            .submit("x", "user-1", "", AuthMode::Stored)
            .await;
        assert!(matches!(out.value, Err(ApiError::UnexpectedPayload(_))));
    }
}
