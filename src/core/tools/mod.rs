//! The tool surface shared by the MCP server, the HTTP API and the CLI.
//!
//! Every tool takes a JSON object of arguments and answers with a
//! [`ToolResult`]; failures are reported in the result, never raised.

pub mod args;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::client::{ApiClient, ApiError, AuthConfig, AuthMode, HttpTransport, ReqwestTransport};
use crate::core::config::{DefaultSettings, Settings, WorkflowSettings};
use crate::core::credential::{self, Credential, CredentialStore};
use crate::core::dag::{
    BatchTaskService, JobSubmissionService, StatusService, TaskSubmission, WorkflowOrchestrator,
    WorkflowRequest,
};
use crate::core::progress::{ProgressLevel, ProgressSink};
use args::{ExecuteCodeArgs, QueryStatusArgs, SubmitTaskArgs, WorkflowArgs};

pub const REFRESH_TOKEN: &str = "refresh_token";
pub const CHECK_TOKEN_STATUS: &str = "check_token_status";
pub const EXECUTE_CODE_TO_DAG: &str = "execute_code_to_dag";
pub const SUBMIT_BATCH_TASK: &str = "submit_batch_task";
pub const QUERY_TASK_STATUS: &str = "query_task_status";
pub const EXECUTE_DAG_WORKFLOW: &str = "execute_dag_workflow";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// 0 on success, 1 on failure.
    pub code: i32,
    pub msg: String,
    pub data: Value,
    pub map_type: Option<String>,
    pub operation: Option<String>,
    pub execution_time: Option<f64>,
    pub api_endpoint: String,
}

impl ToolResult {
    pub fn succ(tool: &str, operation: &str, data: Value) -> Self {
        Self {
            success: true,
            code: 0,
            msg: format!("{} succeeded", operation),
            data,
            map_type: Some(tool.to_string()),
            operation: Some(operation.to_string()),
            execution_time: None,
            api_endpoint: "oge".to_string(),
        }
    }

    pub fn failed(tool: &str, operation: &str, msg: impl Into<String>) -> Self {
        Self {
            success: false,
            code: 1,
            msg: msg.into(),
            data: Value::Null,
            map_type: Some(tool.to_string()),
            operation: Some(operation.to_string()),
            execution_time: None,
            api_endpoint: "oge".to_string(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = msg.into();
        self
    }

    pub fn timed(mut self, elapsed: Duration) -> Self {
        self.execution_time = Some(elapsed.as_secs_f64());
        self
    }

    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.api_endpoint = endpoint.to_string();
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: REFRESH_TOKEN,
            description: "Refresh the backend token. Only needed after a token expiry error (40003).",
            input_schema: args::empty_schema(),
        },
        ToolDescriptor {
            name: CHECK_TOKEN_STATUS,
            description: "Inspect the stored backend token: format, expiry and owner.",
            input_schema: args::empty_schema(),
        },
        ToolDescriptor {
            name: EXECUTE_CODE_TO_DAG,
            description: "Compile an OGE script into one or more job graphs and return their ids.",
            input_schema: args::execute_code_schema(),
        },
        ToolDescriptor {
            name: SUBMIT_BATCH_TASK,
            description: "Register a batch task that runs a job graph and writes its output.",
            input_schema: args::submit_task_schema(),
        },
        ToolDescriptor {
            name: QUERY_TASK_STATUS,
            description: "Report whether a job graph is running, completed or failed.",
            input_schema: args::query_status_schema(),
        },
        ToolDescriptor {
            name: EXECUTE_DAG_WORKFLOW,
            description: "Run the whole pipeline: script to job graph, task registration, and optionally wait for completion.",
            input_schema: args::workflow_schema(),
        },
    ]
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = match args {
        Value::Null => json!({}),
        other => other,
    };
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))
}

fn or_default(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub struct Toolbox {
    client: Arc<ApiClient>,
    submission: Arc<JobSubmissionService>,
    batch: Arc<BatchTaskService>,
    status: Arc<StatusService>,
    orchestrator: WorkflowOrchestrator,
    defaults: DefaultSettings,
    workflow: WorkflowSettings,
}

impl Toolbox {
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings, Arc::new(ReqwestTransport::new()))
    }

    pub fn new(settings: &Settings, transport: Arc<dyn HttpTransport>) -> Self {
        let credentials = CredentialStore::new(
            settings
                .auth
                .initial_token
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .map(Credential::new),
        );
        let client = Arc::new(ApiClient::new(
            transport,
            credentials,
            AuthConfig::from_settings(settings),
        ));
        let backend = &settings.backend;
        let timeouts = &settings.timeouts;

        let submission = Arc::new(JobSubmissionService::new(
            client.clone(),
            &backend.dag_base_url,
            Duration::from_secs(timeouts.submit_secs),
        ));
        let batch = Arc::new(BatchTaskService::new(
            client.clone(),
            &backend.dag_base_url,
            Duration::from_secs(timeouts.register_secs),
        ));
        let status = Arc::new(StatusService::new(
            client.clone(),
            &backend.dag_base_url,
            &backend.catalog_url,
            Duration::from_secs(timeouts.status_secs),
        ));
        let orchestrator = WorkflowOrchestrator::new(
            submission.clone(),
            batch.clone(),
            status.clone(),
            settings.workflow.settle_delay(),
        );

        Self {
            client,
            submission,
            batch,
            status,
            orchestrator,
            defaults: settings.defaults.clone(),
            workflow: settings.workflow.clone(),
        }
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    pub async fn dispatch(
        &self,
        name: &str,
        args: Value,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ToolResult {
        info!("Tool call: {}", name);
        let result = match name {
            REFRESH_TOKEN => self.refresh_token(progress).await,
            CHECK_TOKEN_STATUS => self.check_token_status(),
            EXECUTE_CODE_TO_DAG => match parse_args(args) {
                Ok(a) => self.execute_code_to_dag(a, progress).await,
                Err(e) => ToolResult::failed(name, "Execute code to DAG", e),
            },
            SUBMIT_BATCH_TASK => match parse_args(args) {
                Ok(a) => self.submit_batch_task(a, progress).await,
                Err(e) => ToolResult::failed(name, "Submit batch task", e),
            },
            QUERY_TASK_STATUS => match parse_args(args) {
                Ok(a) => self.query_task_status(a, progress).await,
                Err(e) => ToolResult::failed(name, "Query task status", e),
            },
            EXECUTE_DAG_WORKFLOW => match parse_args(args) {
                Ok(a) => self.execute_dag_workflow(a, progress, cancel).await,
                Err(e) => ToolResult::failed(name, "Execute DAG workflow", e),
            },
            other => ToolResult::failed(other, "Dispatch", format!("unknown tool '{}'", other)),
        };
        if !result.success {
            warn!("Tool {} failed: {}", name, result.msg);
        }
        result
    }

    pub async fn refresh_token(&self, progress: &dyn ProgressSink) -> ToolResult {
        const OP: &str = "Refresh token";
        progress.info("Refreshing backend token...");
        let started = Instant::now();
        match self.client.refresh().await {
            Ok(credential) => {
                progress.info("Token refreshed");
                ToolResult::succ(
                    REFRESH_TOKEN,
                    OP,
                    json!({
                        "new_token": credential::preview(credential.header_value(), 50),
                        "token_length": credential.len(),
                        "updated_at": chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                    }),
                )
                .timed(started.elapsed())
                .endpoint("auth")
            }
            Err(e) => {
                progress.notify(ProgressLevel::Error, &format!("Token refresh failed: {}", e));
                ToolResult::failed(REFRESH_TOKEN, OP, format!("{} failed: {}", OP, e))
                    .timed(started.elapsed())
            }
        }
    }

    pub fn check_token_status(&self) -> ToolResult {
        const OP: &str = "Check token status";
        let Some(current) = self.client.credentials().current() else {
            return ToolResult::failed(CHECK_TOKEN_STATUS, OP, format!("{}: no token stored", OP));
        };
        ToolResult::succ(
            CHECK_TOKEN_STATUS,
            OP,
            token_report(&current, credential::now_epoch_secs()),
        )
        .endpoint("debug")
    }

    pub async fn execute_code_to_dag(&self, a: ExecuteCodeArgs, progress: &dyn ProgressSink) -> ToolResult {
        const OP: &str = "Execute code to DAG";
        let user_id = or_default(a.user_id, &self.defaults.user_id);
        let label = a.sample_name.unwrap_or_default();
        progress.info("Creating job graph from script...");

        let out = self
            .submission
            .submit(&a.code, &user_id, &label, AuthMode::from_override(a.auth_token.as_deref()))
            .await;
        let elapsed = out.elapsed;
        match out.value {
            Ok(submission) => {
                let ids = submission.dag_ids.join(", ");
                ToolResult::succ(
                    EXECUTE_CODE_TO_DAG,
                    OP,
                    serde_json::to_value(&submission).unwrap_or(Value::Null),
                )
                .with_msg(format!("{} succeeded, created job graph(s): {}", OP, ids))
                .timed(elapsed)
            }
            Err(e) => api_failure(EXECUTE_CODE_TO_DAG, OP, &e).timed(elapsed),
        }
    }

    pub async fn submit_batch_task(&self, a: SubmitTaskArgs, progress: &dyn ProgressSink) -> ToolResult {
        const OP: &str = "Submit batch task";
        let task = TaskSubmission {
            dag_id: a.dag_id,
            task_name: a.task_name,
            filename: a.filename,
            crs: or_default(a.crs, &self.defaults.crs),
            scale: or_default(a.scale, &self.defaults.scale),
            format: or_default(a.format, &self.defaults.task_format),
            username: or_default(a.username, &self.defaults.username),
            script: a.script,
        };
        progress.info(&format!("Registering batch task for {}...", task.dag_id));

        let out = self
            .batch
            .register_task(&task, AuthMode::from_override(a.auth_token.as_deref()))
            .await;
        let elapsed = out.elapsed;
        match out.value {
            Ok(record) => ToolResult::succ(SUBMIT_BATCH_TASK, OP, record.to_report()).timed(elapsed),
            Err(e) => api_failure(SUBMIT_BATCH_TASK, OP, &e).timed(elapsed),
        }
    }

    pub async fn query_task_status(&self, a: QueryStatusArgs, progress: &dyn ProgressSink) -> ToolResult {
        const OP: &str = "Query task status";
        progress.info(&format!("Querying status of {}...", a.dag_id));

        let out = self
            .status
            .query(&a.dag_id, AuthMode::from_override(a.auth_token.as_deref()))
            .await;
        let elapsed = out.elapsed;
        match out.value {
            Ok(status) => {
                let summary = if status.is_completed {
                    "completed"
                } else if status.is_failed {
                    "failed"
                } else {
                    "running"
                };
                ToolResult::succ(
                    QUERY_TASK_STATUS,
                    OP,
                    serde_json::to_value(&status).unwrap_or(Value::Null),
                )
                .with_msg(format!("{} succeeded, task is {}", OP, summary))
                .timed(elapsed)
            }
            Err(e) => api_failure(QUERY_TASK_STATUS, OP, &e).timed(elapsed),
        }
    }

    pub async fn execute_dag_workflow(
        &self,
        a: WorkflowArgs,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ToolResult {
        const OP: &str = "Execute DAG workflow";
        let req = WorkflowRequest {
            code: a.code,
            user_id: or_default(a.user_id, &self.defaults.user_id),
            sample_name: a.sample_name.unwrap_or_default(),
            task_name: a.task_name,
            filename: a.filename,
            crs: or_default(a.crs, &self.defaults.crs),
            scale: or_default(a.scale, &self.defaults.scale),
            format: or_default(a.format, &self.defaults.workflow_format),
            username: or_default(a.username, &self.defaults.username),
            auth: AuthMode::from_override(a.auth_token.as_deref()),
            auto_submit: a.auto_submit.unwrap_or(true),
            wait_for_completion: a.wait_for_completion.unwrap_or(false),
            check_interval: Duration::from_secs(
                a.check_interval.unwrap_or(self.workflow.check_interval_secs),
            ),
            max_wait: Duration::from_secs(a.max_wait_time.unwrap_or(self.workflow.max_wait_secs)),
        };

        let report = self.orchestrator.run(&req, progress, cancel).await;
        let elapsed = Duration::from_secs_f64(report.total_execution_time);
        let data = serde_json::to_value(&report).unwrap_or(Value::Null);
        let status = report.final_status;
        if report.succeeded() {
            ToolResult::succ(EXECUTE_DAG_WORKFLOW, OP, data)
                .with_msg(format!("{} finished: {}", OP, status))
                .timed(elapsed)
        } else {
            ToolResult::failed(EXECUTE_DAG_WORKFLOW, OP, format!("{} finished: {}", OP, status))
                .with_data(data)
                .timed(elapsed)
        }
    }
}

fn api_failure(tool: &str, operation: &str, err: &ApiError) -> ToolResult {
    ToolResult::failed(tool, operation, format!("{} failed: {}", operation, err)).with_data(err.to_json())
}

/// Diagnostic view of a credential; a JWT payload is decoded when present.
fn token_report(current: &Credential, now: i64) -> Value {
    let header = current.header_value();
    let mut report = json!({
        "has_token": true,
        "token_preview": current.preview(),
        "token_length": current.len(),
        "starts_with_bearer": header.starts_with("Bearer "),
        "has_double_space": header.contains("Bearer  "),
        "bearer_prefix_length": header.split_once(' ').map(|(head, _)| head.len()).unwrap_or(0),
        "current_time": chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    });

    if header.contains("Bearer ") {
        match current.claims() {
            Ok(claims) => {
                if let Some(exp) = claims.exp {
                    report["expires_timestamp"] = json!(exp);
                    report["is_expired"] = json!(now > exp);
                    if let Some(at) = chrono::DateTime::from_timestamp(exp, 0) {
                        report["expires_at"] = json!(
                            at.with_timezone(&chrono::Local)
                                .format("%Y-%m-%d %H:%M:%S")
                                .to_string()
                        );
                    }
                }
                if let Some(user) = claims.user_name {
                    report["username"] = json!(user);
                }
            }
            Err(e) => report["parse_error"] = json!(e),
        }
    }
    report
}
