//! End-to-end run: submit a script, register a task for the first job graph,
//! then optionally poll until it settles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::batch::{BatchTaskService, TaskSubmission};
use super::prune::{redact_script, strip_script};
use super::status::{ReconciledStatus, StatusService};
use super::submission::JobSubmissionService;
use crate::core::client::{ApiError, AuthMode};
use crate::core::progress::{ProgressLevel, ProgressSink};

const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub code: String,
    pub user_id: String,
    pub sample_name: String,
    pub task_name: Option<String>,
    pub filename: Option<String>,
    pub crs: String,
    pub scale: String,
    pub format: String,
    pub username: String,
    pub auth: AuthMode,
    pub auto_submit: bool,
    pub wait_for_completion: bool,
    pub check_interval: Duration,
    pub max_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    DagCreated,
    Submitted,
    Completed,
    Failed,
    Timeout,
    FailedAtDagCreation,
    NoDagGenerated,
    FailedAtTaskSubmission,
    Unknown,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::DagCreated => "dag_created",
            WorkflowStatus::Submitted => "submitted",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Timeout => "timeout",
            WorkflowStatus::FailedAtDagCreation => "failed_at_dag_creation",
            WorkflowStatus::NoDagGenerated => "no_dag_generated",
            WorkflowStatus::FailedAtTaskSubmission => "failed_at_task_submission",
            WorkflowStatus::Unknown => "unknown",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Submitted | WorkflowStatus::DagCreated
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: u8,
    pub name: &'static str,
    pub success: bool,
    pub result: Value,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub steps: Vec<StepRecord>,
    pub final_status: WorkflowStatus,
    pub dag_ids: Vec<String>,
    pub task_info: Option<Value>,
    pub final_task_status: Option<ReconciledStatus>,
    pub execution_times: BTreeMap<String, f64>,
    pub total_execution_time: f64,
}

impl WorkflowReport {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            final_status: WorkflowStatus::Unknown,
            dag_ids: Vec::new(),
            task_info: None,
            final_task_status: None,
            execution_times: BTreeMap::new(),
            total_execution_time: 0.0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.final_status.is_success()
    }

    fn record(&mut self, step: u8, name: &'static str, success: bool, result: Value, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.execution_times.insert(name.to_string(), secs);
        self.steps.push(StepRecord {
            step,
            name,
            success,
            result,
            elapsed_secs: secs,
        });
    }
}

/// How a polling loop ended.
enum WaitOutcome {
    Settled(ReconciledStatus),
    TimedOut(Option<ReconciledStatus>),
    Cancelled(Option<ReconciledStatus>),
}

pub struct WorkflowOrchestrator {
    submission: Arc<JobSubmissionService>,
    batch: Arc<BatchTaskService>,
    status: Arc<StatusService>,
    settle_delay: Duration,
}

impl WorkflowOrchestrator {
    pub fn new(
        submission: Arc<JobSubmissionService>,
        batch: Arc<BatchTaskService>,
        status: Arc<StatusService>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            submission,
            batch,
            status,
            settle_delay,
        }
    }

    pub async fn run(
        &self,
        req: &WorkflowRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> WorkflowReport {
        let started = Instant::now();
        let mut report = WorkflowReport::new();
        let status = self.execute(req, progress, cancel, &mut report).await;
        report.final_status = status;
        report.total_execution_time = started.elapsed().as_secs_f64();
        info!(
            "Workflow finished with status {} in {:.2}s",
            report.final_status, report.total_execution_time
        );
        report
    }

    async fn execute(
        &self,
        req: &WorkflowRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
        report: &mut WorkflowReport,
    ) -> WorkflowStatus {
        progress.info("Step 1: creating job graph from script");
        let submitted = self
            .submission
            .submit(&req.code, &req.user_id, &req.sample_name, req.auth.clone())
            .await;
        let elapsed = submitted.elapsed;
        let submission = match submitted.value {
            Ok(submission) => submission,
            Err(e) => {
                progress.notify(ProgressLevel::Error, &format!("Job graph creation failed: {}", e));
                report.record(1, "execute_code_to_dag", false, e.to_json(), elapsed);
                return match e {
                    ApiError::NoJobGraph => WorkflowStatus::NoDagGenerated,
                    _ => WorkflowStatus::FailedAtDagCreation,
                };
            }
        };
        let result = serde_json::to_value(&submission).unwrap_or(Value::Null);
        report.record(1, "execute_code_to_dag", true, result, elapsed);
        report.dag_ids = submission.dag_ids.clone();
        progress.info(&format!("Created {} job graph(s): {}", report.dag_ids.len(), report.dag_ids.join(", ")));

        if !req.auto_submit {
            return WorkflowStatus::DagCreated;
        }

        let dag_id = submission.dag_ids[0].clone();
        progress.info(&format!("Step 2: registering batch task for {}", dag_id));
        let task = TaskSubmission {
            dag_id: dag_id.clone(),
            task_name: req.task_name.clone(),
            filename: req.filename.clone(),
            crs: req.crs.clone(),
            scale: req.scale.clone(),
            format: req.format.clone(),
            username: req.username.clone(),
            script: req.code.clone(),
        };
        let registered = self.batch.register_task(&task, req.auth.clone()).await;
        let elapsed = registered.elapsed;
        match registered.value {
            Ok(record) => {
                let mut result = record.to_report();
                strip_script(&mut result, &req.code);
                report.task_info = Some(result.clone());
                report.record(2, "submit_batch_task", true, result, elapsed);
            }
            Err(e) => {
                let reason = redact_script(&e.to_string(), &req.code);
                progress.notify(ProgressLevel::Error, &format!("Task registration failed: {}", reason));
                let mut result = e.to_json();
                strip_script(&mut result, &req.code);
                report.record(2, "submit_batch_task", false, result, elapsed);
                return WorkflowStatus::FailedAtTaskSubmission;
            }
        }

        if !req.wait_for_completion {
            return WorkflowStatus::Submitted;
        }

        let wait_started = Instant::now();
        let outcome = self.wait_for(&dag_id, req, progress, cancel).await;
        let wait_elapsed = wait_started.elapsed();

        let (status, last, reason) = match outcome {
            WaitOutcome::Settled(s) if s.is_completed => (WorkflowStatus::Completed, Some(s), None),
            WaitOutcome::Settled(s) => (WorkflowStatus::Failed, Some(s), None),
            WaitOutcome::TimedOut(s) => (WorkflowStatus::Timeout, s, Some("max wait exceeded")),
            WaitOutcome::Cancelled(s) => (WorkflowStatus::Timeout, s, Some("cancelled")),
        };
        let result = serde_json::json!({
            "dag_id": dag_id,
            "final_status": status,
            "reason": reason,
            "waited_secs": wait_elapsed.as_secs_f64(),
            "last_status": last,
        });
        report.record(3, "wait_for_completion", status == WorkflowStatus::Completed, result, wait_elapsed);
        report.final_task_status = last;
        status
    }

    async fn wait_for(
        &self,
        dag_id: &str,
        req: &WorkflowRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        progress.info(&format!(
            "Step 3: waiting {:?} before polling {}",
            self.settle_delay, dag_id
        ));
        tokio::select! {
            _ = cancel.cancelled() => return WaitOutcome::Cancelled(None),
            _ = tokio::time::sleep(self.settle_delay) => {}
        }

        let interval = req.check_interval.max(MIN_CHECK_INTERVAL);
        // An unrepresentable deadline means the wait is bounded only by cancellation.
        let deadline = Instant::now().checked_add(req.max_wait);
        let mut last: Option<ReconciledStatus> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.status.query(dag_id, req.auth.clone()).await.value {
                Ok(status) if status.is_terminal() => {
                    progress.info(&format!(
                        "Task {} finished: {}",
                        dag_id,
                        status.final_state.as_deref().unwrap_or("unknown")
                    ));
                    return WaitOutcome::Settled(status);
                }
                Ok(status) => {
                    progress.info(&format!("Poll {}: {} is {}", attempt, dag_id, status.status));
                    last = Some(status);
                }
                Err(e) => {
                    warn!("Status poll {} for {} failed: {}", attempt, dag_id, e);
                    progress.notify(ProgressLevel::Warning, &format!("Poll {} failed: {}", attempt, e));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    progress.notify(ProgressLevel::Warning, "Wait cancelled");
                    return WaitOutcome::Cancelled(last);
                }
                _ = tokio::time::sleep(interval) => {}
            }

            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                progress.notify(
                    ProgressLevel::Warning,
                    &format!("Gave up on {} after {:?}", dag_id, req.max_wait),
                );
                return WaitOutcome::TimedOut(last);
            }
        }
    }
}

#[cfg(test)]
mod tests;
