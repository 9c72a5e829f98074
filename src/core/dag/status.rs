//! Reconcile the live engine state with the persisted result catalog.
//!
//! The live endpoint only knows whether a job is still running; once it stops,
//! the catalog row tells success from failure. A job absent from the catalog
//! after it stopped running is treated as failed.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::types::{RunState, TerminalOutcome};
use crate::core::client::{ApiClient, ApiError, AuthMode, Payload, RemoteCall, Timed};

#[derive(Debug, Clone, Serialize)]
pub struct ReconciledStatus {
    pub dag_id: String,
    /// Live engine answer as received.
    pub status: String,
    pub engine_state: RunState,
    pub is_running: bool,
    pub is_completed: bool,
    pub is_failed: bool,
    pub final_state: Option<String>,
    pub outcome: Option<TerminalOutcome>,
    pub catalog_entry: Option<Value>,
}

impl ReconciledStatus {
    fn running(dag_id: &str, status: String, engine_state: RunState) -> Self {
        Self {
            dag_id: dag_id.to_string(),
            status,
            engine_state,
            is_running: true,
            is_completed: false,
            is_failed: false,
            final_state: None,
            outcome: None,
            catalog_entry: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_completed || self.is_failed
    }
}

fn live_state(payload: Payload) -> String {
    match payload {
        Payload::Text(s) => s,
        Payload::Empty => RunState::Unknown.as_str().to_string(),
        Payload::Json(Value::String(s)) => s,
        Payload::Json(Value::Object(map)) => match map.get("status") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => Value::Object(map).to_string(),
        },
        Payload::Json(other) => other.to_string(),
    }
}

pub struct StatusService {
    client: Arc<ApiClient>,
    state_endpoint: String,
    catalog_url: String,
    timeout: Duration,
}

impl StatusService {
    pub fn new(
        client: Arc<ApiClient>,
        dag_base_url: &str,
        catalog_url: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            state_endpoint: format!("{}/getState", dag_base_url.trim_end_matches('/')),
            catalog_url: catalog_url.to_string(),
            timeout,
        }
    }

    pub async fn query(&self, dag_id: &str, auth: AuthMode) -> Timed<Result<ReconciledStatus, ApiError>> {
        let started = std::time::Instant::now();
        let result = self.reconcile(dag_id, auth).await;
        Timed::new(result, started.elapsed())
    }

    async fn reconcile(&self, dag_id: &str, auth: AuthMode) -> Result<ReconciledStatus, ApiError> {
        let call = RemoteCall::get(&self.state_endpoint)
            .query("dagId", dag_id)
            .auth(auth.clone())
            .timeout(self.timeout);
        let status = live_state(self.client.call(&call).await.value?);
        let engine_state = RunState::from_status(&status);
        debug!("Live state for {}: {}", dag_id, status);

        if engine_state.is_running() {
            return Ok(ReconciledStatus::running(dag_id, status, engine_state));
        }

        let call = RemoteCall::get(&self.catalog_url)
            .query("dagId", dag_id)
            .auth(auth)
            .timeout(self.timeout);
        let catalog = match self.client.call(&call).await.value {
            Ok(payload) => payload.into_value(),
            Err(e) => {
                warn!("Catalog lookup for {} failed: {}", dag_id, e);
                Value::Null
            }
        };

        let entry = catalog
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| {
                rows.iter()
                    .find(|row| row.get("dagId").and_then(Value::as_str) == Some(dag_id))
            })
            .cloned();

        let Some(entry) = entry else {
            info!("No catalog row for {} after it stopped running", dag_id);
            return Ok(ReconciledStatus {
                dag_id: dag_id.to_string(),
                status,
                engine_state,
                is_running: false,
                is_completed: false,
                is_failed: true,
                final_state: Some(RunState::Unknown.as_str().to_string()),
                outcome: Some(TerminalOutcome::Failed),
                catalog_entry: None,
            });
        };

        let row_state = entry
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let catalog_state = RunState::from_status(&row_state);

        let (is_completed, is_failed, outcome) = if catalog_state == RunState::Success {
            (true, false, Some(TerminalOutcome::Completed))
        } else if catalog_state.is_failure() {
            (false, true, Some(TerminalOutcome::Failed))
        } else {
            debug!("Catalog row for {} is still '{}'", dag_id, row_state);
            (false, false, None)
        };

        Ok(ReconciledStatus {
            dag_id: dag_id.to_string(),
            status,
            engine_state,
            is_running: outcome.is_none(),
            is_completed,
            is_failed,
            final_state: Some(row_state),
            outcome,
            catalog_entry: Some(entry),
        })
    }
}
