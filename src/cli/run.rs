use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::RunCommandArgs;
use crate::core::config::Settings;
use crate::core::progress::{ProgressLevel, ProgressSink};
use crate::core::terminal;
use crate::core::tools::{self, ToolResult, Toolbox};

/// Progress printed to the terminal as the workflow advances.
struct TerminalProgress;

impl ProgressSink for TerminalProgress {
    fn notify(&self, level: ProgressLevel, message: &str) {
        match level {
            ProgressLevel::Info => terminal::print_info(message),
            ProgressLevel::Warning => terminal::print_warn(message),
            ProgressLevel::Error => terminal::print_error(message),
        }
    }
}

fn finish(result: ToolResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.success {
        terminal::print_success(&result.msg);
        Ok(())
    } else {
        Err(anyhow!(result.msg))
    }
}

pub(super) async fn status(settings: &Settings, dag_id: &str) -> Result<()> {
    let toolbox = Toolbox::from_settings(settings);
    let result = toolbox
        .dispatch(
            tools::QUERY_TASK_STATUS,
            json!({ "dag_id": dag_id }),
            &TerminalProgress,
            &CancellationToken::new(),
        )
        .await;
    finish(result)
}

pub(super) async fn workflow(settings: &Settings, args: RunCommandArgs) -> Result<()> {
    let path = args
        .code_file
        .ok_or_else(|| anyhow!("--code-file is required"))?;
    let code = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read script {}", path.display()))?;

    let mut call = json!({
        "code": code,
        "auto_submit": args.auto_submit,
        "wait_for_completion": args.wait,
    });
    let optional = [
        ("check_interval", args.interval.map(|v| json!(v))),
        ("max_wait_time", args.max_wait.map(|v| json!(v))),
        ("task_name", args.task_name.map(|v| json!(v))),
        ("filename", args.filename.map(|v| json!(v))),
        ("format", args.format.map(|v| json!(v))),
        ("sample_name", args.sample_name.map(|v| json!(v))),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            call[key] = value;
        }
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            terminal::print_warn("Interrupted, stopping the wait...");
            on_interrupt.cancel();
        }
    });

    let toolbox = Toolbox::from_settings(settings);
    let result = toolbox
        .dispatch(tools::EXECUTE_DAG_WORKFLOW, call, &TerminalProgress, &cancel)
        .await;
    finish(result)
}
