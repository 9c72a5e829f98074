use anyhow::{Result, anyhow};
use tokio_util::sync::CancellationToken;

use crate::core::config::Settings;
use crate::core::progress::LogProgress;
use crate::core::terminal::{self, print_status};
use crate::core::tools::{self, Toolbox};

pub(super) async fn run(settings: &Settings, sub_cmd: &str) -> Result<()> {
    let toolbox = Toolbox::from_settings(settings);
    let name = match sub_cmd {
        "refresh" => tools::REFRESH_TOKEN,
        "status" => tools::CHECK_TOKEN_STATUS,
        _ => {
            return Err(anyhow!(
                "Unknown or missing token command. Expected: refresh, status"
            ));
        }
    };

    let result = toolbox
        .dispatch(name, serde_json::json!({}), &LogProgress, &CancellationToken::new())
        .await;
    if !result.success {
        return Err(anyhow!(result.msg));
    }

    terminal::print_success(&result.msg);
    if let Some(fields) = result.data.as_object() {
        for (key, value) in fields {
            let shown = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            print_status(key, &shown);
        }
    }
    Ok(())
}
