use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub level: ProgressLevel,
    pub message: String,
}

/// Receives human-readable progress notes while a tool runs.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, level: ProgressLevel, message: &str);

    fn info(&self, message: &str) {
        self.notify(ProgressLevel::Info, message);
    }
}

/// Routes progress into the log only.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn notify(&self, level: ProgressLevel, message: &str) {
        match level {
            ProgressLevel::Info => info!("{}", message),
            ProgressLevel::Warning => warn!("{}", message),
            ProgressLevel::Error => error!("{}", message),
        }
    }
}

/// Forwards progress to a channel (the MCP writer turns these into
/// `notifications/message`).
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgress {
    fn notify(&self, level: ProgressLevel, message: &str) {
        let _ = self.tx.send(ProgressEvent {
            level,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl RecordingProgress {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }
}

#[cfg(test)]
impl ProgressSink for RecordingProgress {
    fn notify(&self, level: ProgressLevel, message: &str) {
        self.events.lock().unwrap().push(ProgressEvent {
            level,
            message: message.to_string(),
        });
    }
}
