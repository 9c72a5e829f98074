use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Run state as reported by the live engine or the result catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Starting,
    Running,
    Success,
    Failed,
    Error,
    Dead,
    Killed,
    Unknown,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Failed => "failed",
            RunState::Error => "error",
            RunState::Dead => "dead",
            RunState::Killed => "killed",
            RunState::Unknown => "unknown",
        }
    }

    pub fn from_status(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "starting" => RunState::Starting,
            "running" => RunState::Running,
            "success" => RunState::Success,
            "failed" => RunState::Failed,
            "error" => RunState::Error,
            "dead" => RunState::Dead,
            "killed" => RunState::Killed,
            _ => RunState::Unknown,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, RunState::Starting | RunState::Running)
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RunState::Failed | RunState::Error | RunState::Dead | RunState::Killed
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Completed,
    Failed,
}

/// One value of the `dags` mapping returned by `executeCode`. A nested object
/// is keyed by its id; a bare string is the id itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DagEntry {
    Graph(Map<String, Value>),
    Id(String),
    Other(Value),
}

impl DagEntry {
    pub fn graph_id<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        match self {
            DagEntry::Graph(_) => Some(key),
            DagEntry::Id(id) => Some(id),
            DagEntry::Other(_) => None,
        }
    }
}

/// The `dags` mapping in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DagTable(pub Vec<(String, DagEntry)>);

impl DagTable {
    /// Job graph ids in discovery order, without duplicates.
    pub fn graph_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for (key, entry) in &self.0 {
            if let Some(id) = entry.graph_id(key)
                && !ids.iter().any(|existing| existing == id)
            {
                ids.push(id.to_string());
            }
        }
        ids
    }
}

impl<'de> Deserialize<'de> for DagTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = DagTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of job graph entries")
            }

            fn visit_unit<E>(self) -> Result<DagTable, E> {
                Ok(DagTable::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<DagTable, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, entry)) = map.next_entry::<String, DagEntry>()? {
                    entries.push((key, entry));
                }
                Ok(DagTable(entries))
            }
        }

        deserializer.deserialize_any(TableVisitor)
    }
}

/// Accepts a string, a number, or null, so loosely-typed backend fields do not
/// fail the whole record.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// A batch task registered against one job graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(default, rename = "batchSessionId", deserialize_with = "lenient_string")]
    pub batch_session_id: Option<String>,
    #[serde(default, rename = "id", deserialize_with = "lenient_string")]
    pub task_id: Option<String>,
    #[serde(default, rename = "dagId", deserialize_with = "lenient_string")]
    pub dag_id: Option<String>,
    #[serde(default, rename = "taskName", deserialize_with = "lenient_string")]
    pub task_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub format: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub scale: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub crs: Option<String>,
    #[serde(default, rename = "userId", deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    #[serde(default, rename = "userName", deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub folder: Option<String>,
    /// Full backend response with the script removed.
    #[serde(skip_deserializing, default)]
    pub api_response: Value,
}

impl TaskRecord {
    /// Report form with snake_case keys.
    pub fn to_report(&self) -> Value {
        serde_json::json!({
            "batch_session_id": self.batch_session_id,
            "task_id": self.task_id,
            "dag_id": self.dag_id,
            "task_name": self.task_name,
            "state": self.state,
            "filename": self.filename,
            "format": self.format,
            "scale": self.scale,
            "crs": self.crs,
            "user_id": self.user_id,
            "username": self.username,
            "folder": self.folder,
            "api_response": self.api_response,
        })
    }
}
