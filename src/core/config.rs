//! Runtime settings: a TOML file layered with named environments and
//! `OGE_MCP_*` environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_ENV_VAR: &str = "OGE_MCP_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub active_environment: Option<String>,
    pub server: ServerSettings,
    pub backend: BackendSettings,
    pub auth: AuthSettings,
    pub defaults: DefaultSettings,
    pub workflow: WorkflowSettings,
    pub timeouts: TimeoutSettings,
    pub logging: LoggingSettings,
    pub environments: HashMap<String, EnvironmentOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub name: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub auth_url: String,
    pub dag_base_url: String,
    pub catalog_url: String,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: String,
    /// Credential to start with, in `"<tokenHead> <token>"` form.
    pub initial_token: Option<String>,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("username", &self.username)
            .field("password", &"***")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("scopes", &self.scopes)
            .field("initial_token", &self.initial_token.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultSettings {
    pub user_id: String,
    pub username: String,
    pub crs: String,
    pub scale: String,
    pub task_format: String,
    pub workflow_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Wait before the first status poll; the backend needs a moment before a
    /// freshly registered task is queryable.
    pub settle_delay_secs: u64,
    pub check_interval_secs: u64,
    pub max_wait_secs: u64,
}

impl WorkflowSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub auth_secs: u64,
    pub submit_secs: u64,
    pub register_secs: u64,
    pub status_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

/// Partial override applied on top of the base settings when an environment
/// is selected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentOverride {
    pub auth_url: Option<String>,
    pub dag_base_url: Option<String>,
    pub catalog_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub user_id: Option<String>,
    pub default_username: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            active_environment: None,
            server: ServerSettings::default(),
            backend: BackendSettings::default(),
            auth: AuthSettings::default(),
            defaults: DefaultSettings::default(),
            workflow: WorkflowSettings::default(),
            timeouts: TimeoutSettings::default(),
            logging: LoggingSettings::default(),
            environments: HashMap::new(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "oge-dag-mcp".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            auth_url: "http://127.0.0.1/api/oauth/token".to_string(),
            dag_base_url: "http://127.0.0.1/api/oge-dag-22".to_string(),
            catalog_url: "http://127.0.0.1/api/asset/batch-result/catalog".to_string(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            username: "edu_admin".to_string(),
            password: String::new(),
            client_id: "test".to_string(),
            client_secret: String::new(),
            scopes: "web".to_string(),
            initial_token: None,
        }
    }
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            username: "edu_admin".to_string(),
            crs: "EPSG:4326".to_string(),
            scale: "1000".to_string(),
            task_format: "geojson".to_string(),
            workflow_format: "tif".to_string(),
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            settle_delay_secs: 10,
            check_interval_secs: 10,
            max_wait_secs: 300,
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            auth_secs: 30,
            submit_secs: 300,
            register_secs: 300,
            status_secs: 30,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Settings {
    /// Resolve and load settings. An explicit path must exist; the implicit
    /// locations fall back to built-in defaults when absent.
    pub fn load(explicit: Option<&Path>, environment: Option<&str>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
            .or_else(|| {
                dirs::config_dir()
                    .map(|d| d.join("oge-mcp").join("config.toml"))
                    .filter(|p| p.exists())
            });

        let mut settings = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        let selected = environment
            .map(str::to_string)
            .or_else(|| settings.active_environment.clone());
        if let Some(name) = selected {
            settings.apply_environment(&name)?;
        }
        settings.apply_env_vars(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_environment(&mut self, name: &str) -> Result<(), ConfigError> {
        let env = self
            .environments
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))?;

        if let Some(v) = env.auth_url {
            self.backend.auth_url = v;
        }
        if let Some(v) = env.dag_base_url {
            self.backend.dag_base_url = v;
        }
        if let Some(v) = env.catalog_url {
            self.backend.catalog_url = v;
        }
        if let Some(v) = env.username {
            self.auth.username = v;
        }
        if let Some(v) = env.password {
            self.auth.password = v;
        }
        if let Some(v) = env.user_id {
            self.defaults.user_id = v;
        }
        if let Some(v) = env.default_username {
            self.defaults.username = v;
        }
        self.active_environment = Some(name.to_string());
        Ok(())
    }

    pub fn apply_env_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OGE_MCP_USERNAME") {
            self.auth.username = v;
        }
        if let Some(v) = lookup("OGE_MCP_PASSWORD") {
            self.auth.password = v;
        }
        if let Some(v) = lookup("OGE_MCP_TOKEN") {
            self.auth.initial_token = Some(v);
        }
        if let Some(v) = lookup("OGE_MCP_AUTH_URL") {
            self.backend.auth_url = v;
        }
        if let Some(v) = lookup("OGE_MCP_DAG_URL") {
            self.backend.dag_base_url = v;
        }
        if let Some(v) = lookup("OGE_MCP_CATALOG_URL") {
            self.backend.catalog_url = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("timeouts.auth_secs", self.timeouts.auth_secs),
            ("timeouts.submit_secs", self.timeouts.submit_secs),
            ("timeouts.register_secs", self.timeouts.register_secs),
            ("timeouts.status_secs", self.timeouts.status_secs),
            ("workflow.check_interval_secs", self.workflow.check_interval_secs),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        for (field, url) in [
            ("backend.auth_url", &self.backend.auth_url),
            ("backend.dag_base_url", &self.backend.dag_base_url),
            ("backend.catalog_url", &self.backend.catalog_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("'{}' is not an http(s) URL", url),
                });
            }
        }
        Ok(())
    }
}
