//! Configuration models for bqclient.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;

/// Top-level configuration for bqclient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings for the BigQuery REST API
    pub client: ClientConfig,

    /// Query and job polling defaults
    #[serde(default)]
    pub query: QueryConfig,
}

/// Connection settings.
///
/// K_i: The client only ever talks to one project's REST surface.
/// B_i: A bearer token minted elsewhere is valid for that project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Project that owns datasets and jobs (supports ${ENV_VAR})
    pub project_id: String,

    /// Bearer token (can also be set via BIGQUERY_ACCESS_TOKEN env var)
    #[serde(default)]
    pub access_token: Option<String>,

    /// Environment variable name for the bearer token
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Base URL for the REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Additional attempts after a transient failure (429, 5xx, network)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubles on each further attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Page size for list and read cursors (service default when unset)
    #[serde(default)]
    pub page_size: Option<u32>,
}

fn default_access_token_env() -> String {
    "BIGQUERY_ACCESS_TOKEN".to_string()
}

fn default_base_url() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

impl ClientConfig {
    /// Settings for `project_id` with every other field at its default.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            access_token: None,
            access_token_env: default_access_token_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            page_size: None,
        }
    }
}

/// Query defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Use legacy SQL dialect instead of standard SQL
    #[serde(default)]
    pub use_legacy_sql: bool,

    /// Delay between job status polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up waiting on a job after this many polls
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_attempts() -> u32 {
    300
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            use_legacy_sql: false,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the project ID, expanding ${VAR} placeholders.
    pub fn resolve_project_id(&self) -> Result<String, ConfigError> {
        let project_id = expand_env_vars(&self.client.project_id);
        if project_id.trim().is_empty() || project_id.contains("${") {
            return Err(ConfigError::MissingProjectId(self.client.project_id.clone()));
        }
        Ok(project_id)
    }

    /// Resolve the bearer token from config or environment.
    ///
    /// B_i(token available) → Result
    pub fn resolve_access_token(&self) -> Result<String, ConfigError> {
        // First check explicit access_token in config
        if let Some(token) = &self.client.access_token {
            return Ok(expand_env_vars(token));
        }

        // Then check environment variable
        std::env::var(&self.client.access_token_env).map_err(|_| ConfigError::MissingAccessToken {
            env_var: self.client.access_token_env.clone(),
        })
    }
}

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
/// - I^B materialized: Missing required values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing access token: set {env_var} env var or access_token in config")]
    MissingAccessToken { env_var: String },

    #[error("Missing project id (configured value: '{0}')")]
    MissingProjectId(String),
}
