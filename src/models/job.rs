//! Job status and the REST shapes of jobs and query results.

use crate::models::{BqError, ErrorDetail, Result, TableSchema};
use crate::models::metadata::{DatasetReference, int64_string};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Done,
}

impl JobState {
    fn from_wire(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "DONE" => Ok(JobState::Done),
            other => Err(BqError::ParseError(format!("Unknown job state: {other}"))),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Done => write!(f, "done"),
        }
    }
}

/// Status of a job.
///
/// K_i: A job that is `Done` with an `error` has failed; `errors` may list
/// non-fatal problems even for successful jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    /// Fatal error, if the job failed
    pub error: Option<ErrorDetail>,
    /// All errors encountered while running
    pub errors: Vec<ErrorDetail>,
}

impl JobStatus {
    pub fn done(&self) -> bool {
        self.state == JobState::Done
    }

    /// The fatal error, if any.
    pub fn err(&self) -> Option<&ErrorDetail> {
        self.error.as_ref()
    }

    pub(crate) fn from_wire(wire: Option<JobStatusResource>) -> Result<Self> {
        let Some(wire) = wire else {
            // Freshly inserted jobs may come back without a status block
            return Ok(Self {
                state: JobState::Pending,
                error: None,
                errors: Vec::new(),
            });
        };
        Ok(Self {
            state: JobState::from_wire(&wire.state)?,
            error: wire.error_result,
            errors: wire.errors,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════
// REST resources
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobStatusResource {
    pub state: String,
    #[serde(default)]
    pub error_result: Option<ErrorDetail>,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

/// `jobs` resource as returned by `jobs.get` / `jobs.insert`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobResource {
    pub job_reference: JobReference,
    #[serde(default)]
    pub status: Option<JobStatusResource>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryJobConfig {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_dataset: Option<DatasetReference>,
    pub use_legacy_sql: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobConfiguration {
    pub query: QueryJobConfig,
}

/// Body of `jobs.insert`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InsertJobRequest {
    pub job_reference: JobReference,
    pub configuration: JobConfiguration,
}

/// Body of `jobs.query`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_dataset: Option<DatasetReference>,
    pub use_legacy_sql: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Response of `jobs.query` and `jobs.getQueryResults`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryResultsResponse {
    pub job_reference: Option<JobReference>,
    #[serde(default)]
    pub job_complete: bool,
    #[serde(default)]
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default, with = "int64_string")]
    pub total_rows: Option<i64>,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}
