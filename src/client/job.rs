//! Handle to a server-side job.
//!
//! Epistemic foundation:
//! - K_i: A job is addressed by project, job ID and (optionally) location
//! - B_i: The job reaches `Done` within `max_poll_attempts` polls (might not)
//! - I^B: Failed jobs report a fatal `errorResult` in their status

use crate::client::RowIterator;
use crate::client::bigquery::{ClientInner, validate_id};
use crate::models::{BqError, JobResource, JobStatus, Result};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct CancelResponse {
    job: JobResource,
}

#[derive(Clone)]
pub struct Job {
    inner: Arc<ClientInner>,
    project_id: String,
    job_id: String,
    location: Option<String>,
}

impl Job {
    pub(crate) fn from_resource(inner: Arc<ClientInner>, resource: JobResource) -> Self {
        let reference = resource.job_reference;
        Self {
            inner,
            project_id: reference.project_id,
            job_id: reference.job_id,
            location: reference.location,
        }
    }

    pub fn id(&self) -> &str {
        &self.job_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Region the job runs in, when the service reported one.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    fn location_param(&self) -> Vec<(&'static str, String)> {
        self.location
            .iter()
            .map(|l| ("location", l.clone()))
            .collect()
    }

    /// Fetch the job's current status.
    pub async fn status(&self) -> Result<JobStatus> {
        validate_id("job", &self.job_id)?;
        let path = format!("/projects/{}/jobs/{}", self.project_id, self.job_id);
        let resource: JobResource = self
            .inner
            .transport
            .get(&path, &self.location_param())
            .await?;
        JobStatus::from_wire(resource.status)
    }

    /// Poll until the job is done.
    ///
    /// B_i(job completes) → Ok(status)
    /// I^B(job failed) → `BqError::JobFailed`
    /// I^B(still running after `max_poll_attempts`) → `BqError::PollExhausted`
    pub async fn wait(&self) -> Result<JobStatus> {
        let max_attempts = self.inner.query.max_poll_attempts.max(1);

        for attempt in 0..max_attempts {
            let status = self.status().await?;
            if status.done() {
                if let Some(detail) = status.error {
                    warn!(job_id = %self.job_id, reason = %detail.reason, "Job failed");
                    return Err(BqError::JobFailed {
                        job_id: self.job_id.clone(),
                        detail,
                    });
                }
                info!(job_id = %self.job_id, polls = attempt + 1, "Job done");
                return Ok(status);
            }

            debug!(job_id = %self.job_id, state = %status.state, attempt = attempt, "Job not done yet");
            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.inner.poll_interval()).await;
            }
        }

        Err(BqError::PollExhausted {
            job_id: self.job_id.clone(),
            attempts: max_attempts,
        })
    }

    /// Cursor over the job's query results.
    ///
    /// Results that are not ready yet are re-polled by the cursor.
    pub fn read(&self) -> RowIterator {
        RowIterator::for_job(
            Arc::clone(&self.inner),
            self.project_id.clone(),
            self.job_id.clone(),
            self.location.clone(),
        )
    }

    /// Ask the service to cancel the job. Returns the status after the request.
    ///
    /// Cancellation is best effort: the job may still complete.
    pub async fn cancel(&self) -> Result<JobStatus> {
        validate_id("job", &self.job_id)?;
        let path = format!("/projects/{}/jobs/{}/cancel", self.project_id, self.job_id);
        let response: CancelResponse = self
            .inner
            .transport
            .post_with_query(&path, &self.location_param(), &serde_json::json!({}))
            .await?;
        info!(job_id = %self.job_id, "Requested job cancellation");
        JobStatus::from_wire(response.job.status)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("project_id", &self.project_id)
            .field("job_id", &self.job_id)
            .field("location", &self.location)
            .finish()
    }
}
