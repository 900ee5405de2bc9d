//! Query builder.
//!
//! K_i: `jobs.query` runs a query and waits briefly for the first page.
//! K_i: `jobs.insert` submits a query job and returns immediately.

use crate::client::bigquery::{ClientInner, validate_id};
use crate::client::{Job, RowIterator};
use crate::models::{
    BqError, DatasetReference, InsertJobRequest, JobConfiguration, JobReference, JobResource,
    QueryJobConfig, QueryRequest, QueryResultsResponse, Result,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A query to run in this client's project.
///
/// Fields may be changed before calling `read` or `run`.
#[derive(Clone)]
pub struct Query {
    inner: Arc<ClientInner>,
    /// Query text
    pub sql: String,
    /// Project of the default dataset (client project when None)
    pub default_project_id: Option<String>,
    /// Dataset used to resolve unqualified table names
    pub default_dataset_id: Option<String>,
    pub use_legacy_sql: bool,
    /// Job ID for `run` (generated when None)
    pub job_id: Option<String>,
    /// Rows per result page
    pub max_results: Option<u32>,
}

impl Query {
    pub(crate) fn new(inner: Arc<ClientInner>, sql: String) -> Self {
        let use_legacy_sql = inner.query.use_legacy_sql;
        let max_results = inner.page_size;
        Self {
            inner,
            sql,
            default_project_id: None,
            default_dataset_id: None,
            use_legacy_sql,
            job_id: None,
            max_results,
        }
    }

    /// Resolve unqualified table names against `dataset_id` in this client's project.
    pub fn default_dataset(mut self, dataset_id: impl Into<String>) -> Self {
        self.default_dataset_id = Some(dataset_id.into());
        self
    }

    fn dataset_reference(&self) -> Result<Option<DatasetReference>> {
        let Some(dataset_id) = &self.default_dataset_id else {
            return Ok(None);
        };
        let project_id = self
            .default_project_id
            .clone()
            .unwrap_or_else(|| self.inner.project_id.clone());
        validate_id("project", &project_id)?;
        validate_id("dataset", dataset_id)?;
        Ok(Some(DatasetReference {
            project_id,
            dataset_id: dataset_id.clone(),
        }))
    }

    fn check_sql(&self) -> Result<()> {
        if self.sql.trim().is_empty() {
            return Err(BqError::InvalidInput("Empty query".to_string()));
        }
        Ok(())
    }

    /// Run the query and return a cursor over its results.
    ///
    /// B_i(query valid) → Result (a rejected query surfaces as `BqError::Api`)
    /// I^R(job not complete yet) → the cursor polls for results
    pub async fn read(&self) -> Result<RowIterator> {
        self.check_sql()?;
        let request = QueryRequest {
            query: self.sql.clone(),
            default_dataset: self.dataset_reference()?,
            use_legacy_sql: self.use_legacy_sql,
            max_results: self.max_results,
            request_id: Some(Uuid::new_v4().to_string()),
        };
        let path = format!("/projects/{}/queries", self.inner.project_id);
        let response: QueryResultsResponse = self.inner.transport.post(&path, &request).await?;

        let reference = response.job_reference.clone().ok_or_else(|| {
            BqError::ParseError("Query response has no jobReference".to_string())
        })?;
        debug!(
            job_id = %reference.job_id,
            complete = response.job_complete,
            rows = response.rows.len(),
            "Query started"
        );

        let mut rows = RowIterator::for_job(
            Arc::clone(&self.inner),
            reference.project_id,
            reference.job_id,
            reference.location,
        );
        rows.max_results = self.max_results;
        rows.seed(response)?;
        Ok(rows)
    }

    /// Submit the query as a job without waiting for it.
    ///
    /// The job ID is fixed before the first attempt, so a 409 on insert
    /// resolves to the existing job with that ID.
    pub async fn run(&self) -> Result<Job> {
        self.check_sql()?;
        let job_id = match &self.job_id {
            Some(id) => {
                validate_id("job", id)?;
                id.clone()
            }
            None => format!("bqclient_{}", Uuid::new_v4().simple()),
        };
        let request = InsertJobRequest {
            job_reference: JobReference {
                project_id: self.inner.project_id.clone(),
                job_id: job_id.clone(),
                location: None,
            },
            configuration: JobConfiguration {
                query: QueryJobConfig {
                    query: self.sql.clone(),
                    default_dataset: self.dataset_reference()?,
                    use_legacy_sql: self.use_legacy_sql,
                },
            },
        };
        let path = format!("/projects/{}/jobs", self.inner.project_id);
        let resource: JobResource = match self.inner.transport.post(&path, &request).await {
            Ok(resource) => resource,
            // A retried insert answers 409 when an earlier attempt was committed
            Err(e) if e.is_already_exists() => {
                warn!(job_id = %job_id, "Job already exists, fetching it");
                self.inner
                    .transport
                    .get(&format!("{path}/{job_id}"), &[])
                    .await?
            }
            Err(e) => return Err(e),
        };

        let job = Job::from_resource(Arc::clone(&self.inner), resource);
        info!(job_id = %job.id(), "Submitted query job");
        Ok(job)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql)
            .field("default_project_id", &self.default_project_id)
            .field("default_dataset_id", &self.default_dataset_id)
            .field("use_legacy_sql", &self.use_legacy_sql)
            .field("job_id", &self.job_id)
            .field("max_results", &self.max_results)
            .finish()
    }
}
