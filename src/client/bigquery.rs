//! BigQuery client entry point.

use crate::client::{Dataset, DatasetIterator, Job, Query, Transport, TransportStats};
use crate::models::{BqError, ClientConfig, Config, JobResource, QueryConfig, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// State shared by every handle created from one `Client`.
pub(crate) struct ClientInner {
    pub(crate) transport: Transport,
    pub(crate) project_id: String,
    /// Page size for list/read cursors (service default when None)
    pub(crate) page_size: Option<u32>,
    pub(crate) query: QueryConfig,
}

impl ClientInner {
    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.query.poll_interval_ms)
    }
}

/// Client for one project's datasets, tables and jobs.
///
/// Cheap to clone: all clones share one HTTP connection pool.
///
/// # Example
///
/// ```ignore
/// use bqclient::{Client, Config};
///
/// let config = Config::from_file("bqclient.toml".as_ref())?;
/// let client = Client::from_config(&config)?;
///
/// let mut it = client.query("select 17").read().await?;
/// while let Some(row) = it.next().await? {
///     println!("{row:?}");
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client for `config.project_id`.
    ///
    /// # Arguments
    /// - `config`: Connection settings
    /// - `access_token`: Bearer token (None for emulators that skip auth)
    pub fn new(config: &ClientConfig, access_token: Option<String>) -> Result<Self> {
        Self::with_query_config(config, access_token, QueryConfig::default())
    }

    /// Create a client with explicit query/polling defaults.
    pub fn with_query_config(
        config: &ClientConfig,
        access_token: Option<String>,
        query: QueryConfig,
    ) -> Result<Self> {
        validate_id("project", &config.project_id)?;
        let transport = Transport::new(config, access_token)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                project_id: config.project_id.clone(),
                page_size: config.page_size.filter(|n| *n > 0),
                query,
            }),
        })
    }

    /// Build a client from a loaded configuration file.
    ///
    /// B_i(project id resolvable) → Result
    /// B_i(access token resolvable) → Result
    pub fn from_config(config: &Config) -> Result<Self> {
        let project_id = config.resolve_project_id()?;
        let access_token = config.resolve_access_token()?;
        let client_config = ClientConfig {
            project_id,
            ..config.client.clone()
        };
        Self::with_query_config(&client_config, Some(access_token), config.query.clone())
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// Handle to a dataset in this client's project. No request is made.
    pub fn dataset(&self, dataset_id: impl Into<String>) -> Dataset {
        Dataset::new(
            Arc::clone(&self.inner),
            self.inner.project_id.clone(),
            dataset_id.into(),
        )
    }

    /// Handle to a dataset in another project. No request is made.
    pub fn dataset_in_project(
        &self,
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
    ) -> Dataset {
        Dataset::new(Arc::clone(&self.inner), project_id.into(), dataset_id.into())
    }

    /// Cursor over the datasets of this client's project.
    pub fn datasets(&self) -> DatasetIterator {
        DatasetIterator::new(Arc::clone(&self.inner), self.inner.project_id.clone())
    }

    /// Build a query. Nothing is sent until `read` or `run`.
    pub fn query(&self, sql: impl Into<String>) -> Query {
        Query::new(Arc::clone(&self.inner), sql.into())
    }

    /// Look up an existing job by ID.
    ///
    /// B_i(job exists) → Result (404 surfaces as `BqError::Api`)
    pub async fn job_from_id(&self, job_id: &str) -> Result<Job> {
        validate_id("job", job_id)?;
        let path = format!("/projects/{}/jobs/{job_id}", self.inner.project_id);
        let resource: JobResource = self.inner.transport.get(&path, &[]).await?;
        debug!(job_id = job_id, "Fetched job");
        Ok(Job::from_resource(Arc::clone(&self.inner), resource))
    }

    /// Get transport request counters.
    pub fn stats(&self) -> TransportStats {
        self.inner.transport.stats()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> Arc<ClientInner> {
        Arc::clone(&self.inner)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("project_id", &self.inner.project_id)
            .field("base_url", &self.inner.transport.base_url())
            .finish_non_exhaustive()
    }
}

/// Reject IDs that cannot be placed in a URL path segment.
///
/// K_i: Project, dataset, table and job IDs never contain `/`, `?`, `#` or whitespace.
pub(crate) fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(BqError::InvalidInput(format!("Empty {kind} id")));
    }
    if let Some(c) = id
        .chars()
        .find(|c| matches!(c, '/' | '?' | '#' | '%') || c.is_whitespace())
    {
        return Err(BqError::InvalidInput(format!(
            "Invalid character {c:?} in {kind} id {id:?}"
        )));
    }
    Ok(())
}
