//! Pull-based cursors over paged list and read endpoints.
//!
//! Epistemic foundation:
//! - K_i: Every item is yielded exactly once, in the order the service returned it
//! - K_i: `Ok(None)` means the cursor is exhausted; later calls make no request
//! - B_i: The next page is fetchable (might fail; the error is returned and
//!   the cursor can be polled again)
//! - I^R: Query results that are not ready yet are re-polled

use crate::client::bigquery::ClientInner;
use crate::client::{Dataset, Table};
use crate::models::{
    BqError, DatasetReference, QueryResultsResponse, Result, Schema, TableReference, ValueList,
    decode_row, int64_string,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

// ═══════════════════════════════════════════════════════════════════
// Page buffer
// ═══════════════════════════════════════════════════════════════════

/// Items of the current page plus the token of the next one.
#[derive(Debug)]
struct PageBuffer<T> {
    items: VecDeque<T>,
    next_token: Option<String>,
    /// At least one page has been received
    started: bool,
}

impl<T> PageBuffer<T> {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            next_token: None,
            started: false,
        }
    }

    fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    fn exhausted(&self) -> bool {
        self.started && self.items.is_empty() && self.next_token.is_none()
    }

    fn push_page(&mut self, items: impl IntoIterator<Item = T>, next_token: Option<String>) {
        self.started = true;
        self.items.extend(items);
        self.next_token = next_token.filter(|t| !t.is_empty());
    }

    /// Query parameters for the next page request.
    fn params(&self, page_size: Option<u32>) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(2);
        if let Some(n) = page_size {
            params.push(("maxResults", n.to_string()));
        }
        if let Some(token) = &self.next_token {
            params.push(("pageToken", token.clone()));
        }
        params
    }
}

// ═══════════════════════════════════════════════════════════════════
// Tables
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListResponse {
    #[serde(default)]
    tables: Vec<TableListEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListEntry {
    table_reference: TableReference,
}

/// Cursor over the tables of one dataset.
pub struct TableIterator {
    inner: Arc<ClientInner>,
    project_id: String,
    dataset_id: String,
    buf: PageBuffer<Table>,
}

impl TableIterator {
    pub(crate) fn new(inner: Arc<ClientInner>, project_id: String, dataset_id: String) -> Self {
        Self {
            inner,
            project_id,
            dataset_id,
            buf: PageBuffer::new(),
        }
    }

    /// Next table, or `None` when every table has been yielded.
    pub async fn next(&mut self) -> Result<Option<Table>> {
        loop {
            if let Some(table) = self.buf.pop() {
                return Ok(Some(table));
            }
            if self.buf.exhausted() {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let path = format!(
            "/projects/{}/datasets/{}/tables",
            self.project_id, self.dataset_id
        );
        let params = self.buf.params(self.inner.page_size);
        let page: TableListResponse = self.inner.transport.get(&path, &params).await?;
        debug!(dataset = %self.dataset_id, count = page.tables.len(), "Fetched table page");

        let inner = &self.inner;
        let tables = page.tables.into_iter().map(|entry| {
            let r = entry.table_reference;
            Table::new(Arc::clone(inner), r.project_id, r.dataset_id, r.table_id)
        });
        self.buf.push_page(tables, page.next_page_token);
        Ok(())
    }

    /// Drain the cursor.
    pub async fn collect_all(&mut self) -> Result<Vec<Table>> {
        let mut out = Vec::new();
        while let Some(table) = self.next().await? {
            out.push(table);
        }
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Datasets
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetListResponse {
    #[serde(default)]
    datasets: Vec<DatasetListEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetListEntry {
    dataset_reference: DatasetReference,
}

/// Cursor over the datasets of one project.
pub struct DatasetIterator {
    inner: Arc<ClientInner>,
    project_id: String,
    buf: PageBuffer<Dataset>,
}

impl DatasetIterator {
    pub(crate) fn new(inner: Arc<ClientInner>, project_id: String) -> Self {
        Self {
            inner,
            project_id,
            buf: PageBuffer::new(),
        }
    }

    pub async fn next(&mut self) -> Result<Option<Dataset>> {
        loop {
            if let Some(dataset) = self.buf.pop() {
                return Ok(Some(dataset));
            }
            if self.buf.exhausted() {
                return Ok(None);
            }
            let path = format!("/projects/{}/datasets", self.project_id);
            let params = self.buf.params(self.inner.page_size);
            let page: DatasetListResponse = self.inner.transport.get(&path, &params).await?;

            let inner = &self.inner;
            let datasets = page.datasets.into_iter().map(|entry| {
                let r = entry.dataset_reference;
                Dataset::new(Arc::clone(inner), r.project_id, r.dataset_id)
            });
            self.buf.push_page(datasets, page.next_page_token);
        }
    }

    pub async fn collect_all(&mut self) -> Result<Vec<Dataset>> {
        let mut out = Vec::new();
        while let Some(dataset) = self.next().await? {
            out.push(dataset);
        }
        Ok(out)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════════

/// `tabledata.list` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableDataResponse {
    #[serde(default)]
    rows: Vec<JsonValue>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default, with = "int64_string")]
    total_rows: Option<i64>,
}

enum RowSource {
    /// `tabledata.list` over a table's storage
    Table(Table),
    /// `jobs.getQueryResults` over a query job's output
    Job {
        project_id: String,
        job_id: String,
        location: Option<String>,
    },
}

/// Cursor over rows, from a table read or a query.
///
/// Rows are decoded against the result schema, which is known once the first
/// page has arrived.
pub struct RowIterator {
    inner: Arc<ClientInner>,
    source: RowSource,
    buf: PageBuffer<ValueList>,
    schema: Option<Schema>,
    total_rows: Option<u64>,
    pub(crate) max_results: Option<u32>,
}

impl fmt::Debug for RowIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowIterator")
            .field("schema", &self.schema)
            .field("total_rows", &self.total_rows)
            .field("max_results", &self.max_results)
            .finish_non_exhaustive()
    }
}

impl RowIterator {
    fn with_source(inner: Arc<ClientInner>, source: RowSource) -> Self {
        let max_results = inner.page_size;
        Self {
            inner,
            source,
            buf: PageBuffer::new(),
            schema: None,
            total_rows: None,
            max_results,
        }
    }

    pub(crate) fn for_table(inner: Arc<ClientInner>, table: Table) -> Self {
        Self::with_source(inner, RowSource::Table(table))
    }

    pub(crate) fn for_job(
        inner: Arc<ClientInner>,
        project_id: String,
        job_id: String,
        location: Option<String>,
    ) -> Self {
        Self::with_source(
            inner,
            RowSource::Job {
                project_id,
                job_id,
                location,
            },
        )
    }

    /// Result schema, once the first page has been fetched.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Total row count reported by the service, once known.
    pub fn total_rows(&self) -> Option<u64> {
        self.total_rows
    }

    /// Next row, or `None` when every row has been yielded.
    pub async fn next(&mut self) -> Result<Option<ValueList>> {
        loop {
            if let Some(row) = self.buf.pop() {
                return Ok(Some(row));
            }
            if self.buf.exhausted() {
                return Ok(None);
            }
            if matches!(self.source, RowSource::Table(_)) {
                self.fetch_table_page().await?;
            } else {
                self.fetch_query_page().await?;
            }
        }
    }

    pub async fn collect_all(&mut self) -> Result<Vec<ValueList>> {
        let mut out = Vec::new();
        while let Some(row) = self.next().await? {
            out.push(row);
        }
        Ok(out)
    }

    /// Take the first page from a `jobs.query` response.
    ///
    /// An incomplete response carries no rows; the cursor then polls on first `next`.
    pub(crate) fn seed(&mut self, response: QueryResultsResponse) -> Result<()> {
        if response.job_complete {
            self.apply_query_page(response)?;
        }
        Ok(())
    }

    async fn fetch_table_page(&mut self) -> Result<()> {
        let RowSource::Table(table) = &self.source else {
            return Err(BqError::Internal("Row source is not a table".to_string()));
        };

        let schema = match self.schema.take() {
            Some(schema) => schema,
            None => table.metadata().await?.schema,
        };

        let path = format!("{}/data", table.path());
        let params = self.buf.params(self.max_results);
        let page: TableDataResponse = match self.inner.transport.get(&path, &params).await {
            Ok(page) => page,
            Err(e) => {
                self.schema = Some(schema);
                return Err(e);
            }
        };
        debug!(table = %table, rows = page.rows.len(), "Fetched row page");

        let rows = page
            .rows
            .iter()
            .map(|row| decode_row(row, &schema))
            .collect::<Result<Vec<_>>>();
        self.schema = Some(schema);
        self.total_rows = page.total_rows.and_then(|n| u64::try_from(n).ok());
        self.buf.push_page(rows?, page.page_token);
        Ok(())
    }

    async fn fetch_query_page(&mut self) -> Result<()> {
        let (path, job_id, location) = match &self.source {
            RowSource::Job {
                project_id,
                job_id,
                location,
            } => (
                format!("/projects/{project_id}/queries/{job_id}"),
                job_id.clone(),
                location.clone(),
            ),
            RowSource::Table(_) => {
                return Err(BqError::Internal("Row source is not a job".to_string()));
            }
        };

        let mut params = self.buf.params(self.max_results);
        if let Some(location) = location {
            params.push(("location", location));
        }

        let max_attempts = self.inner.query.max_poll_attempts.max(1);
        for attempt in 0..max_attempts {
            let response: QueryResultsResponse = self.inner.transport.get(&path, &params).await?;
            if response.job_complete {
                debug!(job_id = %job_id, rows = response.rows.len(), "Fetched query page");
                return self.apply_query_page(response);
            }
            debug!(job_id = %job_id, attempt = attempt, "Query results not ready");
            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.inner.poll_interval()).await;
            }
        }

        Err(BqError::PollExhausted {
            job_id,
            attempts: max_attempts,
        })
    }

    fn apply_query_page(&mut self, response: QueryResultsResponse) -> Result<()> {
        if self.schema.is_none() {
            let schema = match &response.schema {
                Some(wire) => Schema::from_wire(wire)?,
                None => Schema::default(),
            };
            self.schema = Some(schema);
        }
        let schema = self.schema.as_ref().ok_or_else(|| {
            BqError::Internal("Result schema missing after first page".to_string())
        })?;

        let rows = response
            .rows
            .iter()
            .map(|row| decode_row(row, schema))
            .collect::<Result<Vec<_>>>()?;
        if let Some(n) = response.total_rows {
            self.total_rows = u64::try_from(n).ok();
        }
        self.buf.push_page(rows, response.page_token);
        Ok(())
    }
}
