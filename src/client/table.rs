//! Table handle.

use crate::client::bigquery::{ClientInner, validate_id};
use crate::client::{RowIterator, Uploader};
use crate::models::{
    BqError, Result, Schema, TableCreateOptions, TableMetadata, TableMetadataToUpdate,
    TableReference, TableResource, ViewDefinition,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Reference to a table. Creating a handle makes no request.
///
/// K_i: Two handles are equal when they name the same table, regardless of
/// which client created them.
#[derive(Clone)]
pub struct Table {
    inner: Arc<ClientInner>,
    project_id: String,
    dataset_id: String,
    table_id: String,
}

impl Table {
    pub(crate) fn new(
        inner: Arc<ClientInner>,
        project_id: String,
        dataset_id: String,
        table_id: String,
    ) -> Self {
        Self {
            inner,
            project_id,
            dataset_id,
            table_id,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    /// `<project>:<dataset>.<table>`, the form the service uses in metadata IDs.
    pub fn full_id(&self) -> String {
        format!("{}:{}.{}", self.project_id, self.dataset_id, self.table_id)
    }

    pub(crate) fn path(&self) -> String {
        format!(
            "/projects/{}/datasets/{}/tables/{}",
            self.project_id, self.dataset_id, self.table_id
        )
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_id("project", &self.project_id)?;
        validate_id("dataset", &self.dataset_id)?;
        validate_id("table", &self.table_id)
    }

    /// Create the table with the given schema.
    ///
    /// B_i(schema is well-formed) → validated locally before sending
    /// B_i(table does not exist) → 409 surfaces as `BqError::Api`
    pub async fn create(&self, schema: &Schema, options: TableCreateOptions) -> Result<()> {
        self.validate()?;
        if options.view_query.is_none() {
            if schema.is_empty() {
                return Err(BqError::InvalidInput(format!(
                    "Table {} needs at least one field",
                    self.full_id()
                )));
            }
            schema.validate()?;
        }

        let body = TableResource {
            table_reference: Some(TableReference {
                project_id: self.project_id.clone(),
                dataset_id: self.dataset_id.clone(),
                table_id: self.table_id.clone(),
            }),
            friendly_name: options.name,
            description: options.description,
            schema: (!schema.is_empty()).then(|| schema.to_wire()),
            view: options.view_query.map(|query| ViewDefinition { query }),
            expiration_time: options.expiration.map(|t| t.timestamp_millis()),
            ..Default::default()
        };
        let path = format!(
            "/projects/{}/datasets/{}/tables",
            self.project_id, self.dataset_id
        );
        let _: TableResource = self.inner.transport.post(&path, &body).await?;

        info!(table = %self.full_id(), fields = schema.len(), "Created table");
        Ok(())
    }

    /// Delete the table.
    pub async fn delete(&self) -> Result<()> {
        self.validate()?;
        self.inner.transport.delete(&self.path(), &[]).await?;
        info!(table = %self.full_id(), "Deleted table");
        Ok(())
    }

    /// Fetch the table's metadata.
    pub async fn metadata(&self) -> Result<TableMetadata> {
        self.validate()?;
        let resource: TableResource = self.inner.transport.get(&self.path(), &[]).await?;
        TableMetadata::from_wire(resource)
    }

    /// Change the description and/or friendly name.
    ///
    /// Only fields set in `update` are sent; everything else is left as is.
    /// Returns the metadata after the change.
    pub async fn update(&self, update: TableMetadataToUpdate) -> Result<TableMetadata> {
        self.validate()?;
        if update.is_empty() {
            debug!(table = %self.full_id(), "Empty update, fetching metadata only");
            return self.metadata().await;
        }
        let resource: TableResource = self.inner.transport.patch(&self.path(), &update).await?;
        info!(table = %self.full_id(), "Updated table metadata");
        TableMetadata::from_wire(resource)
    }

    /// Streaming-insert handle for this table.
    pub fn uploader(&self) -> Uploader {
        Uploader::new(self.clone())
    }

    /// Cursor over the table's rows in storage order.
    pub fn read(&self) -> RowIterator {
        RowIterator::for_table(Arc::clone(&self.inner), self.clone())
    }

    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.project_id == other.project_id
            && self.dataset_id == other.dataset_id
            && self.table_id == other.table_id
    }
}

impl Eq for Table {}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("project_id", &self.project_id)
            .field("dataset_id", &self.dataset_id)
            .field("table_id", &self.table_id)
            .finish()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_id())
    }
}
