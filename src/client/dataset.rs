//! Dataset handle.

use crate::client::bigquery::{ClientInner, validate_id};
use crate::client::{Table, TableIterator};
use crate::models::{DatasetMetadata, DatasetReference, DatasetResource, Result};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Reference to a dataset. Creating a handle makes no request.
#[derive(Clone)]
pub struct Dataset {
    inner: Arc<ClientInner>,
    project_id: String,
    dataset_id: String,
}

impl Dataset {
    pub(crate) fn new(inner: Arc<ClientInner>, project_id: String, dataset_id: String) -> Self {
        Self {
            inner,
            project_id,
            dataset_id,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    fn path(&self) -> String {
        format!("/projects/{}/datasets/{}", self.project_id, self.dataset_id)
    }

    /// Create the dataset.
    ///
    /// An existing dataset yields `BqError::Api` with status 409; callers that
    /// only need the dataset to exist can ignore errors where
    /// `is_already_exists()` is true.
    pub async fn create(&self) -> Result<()> {
        validate_id("project", &self.project_id)?;
        validate_id("dataset", &self.dataset_id)?;

        let body = DatasetResource {
            dataset_reference: Some(DatasetReference {
                project_id: self.project_id.clone(),
                dataset_id: self.dataset_id.clone(),
            }),
            ..Default::default()
        };
        let path = format!("/projects/{}/datasets", self.project_id);
        let _: DatasetResource = self.inner.transport.post(&path, &body).await?;

        info!(project = %self.project_id, dataset = %self.dataset_id, "Created dataset");
        Ok(())
    }

    /// Delete the dataset. Fails if it still contains tables.
    pub async fn delete(&self) -> Result<()> {
        validate_id("dataset", &self.dataset_id)?;
        self.inner
            .transport
            .delete(&self.path(), &[("deleteContents", "false".to_string())])
            .await?;
        info!(project = %self.project_id, dataset = %self.dataset_id, "Deleted dataset");
        Ok(())
    }

    /// Fetch the dataset's metadata.
    pub async fn metadata(&self) -> Result<DatasetMetadata> {
        validate_id("dataset", &self.dataset_id)?;
        let resource: DatasetResource = self.inner.transport.get(&self.path(), &[]).await?;
        Ok(DatasetMetadata::from_wire(resource))
    }

    /// Handle to a table in this dataset. No request is made.
    pub fn table(&self, table_id: impl Into<String>) -> Table {
        Table::new(
            Arc::clone(&self.inner),
            self.project_id.clone(),
            self.dataset_id.clone(),
            table_id.into(),
        )
    }

    /// Cursor over the tables in this dataset.
    pub fn tables(&self) -> TableIterator {
        TableIterator::new(
            Arc::clone(&self.inner),
            self.project_id.clone(),
            self.dataset_id.clone(),
        )
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.project_id == other.project_id && self.dataset_id == other.dataset_id
    }
}

impl Eq for Dataset {}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("project_id", &self.project_id)
            .field("dataset_id", &self.dataset_id)
            .finish()
    }
}
