//! Streaming inserts.
//!
//! K_i: `insertAll` accepts a batch of rows and reports failures per row.
//! K_i: Rows carrying the same insert ID within a short window are kept once.

use crate::client::Table;
use crate::models::{ErrorDetail, JsonRow, PutMultiError, Result, RowInsertionError, ValueSaver};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest {
    rows: Vec<InsertRow>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    skip_invalid_rows: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    ignore_unknown_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    template_suffix: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    insert_id: Option<String>,
    json: JsonRow,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrors>,
}

#[derive(Debug, Deserialize)]
struct InsertErrors {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

/// Batching row writer for one table.
#[derive(Debug, Clone)]
pub struct Uploader {
    table: Table,
    /// Insert the valid rows of a batch even if some rows are invalid
    pub skip_invalid_rows: bool,
    /// Accept values for columns the schema does not have (they are dropped)
    pub ignore_unknown_values: bool,
    /// Insert into `<table><suffix>`, created from this table as a template
    pub table_template_suffix: Option<String>,
}

impl Uploader {
    pub(crate) fn new(table: Table) -> Self {
        Self {
            table,
            skip_invalid_rows: false,
            ignore_unknown_values: false,
            table_template_suffix: None,
        }
    }

    /// Insert all `rows` in a single request.
    ///
    /// B_i(every row is accepted) → `BqError::Insert` lists the rows that were not
    pub async fn put<S: ValueSaver>(&self, rows: &[S]) -> Result<()> {
        self.table.validate()?;
        if rows.is_empty() {
            debug!(table = %self.table, "No rows to insert");
            return Ok(());
        }

        let mut insert_rows = Vec::with_capacity(rows.len());
        for saver in rows {
            let (json, insert_id) = saver.save()?;
            insert_rows.push(InsertRow { insert_id, json });
        }

        let request = InsertAllRequest {
            rows: insert_rows,
            skip_invalid_rows: self.skip_invalid_rows,
            ignore_unknown_values: self.ignore_unknown_values,
            template_suffix: self.table_template_suffix.clone(),
        };
        let path = format!("{}/insertAll", self.table.path());
        let response: InsertAllResponse =
            self.table.inner().transport.post(&path, &request).await?;

        if response.insert_errors.is_empty() {
            info!(table = %self.table, rows = rows.len(), "Inserted rows");
            return Ok(());
        }

        let failures = response
            .insert_errors
            .into_iter()
            .map(|e| RowInsertionError {
                row_index: e.index,
                insert_id: request.rows.get(e.index).and_then(|r| r.insert_id.clone()),
                errors: e.errors,
            })
            .collect();
        Err(PutMultiError(failures).into())
    }
}
