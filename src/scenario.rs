//! End-to-end warehouse scenario.
//!
//! Scenario flow:
//! Dataset → Table (recreate) → Metadata → List → Insert → Read → Query (sync)
//! → Query (job) → Update
//!
//! Every step checks what the service returned and stops at the first
//! discrepancy with `BqError::Unexpected`.

use crate::client::{Client, Table};
use crate::models::{
    BqError, FieldSchema, FieldType, JobStatus, Result, Schema, TableCreateOptions,
    TableMetadata, TableMetadataToUpdate, TableType, Value, ValueList, ValuesSaver,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Lifetime of the scenario table; the service drops it afterwards.
const TABLE_TTL: Duration = Duration::from_secs(5 * 60);

/// Names of the steps, in order.
pub const STEPS: [&str; 9] = [
    "ensure dataset",
    "recreate table",
    "check metadata",
    "list tables",
    "insert rows",
    "read table",
    "query (sync)",
    "query (job)",
    "update metadata",
];

/// Outcome of a successful scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// The dataset existed before the run
    pub dataset_existed: bool,
    pub table_id: String,
    pub rows_inserted: usize,
    /// Rows read back by each reading step
    pub rows_read: usize,
    pub rows_queried_sync: usize,
    pub rows_queried_job: usize,
    pub job_id: String,
    pub job_status: JobStatus,
    /// Metadata after the final update
    pub final_metadata: TableMetadata,
    pub runtime_secs: f64,
}

/// Runs the scenario against one dataset/table pair.
pub struct Scenario {
    client: Client,
    dataset_id: String,
    table_id: String,
    progress: bool,
}

impl Scenario {
    pub fn new(client: Client, dataset_id: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            client,
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
            progress: false,
        }
    }

    /// Show a progress bar on stderr while running.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// The two-column schema the scenario table is created with.
    pub fn schema() -> Schema {
        Schema::new(vec![
            FieldSchema::new("name", FieldType::String),
            FieldSchema::new("num", FieldType::Integer),
        ])
    }

    /// Rows inserted by the scenario: `("a", 0)`, `("b", 1)`, `("c", 2)`.
    pub fn expected_rows() -> Vec<Vec<Value>> {
        ["a", "b", "c"]
            .iter()
            .zip(0i64..)
            .map(|(name, num)| vec![Value::from(*name), Value::Integer(num)])
            .collect()
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(STEPS.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }

    /// Run every step in order.
    pub async fn run(&self) -> Result<ScenarioReport> {
        let start = Instant::now();
        let pb = self.progress_bar();
        let schema = Self::schema();
        let expected = Self::expected_rows();

        info!(
            project = %self.client.project_id(),
            dataset = %self.dataset_id,
            table = %self.table_id,
            "Starting scenario"
        );

        // Dataset
        pb.set_message(STEPS[0]);
        let dataset = self.client.dataset(&self.dataset_id);
        let dataset_existed = match dataset.create().await {
            Ok(()) => false,
            Err(e) if e.is_already_exists() => {
                debug!(dataset = %self.dataset_id, "Dataset already exists");
                true
            }
            Err(e) => return Err(e),
        };
        pb.inc(1);

        // Table
        pb.set_message(STEPS[1]);
        let table = dataset.table(&self.table_id);
        match table.delete().await {
            Ok(()) => debug!(table = %table, "Dropped leftover table"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let options = TableCreateOptions::default().expires_in(TABLE_TTL)?;
        table.create(&schema, options).await?;
        pb.inc(1);

        // Metadata
        pb.set_message(STEPS[2]);
        let metadata = table.metadata().await?;
        check(
            metadata.id == table.full_id(),
            format!("metadata id {:?}, expected {:?}", metadata.id, table.full_id()),
        )?;
        check(
            metadata.table_type == TableType::Regular,
            format!("table type {}, expected TABLE", metadata.table_type),
        )?;
        pb.inc(1);

        // Listing
        pb.set_message(STEPS[3]);
        let tables = dataset.tables().collect_all().await?;
        check(
            tables.len() == 1 && tables[0] == table,
            format!("listed tables {}, expected only {}", describe(&tables), table),
        )?;
        pb.inc(1);

        // Insert
        pb.set_message(STEPS[4]);
        let savers: Vec<ValuesSaver> = expected
            .iter()
            .map(|row| {
                let insert_id = row[0].to_string();
                ValuesSaver::new(schema.clone(), insert_id, row.clone())
            })
            .collect();
        table.uploader().put(&savers).await?;
        pb.inc(1);

        // Read
        pb.set_message(STEPS[5]);
        let rows = table.read().collect_all().await?;
        check_rows_in_order("table read", &rows, &expected)?;
        pb.inc(1);

        // Query, synchronous
        pb.set_message(STEPS[6]);
        let sql = format!("select name, num from {}", self.table_id);
        let query = self.client.query(&sql).default_dataset(&self.dataset_id);
        let sync_rows = query.read().await?.collect_all().await?;
        check_rows("sync query", &sync_rows, &expected)?;
        pb.inc(1);

        // Query, as a job looked up by ID
        pb.set_message(STEPS[7]);
        let submitted = query.run().await?;
        let job = self.client.job_from_id(submitted.id()).await?;
        let job_status = job.wait().await?;
        let job_rows = job.read().collect_all().await?;
        check_rows("job query", &job_rows, &expected)?;
        pb.inc(1);

        // Update
        pb.set_message(STEPS[8]);
        let final_metadata = self.update_metadata(&table, &metadata).await?;
        pb.inc(1);

        pb.finish_with_message("done");
        let report = ScenarioReport {
            dataset_existed,
            table_id: table.full_id(),
            rows_inserted: savers.len(),
            rows_read: rows.len(),
            rows_queried_sync: sync_rows.len(),
            rows_queried_job: job_rows.len(),
            job_id: job.id().to_string(),
            job_status,
            final_metadata,
            runtime_secs: start.elapsed().as_secs_f64(),
        };
        info!(runtime_secs = report.runtime_secs, "Scenario complete");
        Ok(report)
    }

    /// Append "more" to description and name, then verify only those changed.
    async fn update_metadata(
        &self,
        table: &Table,
        before: &TableMetadata,
    ) -> Result<TableMetadata> {
        let description = format!("{}more", before.description);
        let name = format!("{}more", before.name);
        let update = TableMetadataToUpdate {
            description: Some(description.clone()),
            name: Some(name.clone()),
        };
        let after = table.update(update).await?;

        check(
            after.description == description && after.name == name,
            format!(
                "after update got description {:?} name {:?}, expected {:?} {:?}",
                after.description, after.name, description, name
            ),
        )?;
        check(
            after.id == before.id
                && after.table_type == before.table_type
                && after.schema == before.schema
                && after.expiration_time == before.expiration_time,
            "update changed fields it did not set".to_string(),
        )?;
        Ok(after)
    }
}

fn check(ok: bool, detail: String) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(BqError::Unexpected(detail))
    }
}

/// Compare rows position by position.
fn check_rows_in_order(step: &str, got: &[ValueList], expected: &[Vec<Value>]) -> Result<()> {
    check(
        got.len() == expected.len(),
        format!("{step} returned {} rows, expected {}", got.len(), expected.len()),
    )?;
    for (i, (row, want)) in got.iter().zip(expected).enumerate() {
        check(
            row == want,
            format!("{step} row {i} is {:?}, expected {want:?}", row.0),
        )?;
    }
    Ok(())
}

/// Compare rows ignoring order; the service does not order query output.
fn check_rows(step: &str, got: &[ValueList], expected: &[Vec<Value>]) -> Result<()> {
    let mut got: Vec<String> = got.iter().map(|r| format!("{:?}", r.0)).collect();
    let mut want: Vec<String> = expected.iter().map(|r| format!("{r:?}")).collect();
    got.sort();
    want.sort();
    check(
        got == want,
        format!("{step} returned {got:?}, expected {want:?}"),
    )
}

fn describe(tables: &[Table]) -> String {
    let ids: Vec<String> = tables.iter().map(Table::full_id).collect();
    format!("[{}]", ids.join(", "))
}
