//! bqclient - Async client for the BigQuery REST API, with an end-to-end
//! warehouse scenario.
//!
//! ## Architecture
//!
//! - **Client**: Owns the HTTP transport and hands out resource handles
//! - **Handles**: `Dataset`, `Table`, `Uploader`, `Query`, `Job`; creating one makes no request
//! - **Scenario**: The end-to-end dataset/table/insert/query/update run behind `bqclient smoke`
//! - **Cursors**: `TableIterator`, `DatasetIterator`, `RowIterator`; `next()` yields
//!   one item per call and `Ok(None)` once exhausted
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network/API uncertainties (retry, backoff, polling)

pub mod client;
pub mod models;
pub mod scenario;

// Re-exports for convenience
pub use client::{
    Client, Dataset, DatasetIterator, Job, Query, RowIterator, Table, TableIterator, Uploader,
};
pub use models::{
    BqError, ClientConfig, Config, DatasetMetadata, FieldSchema, FieldType, JobState, JobStatus,
    Result, Schema, StructSaver, TableCreateOptions, TableMetadata, TableMetadataToUpdate,
    TableType, Value, ValueList, ValueSaver, ValuesSaver,
};
pub use scenario::{Scenario, ScenarioReport};
