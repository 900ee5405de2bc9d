//! Core data models for bqclient.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result/Option
//! - I^R (Resolvable): Config parameters
//! - I^B (Bounded): Error variants with retry classification

mod config;
mod error;
mod job;
mod metadata;
mod schema;
mod value;

pub use config::*;
pub use error::*;
pub use job::{JobState, JobStatus};
pub use metadata::{
    DatasetMetadata, TableCreateOptions, TableMetadata, TableMetadataToUpdate, TableType,
};
pub use schema::{FieldSchema, FieldType, Schema};
pub use value::{JsonRow, StructSaver, Value, ValueList, ValueSaver, ValuesSaver};

pub(crate) use job::{
    InsertJobRequest, JobConfiguration, JobReference, JobResource, QueryJobConfig,
    QueryRequest, QueryResultsResponse,
};
pub(crate) use metadata::{
    DatasetReference, DatasetResource, TableReference, TableResource, ViewDefinition, int64_string,
};
pub(crate) use schema::TableSchema;
pub(crate) use value::decode_row;
