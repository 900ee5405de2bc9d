//! BigQuery REST client module.

mod bigquery;
mod dataset;
mod iterator;
mod job;
mod query;
mod table;
mod transport;
mod uploader;

pub use bigquery::Client;
pub use dataset::Dataset;
pub use iterator::{DatasetIterator, RowIterator, TableIterator};
pub use job::Job;
pub use query::Query;
pub use table::Table;
pub use transport::{Transport, TransportStats};
pub use uploader::Uploader;
