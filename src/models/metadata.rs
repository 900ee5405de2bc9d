//! Dataset and table metadata.
//!
//! K_i: int64 fields (`numRows`, `creationTime`, ...) travel as decimal strings.
//! K_i: Times are epoch milliseconds.

use crate::models::{BqError, Result, Schema, TableSchema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

/// Kind of table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableType {
    /// Regular table backed by managed storage
    Regular,
    /// Logical view defined by a query
    View,
    /// Table backed by data outside the warehouse
    External,
}

impl TableType {
    fn from_wire(s: &str) -> Result<Self> {
        match s {
            "TABLE" => Ok(TableType::Regular),
            "VIEW" => Ok(TableType::View),
            "EXTERNAL" => Ok(TableType::External),
            other => Err(BqError::ParseError(format!("Unknown table type: {other}"))),
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableType::Regular => write!(f, "TABLE"),
            TableType::View => write!(f, "VIEW"),
            TableType::External => write!(f, "EXTERNAL"),
        }
    }
}

/// Metadata of a table as reported by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    /// Fully qualified ID: `<project>:<dataset>.<table>`
    pub id: String,
    /// Friendly (display) name
    pub name: String,
    pub description: String,
    pub table_type: TableType,
    pub schema: Schema,
    /// Query text when `table_type` is `View`
    pub view_query: Option<String>,
    /// When the table will be deleted automatically, if ever
    pub expiration_time: Option<DateTime<Utc>>,
    pub creation_time: Option<DateTime<Utc>>,
    pub last_modified_time: Option<DateTime<Utc>>,
    /// Size of the table in bytes (streaming buffer excluded)
    pub num_bytes: i64,
    /// Number of rows (streaming buffer excluded)
    pub num_rows: u64,
}

impl TableMetadata {
    pub(crate) fn from_wire(wire: TableResource) -> Result<Self> {
        Ok(Self {
            id: wire.id,
            name: wire.friendly_name.unwrap_or_default(),
            description: wire.description.unwrap_or_default(),
            table_type: TableType::from_wire(wire.table_type.as_deref().unwrap_or("TABLE"))?,
            schema: wire
                .schema
                .as_ref()
                .map(Schema::from_wire)
                .transpose()?
                .unwrap_or_default(),
            view_query: wire.view.map(|v| v.query),
            expiration_time: millis_to_time(wire.expiration_time),
            creation_time: millis_to_time(wire.creation_time),
            last_modified_time: millis_to_time(wire.last_modified_time),
            num_bytes: wire.num_bytes.unwrap_or(0),
            num_rows: wire.num_rows.unwrap_or(0),
        })
    }
}

/// Optional settings for `Table::create`.
#[derive(Debug, Clone, Default)]
pub struct TableCreateOptions {
    pub expiration: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Create a view over this query instead of a regular table
    pub view_query: Option<String>,
}

impl TableCreateOptions {
    /// Delete the table automatically at `at`.
    pub fn expiration(mut self, at: DateTime<Utc>) -> Self {
        self.expiration = Some(at);
        self
    }

    /// Delete the table automatically `ttl` from now.
    pub fn expires_in(self, ttl: Duration) -> Result<Self> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| BqError::InvalidInput(format!("Expiration out of range: {e}")))?;
        let at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| BqError::InvalidInput("Expiration out of range".to_string()))?;
        Ok(self.expiration(at))
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn view_query(mut self, query: impl Into<String>) -> Self {
        self.view_query = Some(query.into());
        self
    }
}

/// Fields to change in `Table::update`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableMetadataToUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "friendlyName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TableMetadataToUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.name.is_none()
    }
}

/// Metadata of a dataset as reported by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMetadata {
    /// Fully qualified ID: `<project>:<dataset>`
    pub id: String,
    pub name: String,
    pub description: String,
    pub location: String,
    pub creation_time: Option<DateTime<Utc>>,
    pub last_modified_time: Option<DateTime<Utc>>,
    /// Default lifetime of new tables in this dataset
    pub default_table_expiration: Option<Duration>,
}

impl DatasetMetadata {
    pub(crate) fn from_wire(wire: DatasetResource) -> Self {
        Self {
            id: wire.id,
            name: wire.friendly_name.unwrap_or_default(),
            description: wire.description.unwrap_or_default(),
            location: wire.location.unwrap_or_default(),
            creation_time: millis_to_time(wire.creation_time),
            last_modified_time: millis_to_time(wire.last_modified_time),
            default_table_expiration: wire
                .default_table_expiration_ms
                .and_then(|ms| u64::try_from(ms).ok())
                .map(Duration::from_millis),
        }
    }
}

fn millis_to_time(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

// ═══════════════════════════════════════════════════════════════════
// REST resources
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasetReference {
    pub project_id: String,
    pub dataset_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ViewDefinition {
    pub query: String,
}

/// `tables` resource. Used both for insert requests and responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TableResource {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_reference: Option<TableReference>,
    #[serde(default, rename = "type", skip_serializing)]
    pub table_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewDefinition>,
    #[serde(
        default,
        with = "int64_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration_time: Option<i64>,
    #[serde(default, deserialize_with = "int64_string::deserialize", skip_serializing)]
    pub creation_time: Option<i64>,
    #[serde(default, deserialize_with = "int64_string::deserialize", skip_serializing)]
    pub last_modified_time: Option<i64>,
    #[serde(default, deserialize_with = "int64_string::deserialize", skip_serializing)]
    pub num_bytes: Option<i64>,
    #[serde(default, deserialize_with = "uint64_string", skip_serializing)]
    pub num_rows: Option<u64>,
}

/// `datasets` resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatasetResource {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_reference: Option<DatasetReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "int64_string::deserialize", skip_serializing)]
    pub creation_time: Option<i64>,
    #[serde(default, deserialize_with = "int64_string::deserialize", skip_serializing)]
    pub last_modified_time: Option<i64>,
    #[serde(
        default,
        with = "int64_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_table_expiration_ms: Option<i64>,
}

/// int64 as a decimal string (numbers are tolerated when reading).
pub(crate) mod int64_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }

    pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(n) => serializer.serialize_str(&n.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Num(n)) => Ok(Some(n)),
            Some(Raw::Str(s)) => s.parse().map(Some).map_err(D::Error::custom),
        }
    }
}

fn uint64_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error> {
    use serde::de::Error;
    int64_string::deserialize(deserializer)?
        .map(|n| u64::try_from(n).map_err(D::Error::custom))
        .transpose()
}
