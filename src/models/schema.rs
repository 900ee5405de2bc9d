//! Table schema types.
//!
//! K_i: The REST API describes a column as `{name, type, mode, description, fields}`.
//! K_i: Nested columns only exist under RECORD fields.

use crate::models::{BqError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Bytes,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Date,
    Time,
    DateTime,
    Record,
}

impl FieldType {
    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Bytes => "BYTES",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::DateTime => "DATETIME",
            FieldType::Record => "RECORD",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = BqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STRING" => Ok(FieldType::String),
            "BYTES" => Ok(FieldType::Bytes),
            "INTEGER" | "INT64" => Ok(FieldType::Integer),
            "FLOAT" | "FLOAT64" => Ok(FieldType::Float),
            "BOOLEAN" | "BOOL" => Ok(FieldType::Boolean),
            "TIMESTAMP" => Ok(FieldType::Timestamp),
            "DATE" => Ok(FieldType::Date),
            "TIME" => Ok(FieldType::Time),
            "DATETIME" => Ok(FieldType::DateTime),
            "RECORD" | "STRUCT" => Ok(FieldType::Record),
            other => Err(BqError::ParseError(format!("Unknown field type: {other}"))),
        }
    }
}

/// Description of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    /// Column name
    pub name: String,
    /// Column type
    pub field_type: FieldType,
    /// Optional human-readable description
    pub description: Option<String>,
    /// Column holds an array of values
    pub repeated: bool,
    /// Column may not be NULL
    pub required: bool,
    /// Nested fields (RECORD only)
    pub schema: Schema,
}

impl FieldSchema {
    /// Nullable, non-repeated column.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: None,
            repeated: false,
            required: false,
            schema: Schema::default(),
        }
    }

    /// RECORD column with the given nested fields.
    pub fn record(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            schema: Schema(fields),
            ..Self::new(name, FieldType::Record)
        }
    }

    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Ordered list of columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema(pub Vec<FieldSchema>);

impl Schema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the structural rules the service would reject anyway.
    pub fn validate(&self) -> Result<()> {
        for field in &self.0 {
            if field.name.trim().is_empty() {
                return Err(BqError::InvalidInput("Field name must not be empty".to_string()));
            }
            if field.repeated && field.required {
                return Err(BqError::InvalidInput(format!(
                    "Field {} cannot be both REPEATED and REQUIRED",
                    field.name
                )));
            }
            match field.field_type {
                FieldType::Record if field.schema.is_empty() => {
                    return Err(BqError::InvalidInput(format!(
                        "RECORD field {} has no nested fields",
                        field.name
                    )));
                }
                FieldType::Record => field.schema.validate()?,
                _ if !field.schema.is_empty() => {
                    return Err(BqError::InvalidInput(format!(
                        "Field {} of type {} cannot have nested fields",
                        field.name, field.field_type
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn to_wire(&self) -> TableSchema {
        TableSchema {
            fields: self.0.iter().map(TableFieldSchema::from_field).collect(),
        }
    }

    pub(crate) fn from_wire(wire: &TableSchema) -> Result<Self> {
        wire.fields
            .iter()
            .map(TableFieldSchema::to_field)
            .collect::<Result<Vec<_>>>()
            .map(Schema)
    }
}

impl From<Vec<FieldSchema>> for Schema {
    fn from(fields: Vec<FieldSchema>) -> Self {
        Self(fields)
    }
}

/// REST representation of a schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<TableFieldSchema>,
}

impl TableFieldSchema {
    fn from_field(field: &FieldSchema) -> Self {
        let mode = if field.repeated {
            Some("REPEATED".to_string())
        } else if field.required {
            Some("REQUIRED".to_string())
        } else {
            None
        };
        Self {
            name: field.name.clone(),
            field_type: field.field_type.as_str().to_string(),
            mode,
            description: field.description.clone(),
            fields: field.schema.0.iter().map(Self::from_field).collect(),
        }
    }

    fn to_field(&self) -> Result<FieldSchema> {
        let mode = self.mode.as_deref().unwrap_or("NULLABLE");
        Ok(FieldSchema {
            name: self.name.clone(),
            field_type: self.field_type.parse()?,
            description: self.description.clone(),
            repeated: mode.eq_ignore_ascii_case("REPEATED"),
            required: mode.eq_ignore_ascii_case("REQUIRED"),
            schema: self
                .fields
                .iter()
                .map(Self::to_field)
                .collect::<Result<Vec<_>>>()
                .map(Schema)?,
        })
    }
}
