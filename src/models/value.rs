//! Row values and their JSON encodings.
//!
//! K_i: Rows read from the service arrive as `{"f": [{"v": ...}]}` with every leaf as a string.
//! K_i: Rows written by `insertAll` are JSON objects keyed by column name.
//! B_i: A row's cells line up with the schema it was read against.

use crate::models::{BqError, FieldSchema, FieldType, Result, Schema};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

/// JSON object sent as one row of a streaming insert.
pub type JsonRow = serde_json::Map<String, JsonValue>;

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Bytes(Vec<u8>),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    /// Nested fields, in the order of the RECORD's schema
    Record(Vec<Value>),
    /// Elements of a REPEATED column
    Repeated(Vec<Value>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "{}", BASE64.encode(b)),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::Record(values) | Value::Repeated(values) => {
                let open = if matches!(self, Value::Record(_)) { '{' } else { '[' };
                let close = if open == '{' { '}' } else { ']' };
                write!(f, "{open}")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "{close}")
            }
        }
    }
}

/// One row of values in schema order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueList(pub Vec<Value>);

impl ValueList {
    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl Deref for ValueList {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for ValueList {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl PartialEq<Vec<Value>> for ValueList {
    fn eq(&self, other: &Vec<Value>) -> bool {
        &self.0 == other
    }
}

// ═══════════════════════════════════════════════════════════════════
// Decoding: tabledata / query result rows
// ═══════════════════════════════════════════════════════════════════

/// Decode a `{"f": [...]}` row against its schema.
pub(crate) fn decode_row(row: &JsonValue, schema: &Schema) -> Result<ValueList> {
    decode_cells(row, schema).map(ValueList)
}

fn decode_cells(row: &JsonValue, schema: &Schema) -> Result<Vec<Value>> {
    let cells = row
        .get("f")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| BqError::ParseError(format!("Row is missing its cell list: {row}")))?;

    if cells.len() != schema.len() {
        return Err(BqError::SchemaMismatch(format!(
            "Row has {} cells but schema has {} fields",
            cells.len(),
            schema.len()
        )));
    }

    cells
        .iter()
        .zip(schema.fields())
        .map(|(cell, field)| decode_field(cell.get("v").unwrap_or(&JsonValue::Null), field))
        .collect()
}

fn decode_field(v: &JsonValue, field: &FieldSchema) -> Result<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    if !field.repeated {
        return decode_leaf(v, field);
    }

    let elements = v.as_array().ok_or_else(|| {
        BqError::ParseError(format!("Repeated field {} is not an array", field.name))
    })?;
    elements
        .iter()
        .map(|element| decode_leaf(element.get("v").unwrap_or(&JsonValue::Null), field))
        .collect::<Result<Vec<_>>>()
        .map(Value::Repeated)
}

fn decode_leaf(v: &JsonValue, field: &FieldSchema) -> Result<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    if field.field_type == FieldType::Record {
        return decode_cells(v, &field.schema).map(Value::Record);
    }

    let s = leaf_str(v, field)?;
    let bad = |e: &dyn fmt::Display| {
        BqError::ParseError(format!(
            "Field {} ({}): cannot parse {s:?}: {e}",
            field.name, field.field_type
        ))
    };

    match field.field_type {
        FieldType::String => Ok(Value::String(s.to_string())),
        FieldType::Bytes => BASE64.decode(s.as_bytes()).map(Value::Bytes).map_err(|e| bad(&e)),
        FieldType::Integer => s.parse::<i64>().map(Value::Integer).map_err(|e| bad(&e)),
        FieldType::Float => s.parse::<f64>().map(Value::Float).map_err(|e| bad(&e)),
        FieldType::Boolean => match s.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(bad(&"expected true or false")),
        },
        FieldType::Timestamp => parse_timestamp(&s)
            .map(Value::Timestamp)
            .ok_or_else(|| bad(&"not epoch seconds or RFC 3339")),
        FieldType::Date => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|e| bad(&e)),
        FieldType::Time => NaiveTime::parse_from_str(&s, "%H:%M:%S%.f")
            .map(Value::Time)
            .map_err(|e| bad(&e)),
        FieldType::DateTime => NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f"))
            .map(Value::DateTime)
            .map_err(|e| bad(&e)),
        FieldType::Record => Err(BqError::Internal("RECORD handled above".to_string())),
    }
}

fn leaf_str<'a>(v: &'a JsonValue, field: &FieldSchema) -> Result<Cow<'a, str>> {
    match v {
        JsonValue::String(s) => Ok(Cow::Borrowed(s)),
        JsonValue::Number(n) => Ok(Cow::Owned(n.to_string())),
        JsonValue::Bool(b) => Ok(Cow::Owned(b.to_string())),
        other => Err(BqError::ParseError(format!(
            "Field {} expected a scalar, got {other}",
            field.name
        ))),
    }
}

/// Timestamps come back as fractional epoch seconds, e.g. "1.4523168E9".
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = s.parse::<f64>() {
        let micros = (secs * 1_000_000.0).round();
        if !micros.is_finite() || micros.abs() > i64::MAX as f64 {
            return None;
        }
        return DateTime::from_timestamp_micros(micros as i64);
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

// ═══════════════════════════════════════════════════════════════════
// Encoding: insertAll rows
// ═══════════════════════════════════════════════════════════════════

/// Whether a scalar value can be stored in a column of `field_type`.
///
/// INTEGER values are accepted by FLOAT columns; every other scalar needs its
/// own type.
fn scalar_fits(value: &Value, field_type: FieldType) -> bool {
    match value {
        Value::Null | Value::Record(_) | Value::Repeated(_) => true,
        Value::String(_) => field_type == FieldType::String,
        Value::Bytes(_) => field_type == FieldType::Bytes,
        Value::Integer(_) => matches!(field_type, FieldType::Integer | FieldType::Float),
        Value::Float(_) => field_type == FieldType::Float,
        Value::Boolean(_) => field_type == FieldType::Boolean,
        Value::Timestamp(_) => field_type == FieldType::Timestamp,
        Value::Date(_) => field_type == FieldType::Date,
        Value::Time(_) => field_type == FieldType::Time,
        Value::DateTime(_) => field_type == FieldType::DateTime,
    }
}

fn encode_value(value: &Value, field: &FieldSchema) -> Result<JsonValue> {
    if field.repeated && !matches!(value, Value::Null | Value::Repeated(_)) {
        return Err(BqError::SchemaMismatch(format!(
            "Single value for repeated field {}",
            field.name
        )));
    }
    if !scalar_fits(value, field.field_type) {
        return Err(BqError::SchemaMismatch(format!(
            "Value {value} does not fit field {} ({})",
            field.name, field.field_type
        )));
    }

    let encoded = match value {
        Value::Null => JsonValue::Null,
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => JsonValue::String(BASE64.encode(b)),
        Value::Integer(n) => JsonValue::from(*n),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(JsonValue::Number)
            // The service accepts these spellings for non-finite floats
            .unwrap_or_else(|| JsonValue::String(non_finite_name(*x).to_string())),
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Timestamp(t) => JsonValue::String(t.to_rfc3339_opts(SecondsFormat::Micros, true)),
        Value::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => JsonValue::String(t.format("%H:%M:%S%.f").to_string()),
        Value::DateTime(dt) => JsonValue::String(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Record(values) => {
            if field.field_type != FieldType::Record {
                return Err(BqError::SchemaMismatch(format!(
                    "Record value for non-RECORD field {}",
                    field.name
                )));
            }
            JsonValue::Object(encode_fields(values, &field.schema)?)
        }
        Value::Repeated(values) => {
            if !field.repeated {
                return Err(BqError::SchemaMismatch(format!(
                    "Repeated value for non-repeated field {}",
                    field.name
                )));
            }
            let element_field = FieldSchema {
                repeated: false,
                ..field.clone()
            };
            JsonValue::Array(
                values
                    .iter()
                    .map(|v| encode_value(v, &element_field))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
    };
    Ok(encoded)
}

fn non_finite_name(x: f64) -> &'static str {
    if x.is_nan() {
        "NaN"
    } else if x.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn encode_fields(values: &[Value], schema: &Schema) -> Result<JsonRow> {
    if values.len() != schema.len() {
        return Err(BqError::SchemaMismatch(format!(
            "Row has {} values but schema has {} fields",
            values.len(),
            schema.len()
        )));
    }
    let mut row = JsonRow::new();
    for (value, field) in values.iter().zip(schema.fields()) {
        row.insert(field.name.clone(), encode_value(value, field)?);
    }
    Ok(row)
}

/// Source of one row for `Uploader::put`.
///
/// Returns the row as a JSON object plus an optional insert ID used by the
/// service to drop duplicate rows within a short window.
pub trait ValueSaver {
    fn save(&self) -> Result<(JsonRow, Option<String>)>;
}

/// Positional values saved against an explicit schema.
#[derive(Debug, Clone)]
pub struct ValuesSaver {
    pub schema: Schema,
    /// Per-row dedup key (None lets the service accept duplicates)
    pub insert_id: Option<String>,
    pub row: Vec<Value>,
}

impl ValuesSaver {
    pub fn new(schema: Schema, insert_id: impl Into<String>, row: Vec<Value>) -> Self {
        Self {
            schema,
            insert_id: Some(insert_id.into()),
            row,
        }
    }
}

impl ValueSaver for ValuesSaver {
    fn save(&self) -> Result<(JsonRow, Option<String>)> {
        Ok((encode_fields(&self.row, &self.schema)?, self.insert_id.clone()))
    }
}

/// Any serde-serializable struct, saved by its field names.
#[derive(Debug, Clone)]
pub struct StructSaver<T> {
    pub insert_id: Option<String>,
    pub value: T,
}

impl<T: Serialize> ValueSaver for StructSaver<T> {
    fn save(&self) -> Result<(JsonRow, Option<String>)> {
        match serde_json::to_value(&self.value) {
            Ok(JsonValue::Object(row)) => Ok((row, self.insert_id.clone())),
            Ok(other) => Err(BqError::InvalidInput(format!(
                "Row must serialize to a JSON object, got {other}"
            ))),
            Err(e) => Err(BqError::InvalidInput(format!("Serializing row: {e}"))),
        }
    }
}
