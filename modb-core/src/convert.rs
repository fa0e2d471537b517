//! Type conversion between textual values and typed index values
//!
//! Index values arrive as text together with a type name. They are converted
//! once, at the boundary, into an [`IndexValue`] so that comparisons inside
//! the index never have to re-interpret strings.

use crate::{ModbError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Supported index value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Guid,
}

/// Canonical names accepted by [`IndexType::from_str`]
pub const SUPPORTED_TYPES: &[&str] = &["string", "integer", "float", "boolean", "timestamp", "guid"];

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::String => "string",
            IndexType::Integer => "integer",
            IndexType::Float => "float",
            IndexType::Boolean => "boolean",
            IndexType::Timestamp => "timestamp",
            IndexType::Guid => "guid",
        }
    }

    /// Whether ordering comparators are meaningful for this kind
    pub fn is_orderable(&self) -> bool {
        !matches!(self, IndexType::Boolean | IndexType::Guid)
    }

    /// Convert text into a value of this kind
    pub fn parse_value(&self, text: &str) -> Result<IndexValue> {
        let fail = |reason: &str| {
            ModbError::validation(
                "value",
                format!("cannot convert '{}' to {}: {}", text, self.as_str(), reason),
            )
        };

        match self {
            IndexType::String => Ok(IndexValue::String(text.to_string())),
            IndexType::Integer => text
                .trim()
                .parse::<i64>()
                .map(IndexValue::Integer)
                .map_err(|e| fail(&e.to_string())),
            IndexType::Float => {
                let v = text.trim().parse::<f64>().map_err(|e| fail(&e.to_string()))?;
                if !v.is_finite() {
                    return Err(fail("not a finite number"));
                }
                // -0.0 and 0.0 must land on the same index slot
                Ok(IndexValue::Float(if v == 0.0 { 0.0 } else { v }))
            }
            IndexType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(IndexValue::Boolean(true)),
                "false" | "0" => Ok(IndexValue::Boolean(false)),
                _ => Err(fail("expected true or false")),
            },
            IndexType::Timestamp => parse_timestamp(text.trim())
                .map(IndexValue::Timestamp)
                .ok_or_else(|| fail("unrecognised date/time format")),
            IndexType::Guid => Uuid::parse_str(text.trim())
                .map(IndexValue::Guid)
                .map_err(|e| fail(&e.to_string())),
        }
    }
}

impl FromStr for IndexType {
    type Err = ModbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Ok(IndexType::String),
            "integer" | "int" | "int32" | "int64" | "long" => Ok(IndexType::Integer),
            "float" | "double" | "decimal" | "single" => Ok(IndexType::Float),
            "boolean" | "bool" => Ok(IndexType::Boolean),
            "timestamp" | "datetime" | "date" => Ok(IndexType::Timestamp),
            "guid" | "uuid" => Ok(IndexType::Guid),
            _ => Err(ModbError::validation(
                "type",
                format!(
                    "type '{}' not supported; supported types: {}",
                    s,
                    SUPPORTED_TYPES.join(",")
                ),
            )),
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    text.parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

/// Parse a time bound (any accepted timestamp format) into unix milliseconds
pub fn parse_time(text: &str) -> Result<crate::Timestamp> {
    parse_timestamp(text.trim())
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| {
            ModbError::validation("time", format!("cannot convert '{}' to a timestamp", text))
        })
}

/// A typed index value
///
/// Values of the same kind are totally ordered. Values of different kinds
/// never meet inside one index because the index type is fixed on first use;
/// across kinds they order by kind so that `Ord` stays total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Guid(Uuid),
}

impl IndexValue {
    /// Kind of this value
    pub fn index_type(&self) -> IndexType {
        match self {
            IndexValue::String(_) => IndexType::String,
            IndexValue::Integer(_) => IndexType::Integer,
            IndexValue::Float(_) => IndexType::Float,
            IndexValue::Boolean(_) => IndexType::Boolean,
            IndexValue::Timestamp(_) => IndexType::Timestamp,
            IndexValue::Guid(_) => IndexType::Guid,
        }
    }

    /// Textual form that converts back to an equal value
    pub fn to_text(&self) -> String {
        match self {
            IndexValue::String(s) => s.clone(),
            IndexValue::Integer(v) => v.to_string(),
            IndexValue::Float(v) => v.to_string(),
            IndexValue::Boolean(v) => v.to_string(),
            IndexValue::Timestamp(v) => v.to_rfc3339_opts(SecondsFormat::Millis, true),
            IndexValue::Guid(v) => v.to_string(),
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexValue::String(a), IndexValue::String(b)) => a.cmp(b),
            (IndexValue::Integer(a), IndexValue::Integer(b)) => a.cmp(b),
            (IndexValue::Float(a), IndexValue::Float(b)) => a.total_cmp(b),
            (IndexValue::Boolean(a), IndexValue::Boolean(b)) => a.cmp(b),
            (IndexValue::Timestamp(a), IndexValue::Timestamp(b)) => a.cmp(b),
            (IndexValue::Guid(a), IndexValue::Guid(b)) => a.cmp(b),
            _ => self.index_type().cmp(&other.index_type()),
        }
    }
}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexValue {}
