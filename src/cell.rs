//! Column value types.
//!
//! Columns are polymorphic over a closed set of cell types. `ColumnType` is the
//! static type tag carried by configuration, `CellValue` is the tagged runtime
//! value readers hand across type-erased seams, and `Cell` maps between the two
//! for the typed storage inside a cache.

use std::fmt;

use serde::{ Deserialize, Serialize };

use crate::config_error;
use crate::error::Result;

/// Static type tag of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int64,
    Float64,
    Text,
}

impl ColumnType {
    /// Human-readable type name, as reported by `DataSource::get_type_name`
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Text => "text",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single tagged column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Text(String),
}

impl CellValue {
    /// The type tag of this value
    pub fn column_type(&self) -> ColumnType {
        match self {
            CellValue::Bool(_) => ColumnType::Bool,
            CellValue::Int64(_) => ColumnType::Int64,
            CellValue::Float64(_) => ColumnType::Float64,
            CellValue::Text(_) => ColumnType::Text,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int64(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float64(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_owned())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

/// A concrete Rust type usable as column storage
pub trait Cell: Clone + Send + Sync + 'static {
    /// The type tag corresponding to `Self`
    const TYPE: ColumnType;

    /// Unwrap a tagged value into `Self`, failing on a tag mismatch
    fn from_value(value: CellValue) -> Result<Self>;

    /// Wrap `self` into a tagged value
    fn into_value(self) -> CellValue;
}

impl Cell for bool {
    const TYPE: ColumnType = ColumnType::Bool;

    fn from_value(value: CellValue) -> Result<Self> {
        match value {
            CellValue::Bool(v) => Ok(v),
            other => Err(config_error!("expected bool cell, got {}", other.column_type())),
        }
    }

    fn into_value(self) -> CellValue {
        CellValue::Bool(self)
    }
}

impl Cell for i64 {
    const TYPE: ColumnType = ColumnType::Int64;

    fn from_value(value: CellValue) -> Result<Self> {
        match value {
            CellValue::Int64(v) => Ok(v),
            other => Err(config_error!("expected int64 cell, got {}", other.column_type())),
        }
    }

    fn into_value(self) -> CellValue {
        CellValue::Int64(self)
    }
}

impl Cell for f64 {
    const TYPE: ColumnType = ColumnType::Float64;

    fn from_value(value: CellValue) -> Result<Self> {
        match value {
            CellValue::Float64(v) => Ok(v),
            other => Err(config_error!("expected float64 cell, got {}", other.column_type())),
        }
    }

    fn into_value(self) -> CellValue {
        CellValue::Float64(self)
    }
}

impl Cell for String {
    const TYPE: ColumnType = ColumnType::Text;

    fn from_value(value: CellValue) -> Result<Self> {
        match value {
            CellValue::Text(v) => Ok(v),
            other => Err(config_error!("expected text cell, got {}", other.column_type())),
        }
    }

    fn into_value(self) -> CellValue {
        CellValue::Text(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let v = 3.5f64.into_value();
        assert_eq!(v, CellValue::Float64(3.5));
        assert_eq!(f64::from_value(v).unwrap(), 3.5);
    }

    #[test]
    fn test_tag_mismatch() {
        let err = i64::from_value(CellValue::Bool(true)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(CellValue::Int64(7).as_i64(), Some(7));
        assert_eq!(CellValue::Int64(7).as_f64(), None);
        assert_eq!(CellValue::from("abc").as_str(), Some("abc"));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(ColumnType::Float64.name(), "float64");
        assert_eq!(CellValue::Bool(false).column_type(), ColumnType::Bool);
    }
}
