// src/table/mod.rs

//! Typed, columnar in-memory table produced by the parser.

pub mod arrow;

use chrono::NaiveDateTime;
use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};
use std::{collections::HashSet, fmt, io::Write};
use thiserror::Error;

/// Rendering used for temporal cells in text exports.
pub const TEMPORAL_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Float,
    Text,
    Temporal,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Text => "text",
            DataType::Temporal => "temporal",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Cell storage for one column. `None` is the null marker.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Integer(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Temporal(Vec<Option<NaiveDateTime>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Integer(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Temporal(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Integer(_) => DataType::Integer,
            ColumnData::Float(_) => DataType::Float,
            ColumnData::Text(_) => DataType::Text,
            ColumnData::Temporal(_) => DataType::Temporal,
        }
    }

    /// Cell at `row`; out-of-range rows read as null.
    pub fn value(&self, row: usize) -> Value<'_> {
        match self {
            ColumnData::Integer(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Integer),
            ColumnData::Float(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Float),
            ColumnData::Text(v) => v
                .get(row)
                .and_then(|c| c.as_deref())
                .map_or(Value::Null, Value::Text),
            ColumnData::Temporal(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Temporal),
        }
    }

    /// Numeric view of a cell; `None` for nulls and non-numeric columns.
    pub fn as_f64(&self, row: usize) -> Option<f64> {
        match self {
            ColumnData::Integer(v) => v.get(row).copied().flatten().map(|i| i as f64),
            ColumnData::Float(v) => v.get(row).copied().flatten(),
            _ => None,
        }
    }

    pub fn null_count(&self) -> usize {
        match self {
            ColumnData::Integer(v) => v.iter().filter(|c| c.is_none()).count(),
            ColumnData::Float(v) => v.iter().filter(|c| c.is_none()).count(),
            ColumnData::Text(v) => v.iter().filter(|c| c.is_none()).count(),
            ColumnData::Temporal(v) => v.iter().filter(|c| c.is_none()).count(),
        }
    }
}

/// Borrowed view of one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Null,
    Integer(i64),
    Float(f64),
    Text(&'a str),
    Temporal(NaiveDateTime),
}

impl Value<'_> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
            Value::Temporal(t) => write!(f, "{}", t.format(TEMPORAL_DISPLAY_FORMAT)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn value(&self, row: usize) -> Value<'_> {
        self.data.value(row)
    }
}

impl Serialize for Column {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Column", 3)?;
        st.serialize_field("name", &self.name)?;
        st.serialize_field("type", &self.data.data_type())?;
        match &self.data {
            ColumnData::Integer(v) => st.serialize_field("values", v)?,
            ColumnData::Float(v) => st.serialize_field("values", v)?,
            ColumnData::Text(v) => st.serialize_field("values", v)?,
            ColumnData::Temporal(v) => st.serialize_field("values", v)?,
        }
        st.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("duplicate column name {0:?}")]
    DuplicateColumn(String),

    #[error("column {column:?} has {found} rows, expected {expected}")]
    RaggedColumns {
        column: String,
        expected: usize,
        found: usize,
    },
}

/// Ordered named columns of equal length with unique names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    columns: Vec<Column>,
    num_rows: usize,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for col in &columns {
            if !seen.insert(col.name()) {
                return Err(TableError::DuplicateColumn(col.name().to_string()));
            }
        }

        let num_rows = columns.first().map_or(0, Column::len);
        if let Some(bad) = columns.iter().find(|c| c.len() != num_rows) {
            return Err(TableError::RaggedColumns {
                column: bad.name().to_string(),
                expected: num_rows,
                found: bad.len(),
            });
        }

        Ok(Self { columns, num_rows })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Cell at (`column`, `row`); `None` when the column does not exist.
    pub fn value(&self, column: &str, row: usize) -> Option<Value<'_>> {
        self.column(column).map(|c| c.value(row))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn schema(&self) -> Vec<(&str, DataType)> {
        self.columns
            .iter()
            .map(|c| (c.name(), c.data_type()))
            .collect()
    }

    /// Write the table as CSV with a header row; nulls become empty fields.
    pub fn write_csv<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.columns.iter().map(Column::name))?;
        for row in 0..self.num_rows {
            wtr.write_record(self.columns.iter().map(|c| c.value(row).to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }
}
