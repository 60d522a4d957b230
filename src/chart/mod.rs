// src/chart/mod.rs

//! Declarative chart descriptions derived from a [`Table`].

mod aggregate;

pub use aggregate::{group_and_reduce, Datum, GroupRow};

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::error::ErrorKind;
use crate::table::{Column, DataType, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
    Scatter,
    Area,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl Aggregation {
    /// Whether the reduction needs a numeric y column.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Aggregation::Count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what} {value:?}; expected one of {expected}")]
pub struct UnknownVariant {
    what: &'static str,
    value: String,
    expected: &'static str,
}

macro_rules! str_enum {
    ($ty:ident, $what:literal, { $($name:literal => $variant:ident),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(UnknownVariant {
                        what: $what,
                        value: s.to_string(),
                        expected: concat!($($name, " "),+),
                    }),
                }
            }
        }
    };
}

str_enum!(ChartKind, "chart kind", {
    "line" => Line,
    "bar" => Bar,
    "scatter" => Scatter,
    "area" => Area,
});

str_enum!(Aggregation, "aggregation", {
    "sum" => Sum,
    "mean" => Mean,
    "count" => Count,
    "min" => Min,
    "max" => Max,
});

/// Column-to-channel selection supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartBindings {
    pub kind: ChartKind,
    pub x: String,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
    #[serde(default)]
    pub title: Option<String>,
}

impl ChartBindings {
    pub fn new(kind: ChartKind, x: impl Into<String>) -> Self {
        Self {
            kind,
            x: x.into(),
            y: None,
            color: None,
            aggregation: None,
            title: None,
        }
    }

    pub fn y(mut self, column: impl Into<String>) -> Self {
        self.y = Some(column.into());
        self
    }

    pub fn color(mut self, column: impl Into<String>) -> Self {
        self.color = Some(column.into());
        self
    }

    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartError {
    #[error("unknown column {column:?} (available: {})", available.join(", "))]
    UnknownColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("{aggregation} needs a numeric column but {column:?} is {found}")]
    TypeMismatch {
        column: String,
        aggregation: Aggregation,
        found: DataType,
    },

    #[error("missing {channel} binding: {reason}")]
    MissingBinding {
        channel: &'static str,
        reason: &'static str,
    },
}

impl ChartError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChartError::UnknownColumn { .. } => ErrorKind::UnknownColumnError,
            ChartError::TypeMismatch { .. } => ErrorKind::TypeMismatchError,
            ChartError::MissingBinding { .. } => ErrorKind::MissingBinding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    Linear,
    Time,
    Ordinal,
}

impl From<DataType> for Scale {
    fn from(ty: DataType) -> Self {
        match ty {
            DataType::Integer | DataType::Float => Scale::Linear,
            DataType::Temporal => Scale::Time,
            DataType::Text => Scale::Ordinal,
        }
    }
}

/// A visual channel bound to a table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisEncoding {
    pub field: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub scale: Scale,
}

impl AxisEncoding {
    fn of(column: &Column) -> Self {
        Self {
            field: column.name().to_string(),
            data_type: column.data_type(),
            scale: column.data_type().into(),
        }
    }
}

/// One mark: a table row, or a group when an aggregation is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub x: Datum,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<Datum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Datum>,
}

/// Immutable description of one chart, ready for a renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    kind: ChartKind,
    title: String,
    x: AxisEncoding,
    y: Option<AxisEncoding>,
    color: Option<AxisEncoding>,
    aggregation: Option<Aggregation>,
    data: Vec<DataPoint>,
}

impl ChartSpec {
    pub fn kind(&self) -> ChartKind {
        self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn x(&self) -> &AxisEncoding {
        &self.x
    }

    pub fn y(&self) -> Option<&AxisEncoding> {
        self.y.as_ref()
    }

    pub fn color(&self) -> Option<&AxisEncoding> {
        self.color.as_ref()
    }

    pub fn aggregation(&self) -> Option<Aggregation> {
        self.aggregation
    }

    pub fn data(&self) -> &[DataPoint] {
        &self.data
    }
}

fn lookup<'t>(table: &'t Table, name: &str) -> Result<&'t Column, ChartError> {
    table.column(name).ok_or_else(|| ChartError::UnknownColumn {
        column: name.to_string(),
        available: table.column_names().into_iter().map(String::from).collect(),
    })
}

fn default_title(b: &ChartBindings) -> String {
    match (&b.y, b.aggregation) {
        (Some(y), Some(agg)) => format!("{}({}) by {}", agg, y, b.x),
        (None, Some(agg)) => format!("{} by {}", agg, b.x),
        (Some(y), None) => format!("{} by {}", y, b.x),
        (None, None) => b.x.clone(),
    }
}

/// Validate `bindings` against `table` and build the chart. Pure: the same
/// inputs always yield the same spec.
#[instrument(level = "debug", skip_all, fields(kind = %bindings.kind, x = %bindings.x))]
pub fn build_chart(table: &Table, bindings: &ChartBindings) -> Result<ChartSpec, ChartError> {
    let x = lookup(table, &bindings.x)?;
    let y = bindings.y.as_deref().map(|n| lookup(table, n)).transpose()?;
    let color = bindings
        .color
        .as_deref()
        .map(|n| lookup(table, n))
        .transpose()?;

    match (y, bindings.aggregation) {
        (None, None) => {
            return Err(ChartError::MissingBinding {
                channel: "y",
                reason: "a y column is required unless the aggregation is count",
            })
        }
        (None, Some(agg)) if agg.is_numeric() => {
            return Err(ChartError::MissingBinding {
                channel: "y",
                reason: "sum, mean, min and max reduce a y column",
            })
        }
        (Some(y), Some(agg)) if agg.is_numeric() && !y.data_type().is_numeric() => {
            return Err(ChartError::TypeMismatch {
                column: y.name().to_string(),
                aggregation: agg,
                found: y.data_type(),
            })
        }
        _ => {}
    }

    let data: Vec<DataPoint> = match bindings.aggregation {
        Some(agg) => group_and_reduce(x.data(), color.map(Column::data), y.map(Column::data), agg)
            .into_iter()
            .map(|g| DataPoint {
                x: g.x,
                y: Some(g.value),
                color: g.color,
            })
            .collect(),
        None => (0..table.num_rows())
            .map(|row| DataPoint {
                x: x.value(row).into(),
                y: y.map(|c| c.value(row).into()),
                color: color.map(|c| c.value(row).into()),
            })
            .collect(),
    };
    debug!(points = data.len(), "built chart");

    Ok(ChartSpec {
        kind: bindings.kind,
        title: bindings.title.clone().unwrap_or_else(|| default_title(bindings)),
        x: AxisEncoding::of(x),
        y: y.map(AxisEncoding::of),
        color: color.map(AxisEncoding::of),
        aggregation: bindings.aggregation,
        data,
    })
}
