// src/lib.rs

//! Fetch a remote tabular dataset, parse it into a typed table and derive a
//! chart description from it.

pub mod buffer;
pub mod chart;
pub mod config;
pub mod error;
pub mod fetch;
pub mod parse;
pub mod pipeline;
pub mod table;

#[cfg(test)]
mod test_util;

pub use buffer::PayloadBuffer;
pub use chart::{build_chart, Aggregation, ChartBindings, ChartError, ChartKind, ChartSpec};
pub use config::Settings;
pub use error::{ErrorKind, ErrorReport, PipelineError};
pub use fetch::{DatasetRequest, FetchError, HttpFetcher, RawPayload};
pub use parse::{parse_table, Format, ParseError, ParseOptions, SourceHint};
pub use pipeline::{ImportOutcome, ImportSession, Pipeline};
pub use table::{Column, ColumnData, DataType, Table, Value};
