// src/table/arrow.rs

use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::ArrowWriter,
    basic::Compression,
    file::properties::WriterProperties,
};
use std::{fs, fs::File, path::Path, sync::Arc};
use tracing::info;

use super::{ColumnData, DataType, Table};

/// Map a column type to its Arrow counterpart.
///
/// - integer  → Int64
/// - float    → Float64
/// - text     → Utf8
/// - temporal → Timestamp(µs, no zone); parsed offsets are already normalized to UTC
pub fn map_to_arrow_type(ty: DataType) -> ArrowDataType {
    match ty {
        DataType::Integer => ArrowDataType::Int64,
        DataType::Float => ArrowDataType::Float64,
        DataType::Text => ArrowDataType::Utf8,
        DataType::Temporal => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
    }
}

pub fn build_arrow_schema(table: &Table) -> Arc<ArrowSchema> {
    let fields: Vec<Field> = table
        .columns()
        .iter()
        .map(|c| Field::new(c.name(), map_to_arrow_type(c.data_type()), true))
        .collect();
    Arc::new(ArrowSchema::new(fields))
}

pub fn to_record_batch(table: &Table) -> Result<RecordBatch> {
    let arrays: Vec<ArrayRef> = table
        .columns()
        .iter()
        .map(|c| match c.data() {
            ColumnData::Integer(v) => Arc::new(Int64Array::from(v.clone())) as ArrayRef,
            ColumnData::Float(v) => Arc::new(Float64Array::from(v.clone())) as ArrayRef,
            ColumnData::Text(v) => {
                Arc::new(v.iter().map(|c| c.as_deref()).collect::<StringArray>()) as ArrayRef
            }
            ColumnData::Temporal(v) => Arc::new(TimestampMicrosecondArray::from(
                v.iter()
                    .map(|c| c.map(|t| t.and_utc().timestamp_micros()))
                    .collect::<Vec<_>>(),
            )) as ArrayRef,
        })
        .collect();

    RecordBatch::try_new(build_arrow_schema(table), arrays).context("building record batch")
}

/// Write `table` as a single Parquet file, via a temporary file renamed into place.
pub fn write_parquet(table: &Table, out_path: &Path) -> Result<()> {
    let batch = to_record_batch(table)?;
    let temp_path = out_path.with_extension("tmp");

    let file = File::create(&temp_path)
        .with_context(|| format!("creating {}", temp_path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .context("creating Parquet writer")?;
    writer.write(&batch).context("writing Parquet batch")?;
    writer.close().context("closing Parquet writer")?;

    fs::rename(&temp_path, out_path).with_context(|| {
        format!(
            "renaming {} to {}",
            temp_path.display(),
            out_path.display()
        )
    })?;
    info!(path = %out_path.display(), rows = table.num_rows(), "wrote parquet");
    Ok(())
}
