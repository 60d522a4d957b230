// src/parse/delimited.rs

use csv::ReaderBuilder;

use super::{
    format::strip_bom,
    grid::{GridRow, RawGrid},
    Format, ParseError,
};
use crate::buffer::PayloadBuffer;

/// Read delimited UTF-8 text into a grid. Rows may be shorter than the header;
/// width checks against the header happen once the header row is known.
pub fn read_delimited(buffer: &PayloadBuffer, delimiter: u8) -> Result<RawGrid, ParseError> {
    let format = Format::Delimited { delimiter };
    let bytes = strip_bom(buffer.as_bytes());
    if let Err(e) = std::str::from_utf8(bytes) {
        return Err(ParseError::malformed(
            format,
            format!("invalid UTF-8 at byte {}", e.valid_up_to()),
        ));
    }

    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| ParseError::malformed(format, e.to_string()))?;
        let source_row = record
            .position()
            .map_or(idx + 1, |p| p.line() as usize);
        rows.push(GridRow {
            source_row,
            cells: record.iter().map(|f| Some(f.to_string())).collect(),
        });
    }

    Ok(RawGrid {
        rows,
        strict_width: true,
    })
}
