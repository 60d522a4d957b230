// src/parse/mod.rs

//! Turns a payload buffer into a typed [`Table`].
//!
//! Pipeline: format detection → raw string grid (delimited or xlsx) →
//! header resolution → per-column type inference.

mod delimited;
mod format;
mod grid;
mod infer;
mod xlsx;

pub use format::Format;
pub use infer::parse_temporal;

use thiserror::Error;
use tracing::{info, instrument};

use crate::buffer::PayloadBuffer;
use crate::error::ErrorKind;
use crate::fetch::RawPayload;
use crate::table::Table;

/// Cell texts treated as null before type inference.
pub const DEFAULT_NA_VALUES: &[&str] = &[
    "NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "None", "#N/A", "-",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("malformed {format} data: {detail}")]
    Malformed { format: Format, detail: String },

    #[error("dataset has no data rows")]
    EmptyDataset { format: Option<Format> },

    #[error("sheet {name:?} not found (available: {})", available.join(", "))]
    SheetNotFound { name: String, available: Vec<String> },
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormatError,
            ParseError::Malformed { .. } => ErrorKind::MalformedDataError,
            ParseError::EmptyDataset { .. } => ErrorKind::EmptyDatasetError,
            ParseError::SheetNotFound { .. } => ErrorKind::SheetNotFound,
        }
    }

    pub(crate) fn malformed(format: Format, detail: impl Into<String>) -> Self {
        ParseError::Malformed {
            format,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Skip detection and parse as this format.
    pub format: Option<Format>,
    /// Zero-based index, among non-blank rows, of the header row.
    pub header_row: Option<usize>,
    /// Worksheet name for workbooks; the first sheet when unset.
    pub sheet: Option<String>,
    pub na_values: Vec<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            format: None,
            header_row: Some(0),
            sheet: None,
            na_values: DEFAULT_NA_VALUES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Metadata that helps pick a format before looking at the bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceHint<'a> {
    pub content_type: Option<&'a str>,
    /// URL path or file path; only its extension is used.
    pub path: Option<&'a str>,
}

impl<'a> SourceHint<'a> {
    pub fn from_payload(payload: &'a RawPayload) -> Self {
        Self {
            content_type: payload.content_type(),
            path: Some(payload.source().path()),
        }
    }
}

/// Parse a buffer into a table. Pure and deterministic: the same bytes,
/// hint and options always give the same table.
#[instrument(level = "info", skip_all, fields(bytes = buffer.len()))]
pub fn parse_table(
    buffer: &PayloadBuffer,
    hint: &SourceHint<'_>,
    options: &ParseOptions,
) -> Result<Table, ParseError> {
    if format::strip_bom(buffer.as_bytes())
        .iter()
        .all(u8::is_ascii_whitespace)
    {
        return Err(ParseError::EmptyDataset {
            format: options.format,
        });
    }

    let format = format::detect(buffer, hint, options.format)?;
    let grid = match format {
        Format::Delimited { delimiter } => delimited::read_delimited(buffer, delimiter)?,
        Format::Xlsx => xlsx::read_xlsx(buffer, options.sheet.as_deref())?,
    };
    let table = grid.into_table(format, options)?;

    info!(
        %format,
        rows = table.num_rows(),
        columns = table.num_columns(),
        "parsed table"
    );
    Ok(table)
}

/// Parse a fetched payload, using its content type and URL as hints.
pub fn parse_payload(payload: &RawPayload, options: &ParseOptions) -> Result<Table, ParseError> {
    parse_table(
        &PayloadBuffer::from(payload),
        &SourceHint::from_payload(payload),
        options,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{DataType, Value};
    use crate::test_util::{xlsx_bytes, zip_bytes};
    use chrono::NaiveDate;

    fn csv(text: &str) -> Result<Table, ParseError> {
        parse_table(
            &PayloadBuffer::new(text.as_bytes().to_vec()),
            &SourceHint {
                content_type: Some("text/csv"),
                path: None,
            },
            &ParseOptions::default(),
        )
    }

    #[test]
    fn parses_typed_csv() {
        let t = csv("region,sales,price,day\nA,10,1.5,2024-01-02\nB,20,2,2024-01-03\n").unwrap();
        assert_eq!(t.num_rows(), 2);
        assert_eq!(
            t.schema(),
            vec![
                ("region", DataType::Text),
                ("sales", DataType::Integer),
                ("price", DataType::Float),
                ("day", DataType::Temporal),
            ]
        );
        assert_eq!(t.column("price").unwrap().value(1), Value::Float(2.0));
        assert_eq!(
            t.column("day").unwrap().value(0),
            Value::Temporal(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
    }

    #[test]
    fn parsing_is_deterministic() {
        let text = "a,b,a\n1,x,2\n,y,3\n";
        assert_eq!(csv(text).unwrap(), csv(text).unwrap());
    }

    #[test]
    fn every_column_has_every_row() {
        let t = csv("a,b,c\n1\n2,3\n4,5,6\n\n7,,\n").unwrap();
        assert_eq!(t.num_rows(), 4);
        for col in t.columns() {
            assert_eq!(col.len(), 4);
        }
        assert!(t.column("b").unwrap().value(0).is_null());
        assert_eq!(t.column("a").unwrap().value(3), Value::Integer(7));
    }

    #[test]
    fn duplicate_and_blank_headers_are_renamed() {
        let t = csv("x,x,,x\n1,2,3,4\n").unwrap();
        assert_eq!(t.column_names(), vec!["x", "x.1", "unnamed_3", "x.2"]);
    }

    #[test]
    fn headerless_input_gets_generated_names() {
        let t = parse_table(
            &PayloadBuffer::new(b"1,a\n2,b\n".to_vec()),
            &SourceHint::default(),
            &ParseOptions {
                header_row: None,
                ..ParseOptions::default()
            },
        )
        .unwrap();
        assert_eq!(t.column_names(), vec!["column_1", "column_2"]);
        assert_eq!(t.num_rows(), 2);
    }

    #[test]
    fn header_row_offset_skips_preamble() {
        let t = parse_table(
            &PayloadBuffer::new(b"Quarterly export\nregion,sales\nA,1\n".to_vec()),
            &SourceHint::default(),
            &ParseOptions {
                header_row: Some(1),
                ..ParseOptions::default()
            },
        )
        .unwrap();
        assert_eq!(t.column_names(), vec!["region", "sales"]);
        assert_eq!(t.num_rows(), 1);
    }

    #[test]
    fn na_tokens_become_nulls() {
        let t = csv("v,w\n1,NA\nN/A,x\n3,\n").unwrap();
        let v = t.column("v").unwrap();
        assert_eq!(v.data_type(), DataType::Integer);
        assert!(v.value(1).is_null());
        assert_eq!(t.column("w").unwrap().value(1), Value::Text("x"));
        assert_eq!(t.column("w").unwrap().data().null_count(), 2);
    }

    #[test]
    fn empty_inputs_are_empty_datasets() {
        for text in ["", "  \n\t\n", "a,b,c\n", "a,b\n\n\n"] {
            let err = csv(text).unwrap_err();
            assert!(
                matches!(err, ParseError::EmptyDataset { .. }),
                "{:?} gave {:?}",
                text,
                err
            );
            assert_eq!(err.kind(), ErrorKind::EmptyDatasetError);
        }
    }

    #[test]
    fn rows_wider_than_header_are_malformed() {
        let err = csv("a,b\n1,2\n3,4,5\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDataError);
        assert!(err.to_string().contains("line 3"), "{}", err);
    }

    #[test]
    fn binary_payload_is_unsupported() {
        let err = parse_table(
            &PayloadBuffer::new(vec![0x00, 0x9f, 0x92, 0x96, 0x00]),
            &SourceHint::default(),
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormatError);
    }

    #[test]
    fn parses_xlsx_with_shared_strings() {
        let sheet = r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>10</v></c></row>
<row r="3"><c r="A3" t="s"><v>3</v></c><c r="B3"><v>20.5</v></c></row>
</sheetData></worksheet>"#;
        let shared = r#"<?xml version="1.0" encoding="UTF-8"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="4" uniqueCount="4">
<si><t>region</t></si><si><t>sales</t></si><si><t>A</t></si><si><r><t>B</t></r><r><t>2</t></r></si>
</sst>"#;
        let payload = RawPayload::new(
            xlsx_bytes(sheet, Some(shared)),
            Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".into()),
            url::Url::parse("https://example.com/export").unwrap(),
        );
        let t = parse_payload(&payload, &ParseOptions::default()).unwrap();
        assert_eq!(t.column_names(), vec!["region", "sales"]);
        assert_eq!(t.column("region").unwrap().value(1), Value::Text("B2"));
        assert_eq!(t.column("sales").unwrap().data_type(), DataType::Float);
    }

    #[test]
    fn missing_sheet_lists_available() {
        let bytes = xlsx_bytes("<worksheet><sheetData/></worksheet>", None);
        let err = parse_table(
            &PayloadBuffer::new(bytes),
            &SourceHint::default(),
            &ParseOptions {
                sheet: Some("Costs".into()),
                ..ParseOptions::default()
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::SheetNotFound {
                name: "Costs".into(),
                available: vec!["Sales".into()],
            }
        );
    }

    #[test]
    fn zip_without_workbook_is_malformed() {
        let bytes = zip_bytes(&[("readme.txt", "hello")]);
        let err = parse_table(
            &PayloadBuffer::new(bytes),
            &SourceHint::default(),
            &ParseOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDataError);
    }
}
