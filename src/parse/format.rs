// src/parse/format.rs

use std::{fmt, path::Path, str::FromStr};
use tracing::debug;

use super::{ParseError, SourceHint};
use crate::buffer::PayloadBuffer;

const SNIFF_LEN: usize = 4096;
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const PARQUET_MAGIC: &[u8] = b"PAR1";
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Character-separated text; `,` is CSV and `\t` is TSV.
    Delimited { delimiter: u8 },
    /// Office Open XML workbook.
    Xlsx,
}

impl Format {
    pub const CSV: Format = Format::Delimited { delimiter: b',' };
    pub const TSV: Format = Format::Delimited { delimiter: b'\t' };
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Delimited { delimiter: b',' } => f.write_str("csv"),
            Format::Delimited { delimiter: b'\t' } => f.write_str("tsv"),
            Format::Delimited { delimiter } => write!(f, "delimited({:?})", *delimiter as char),
            Format::Xlsx => f.write_str("xlsx"),
        }
    }
}

impl FromStr for Format {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Format::CSV),
            "tsv" | "tab" => Ok(Format::TSV),
            "psv" | "pipe" => Ok(Format::Delimited { delimiter: b'|' }),
            "ssv" | "semicolon" => Ok(Format::Delimited { delimiter: b';' }),
            "xlsx" | "excel" => Ok(Format::Xlsx),
            other => Err(ParseError::UnsupportedFormat(format!(
                "unknown format name {:?}",
                other
            ))),
        }
    }
}

/// Strip a leading UTF-8 byte-order mark.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Resolve the payload format: forced format, then content type, then the
/// path extension, then magic bytes.
pub fn detect(
    buffer: &PayloadBuffer,
    hint: &SourceHint<'_>,
    forced: Option<Format>,
) -> Result<Format, ParseError> {
    if let Some(f) = forced {
        return Ok(f);
    }

    let declared = match hint.content_type.and_then(from_media_type) {
        Some(res) => Some(res?),
        None => match hint.path.and_then(from_extension) {
            Some(res) => Some(res?),
            None => None,
        },
    };

    let format = match declared {
        Some(Format::Delimited { delimiter: b',' }) => {
            // ".csv" files are often semicolon- or pipe-separated.
            match sniff_delimiter(strip_bom(buffer.head(SNIFF_LEN))) {
                d @ (b';' | b'|') => Format::Delimited { delimiter: d },
                _ => Format::CSV,
            }
        }
        Some(f) => f,
        None => sniff(buffer.head(SNIFF_LEN))?,
    };
    debug!(%format, content_type = ?hint.content_type, path = ?hint.path, "resolved format");
    Ok(format)
}

fn from_media_type(media_type: &str) -> Option<Result<Format, ParseError>> {
    match media_type {
        "text/csv" | "application/csv" | "text/comma-separated-values" | "text/x-csv" => {
            Some(Ok(Format::CSV))
        }
        "text/tab-separated-values" => Some(Ok(Format::TSV)),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            Some(Ok(Format::Xlsx))
        }
        "application/json" | "text/html" | "application/xml" | "text/xml" | "application/pdf"
        | "application/vnd.apache.parquet" => Some(Err(ParseError::UnsupportedFormat(format!(
            "content type {}",
            media_type
        )))),
        // text/plain, application/octet-stream, application/vnd.ms-excel, ...: decide from the bytes
        _ => None,
    }
}

fn from_extension(path: &str) -> Option<Result<Format, ParseError>> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "csv" => Some(Ok(Format::CSV)),
        "tsv" | "tab" => Some(Ok(Format::TSV)),
        "xlsx" | "xlsm" => Some(Ok(Format::Xlsx)),
        "json" | "parquet" | "pdf" | "html" | "xml" => Some(Err(ParseError::UnsupportedFormat(
            format!(".{} file", ext),
        ))),
        _ => None,
    }
}

fn sniff(head: &[u8]) -> Result<Format, ParseError> {
    if head.starts_with(ZIP_MAGIC) {
        return Ok(Format::Xlsx);
    }
    if head.starts_with(OLE2_MAGIC) {
        return Err(ParseError::UnsupportedFormat(
            "legacy Excel 97-2003 workbook (.xls)".into(),
        ));
    }
    if head.starts_with(GZIP_MAGIC) {
        return Err(ParseError::UnsupportedFormat("gzip-compressed payload".into()));
    }
    if head.starts_with(PARQUET_MAGIC) {
        return Err(ParseError::UnsupportedFormat("parquet file".into()));
    }
    if head.contains(&0) {
        return Err(ParseError::UnsupportedFormat("binary payload".into()));
    }

    let delimiter = sniff_delimiter(strip_bom(head));
    Ok(Format::Delimited { delimiter })
}

/// Pick the candidate delimiter occurring most often, outside quotes, on the
/// first non-blank line. Ties keep the earlier candidate; none found means `,`.
fn sniff_delimiter(head: &[u8]) -> u8 {
    let line = head
        .split(|&b| b == b'\n')
        .find(|l| l.iter().any(|b| !b.is_ascii_whitespace()))
        .unwrap_or_default();

    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut in_quotes = false;
    for &b in line {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            if let Some(i) = CANDIDATE_DELIMITERS.iter().position(|&d| d == b) {
                counts[i] += 1;
            }
        }
    }

    let mut best = 0;
    for i in 1..counts.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    CANDIDATE_DELIMITERS[best]
}
