// src/parse/xlsx.rs

//! Minimal Office Open XML workbook reader: one worksheet's cell values as text.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    collections::HashMap,
    io::{BufReader, Read, Seek},
};
use tracing::debug;
use zip::{result::ZipError, ZipArchive};

use super::{
    grid::{GridRow, RawGrid},
    Format, ParseError,
};
use crate::buffer::PayloadBuffer;

const WORKBOOK_PATH: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PATH: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PATH: &str = "xl/sharedStrings.xml";
const STYLES_PATH: &str = "xl/styles.xml";
/// Excel's last column is XFD.
const MAX_COLUMNS: usize = 16_384;

#[derive(Debug, Deserialize)]
struct Workbook {
    #[serde(rename = "workbookPr", default)]
    properties: Option<WorkbookProperties>,
    #[serde(default)]
    sheets: Sheets,
}

#[derive(Debug, Deserialize)]
struct WorkbookProperties {
    #[serde(rename = "@date1904", default)]
    date1904: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Sheets {
    #[serde(rename = "sheet", default)]
    entries: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    #[serde(rename = "@name")]
    name: String,
    // `r:id`; attributes are matched by local name.
    #[serde(rename = "@id", default)]
    rel_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Relationships {
    #[serde(rename = "Relationship", default)]
    items: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "@Id")]
    id: String,
    #[serde(rename = "@Target")]
    target: String,
}

#[derive(Debug, Default, Deserialize)]
struct SharedStrings {
    #[serde(rename = "si", default)]
    items: Vec<RichText>,
}

/// `<si>` / `<is>`: plain `<t>` or a list of formatted runs.
#[derive(Debug, Default, Deserialize)]
struct RichText {
    #[serde(default)]
    t: Option<TextNode>,
    #[serde(rename = "r", default)]
    runs: Vec<Run>,
}

#[derive(Debug, Deserialize)]
struct Run {
    #[serde(default)]
    t: Option<TextNode>,
}

#[derive(Debug, Default, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

impl RichText {
    fn text(&self) -> String {
        match &self.t {
            Some(t) => t.value.clone(),
            None => self
                .runs
                .iter()
                .filter_map(|r| r.t.as_ref())
                .map(|t| t.value.as_str())
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StyleSheet {
    #[serde(rename = "numFmts", default)]
    num_fmts: Option<NumFmts>,
    #[serde(rename = "cellXfs", default)]
    cell_xfs: Option<CellXfs>,
}

#[derive(Debug, Default, Deserialize)]
struct NumFmts {
    #[serde(rename = "numFmt", default)]
    items: Vec<NumFmt>,
}

#[derive(Debug, Deserialize)]
struct NumFmt {
    #[serde(rename = "@numFmtId")]
    id: u32,
    #[serde(rename = "@formatCode", default)]
    code: String,
}

#[derive(Debug, Default, Deserialize)]
struct CellXfs {
    #[serde(rename = "xf", default)]
    items: Vec<Xf>,
}

#[derive(Debug, Deserialize)]
struct Xf {
    #[serde(rename = "@numFmtId", default)]
    num_fmt_id: u32,
}

#[derive(Debug, Default, Deserialize)]
struct Worksheet {
    #[serde(rename = "sheetData", default)]
    sheet_data: SheetData,
}

#[derive(Debug, Default, Deserialize)]
struct SheetData {
    #[serde(rename = "row", default)]
    rows: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "@r", default)]
    r: Option<usize>,
    #[serde(rename = "c", default)]
    cells: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    #[serde(rename = "@r", default)]
    r: Option<String>,
    #[serde(rename = "@t", default)]
    t: Option<String>,
    #[serde(rename = "@s", default)]
    s: Option<usize>,
    #[serde(default)]
    v: Option<String>,
    #[serde(default)]
    is: Option<RichText>,
}

/// Which cell style indices carry a date/time number format.
#[derive(Debug, Default)]
struct DateStyles {
    is_date: Vec<bool>,
}

impl DateStyles {
    fn from_stylesheet(styles: &StyleSheet) -> Self {
        let custom: HashMap<u32, &str> = styles
            .num_fmts
            .iter()
            .flat_map(|f| &f.items)
            .map(|f| (f.id, f.code.as_str()))
            .collect();
        let is_date = styles
            .cell_xfs
            .iter()
            .flat_map(|x| &x.items)
            .map(|xf| match custom.get(&xf.num_fmt_id) {
                Some(code) => is_date_format_code(code),
                None => is_builtin_date_format(xf.num_fmt_id),
            })
            .collect();
        Self { is_date }
    }

    fn is_date(&self, style: usize) -> bool {
        self.is_date.get(style).copied().unwrap_or(false)
    }
}

fn is_builtin_date_format(id: u32) -> bool {
    matches!(id, 14..=22 | 27..=36 | 45..=47 | 50..=58)
}

/// A custom number format is a date format if it uses a date/time token
/// outside quoted literals, bracketed sections and escapes.
fn is_date_format_code(code: &str) -> bool {
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut skip_next = false;
    for ch in code.chars() {
        if skip_next {
            skip_next = false;
            continue;
        }
        match ch {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '\\' | '_' | '*' => skip_next = true,
            '[' => in_brackets = true,
            ']' => in_brackets = false,
            _ if in_brackets => {}
            'y' | 'Y' | 'd' | 'D' | 'h' | 'H' | 's' | 'S' | 'm' | 'M' => return true,
            _ => {}
        }
    }
    false
}

/// Excel serial day number to a timestamp, rounded to the millisecond.
fn serial_to_datetime(serial: f64, date1904: bool) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = if date1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)?
    } else {
        // Day 60 is the fictitious 1900-02-29, so the usable epoch is 1899-12-30.
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch
        .and_hms_opt(0, 0, 0)?
        .checked_add_signed(TimeDelta::try_milliseconds(millis)?)
}

fn format_datetime(dt: NaiveDateTime) -> String {
    if dt.time() == chrono::NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()
    }
}

/// Zero-based column index of a cell reference like `AB12`.
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters = cell_ref
        .bytes()
        .take_while(u8::is_ascii_alphabetic)
        .collect::<Vec<_>>();
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let n = letters.iter().fold(0usize, |acc, b| {
        acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize
    });
    (n <= MAX_COLUMNS).then(|| n - 1)
}

fn read_part<R, T>(archive: &mut ZipArchive<R>, path: &str) -> Result<Option<T>, ParseError>
where
    R: Read + Seek,
    T: DeserializeOwned,
{
    let entry = match archive.by_name(path) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(ParseError::malformed(
                Format::Xlsx,
                format!("reading {}: {}", path, e),
            ))
        }
    };
    quick_xml::de::from_reader(BufReader::new(entry))
        .map(Some)
        .map_err(|e| ParseError::malformed(Format::Xlsx, format!("parsing {}: {}", path, e)))
}

/// Worksheet part for `wanted` (first sheet when `None`).
fn resolve_sheet(
    workbook: &Workbook,
    rels: &Relationships,
    wanted: Option<&str>,
) -> Result<(String, String), ParseError> {
    let sheets = &workbook.sheets.entries;
    if sheets.is_empty() {
        return Err(ParseError::malformed(Format::Xlsx, "workbook has no sheets"));
    }

    let idx = match wanted {
        Some(name) => sheets.iter().position(|s| s.name == name).ok_or_else(|| {
            ParseError::SheetNotFound {
                name: name.to_string(),
                available: sheets.iter().map(|s| s.name.clone()).collect(),
            }
        })?,
        None => 0,
    };
    let entry = &sheets[idx];

    let target = entry
        .rel_id
        .as_ref()
        .and_then(|id| rels.items.iter().find(|r| &r.id == id))
        .map(|r| &r.target);
    let path = match target {
        Some(t) if t.starts_with('/') => t.trim_start_matches('/').to_string(),
        Some(t) => format!("xl/{}", t),
        None => format!("xl/worksheets/sheet{}.xml", idx + 1),
    };
    Ok((entry.name.clone(), path))
}

struct CellContext<'a> {
    shared: &'a [String],
    styles: &'a DateStyles,
    date1904: bool,
}

impl CellContext<'_> {
    fn text(&self, cell: &Cell) -> Result<Option<String>, ParseError> {
        let v = cell.v.as_deref().filter(|v| !v.is_empty());
        let text = match cell.t.as_deref() {
            Some("s") => match v {
                Some(v) => {
                    let idx: usize = v.trim().parse().map_err(|_| {
                        ParseError::malformed(Format::Xlsx, format!("bad shared string index {:?}", v))
                    })?;
                    let s = self.shared.get(idx).ok_or_else(|| {
                        ParseError::malformed(
                            Format::Xlsx,
                            format!("shared string index {} out of range", idx),
                        )
                    })?;
                    Some(s.clone())
                }
                None => None,
            },
            Some("inlineStr") => cell.is.as_ref().map(RichText::text),
            Some("b") => v.map(|v| (if v.trim() == "1" { "TRUE" } else { "FALSE" }).to_string()),
            Some("e") => None,
            Some("str") | Some("d") => v.map(str::to_string),
            _ => v.map(|v| self.number(v, cell.s)),
        };
        Ok(text)
    }

    fn number(&self, v: &str, style: Option<usize>) -> String {
        if style.is_some_and(|s| self.styles.is_date(s)) {
            if let Some(dt) = v
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|serial| serial_to_datetime(serial, self.date1904))
            {
                return format_datetime(dt);
            }
        }
        v.to_string()
    }
}

/// Read the chosen worksheet of an xlsx workbook into a grid.
pub fn read_xlsx(buffer: &PayloadBuffer, sheet: Option<&str>) -> Result<RawGrid, ParseError> {
    let mut archive = ZipArchive::new(buffer.reader()).map_err(|e| {
        ParseError::malformed(Format::Xlsx, format!("not a zip archive: {}", e))
    })?;

    let workbook: Workbook = read_part(&mut archive, WORKBOOK_PATH)?.ok_or_else(|| {
        ParseError::malformed(Format::Xlsx, format!("missing {}", WORKBOOK_PATH))
    })?;
    let rels: Relationships = read_part(&mut archive, WORKBOOK_RELS_PATH)?.unwrap_or_default();
    let (sheet_name, sheet_path) = resolve_sheet(&workbook, &rels, sheet)?;

    let shared: Vec<String> = read_part::<_, SharedStrings>(&mut archive, SHARED_STRINGS_PATH)?
        .map(|sst| sst.items.iter().map(RichText::text).collect())
        .unwrap_or_default();
    let styles = read_part::<_, StyleSheet>(&mut archive, STYLES_PATH)?
        .map(|s| DateStyles::from_stylesheet(&s))
        .unwrap_or_default();
    let date1904 = workbook
        .properties
        .as_ref()
        .and_then(|p| p.date1904.as_deref())
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let worksheet: Worksheet = read_part(&mut archive, &sheet_path)?.ok_or_else(|| {
        ParseError::malformed(Format::Xlsx, format!("missing worksheet {}", sheet_path))
    })?;
    debug!(
        sheet = %sheet_name,
        path = %sheet_path,
        shared_strings = shared.len(),
        date1904,
        "reading worksheet"
    );

    let ctx = CellContext {
        shared: &shared,
        styles: &styles,
        date1904,
    };
    let mut rows = Vec::with_capacity(worksheet.sheet_data.rows.len());
    let mut next_row = 1;
    for row in &worksheet.sheet_data.rows {
        let source_row = row.r.unwrap_or(next_row);
        next_row = source_row + 1;

        let mut cells: Vec<Option<String>> = Vec::new();
        let mut next_col = 0;
        for cell in &row.cells {
            let col = cell.r.as_deref().and_then(column_index).unwrap_or(next_col);
            next_col = col + 1;
            if cells.len() <= col {
                cells.resize(col + 1, None);
            }
            cells[col] = ctx.text(cell)?;
        }
        rows.push(GridRow { source_row, cells });
    }

    Ok(RawGrid {
        rows,
        strict_width: false,
    })
}
