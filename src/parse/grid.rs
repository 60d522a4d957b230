// src/parse/grid.rs

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

use super::{infer, Format, ParseError, ParseOptions};
use crate::table::{Column, Table};

/// One source row as untyped cells; `None` is a cell absent from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    /// 1-based line (delimited) or sheet row (xlsx) the row came from.
    pub source_row: usize,
    pub cells: Vec<Option<String>>,
}

impl GridRow {
    fn is_blank(&self) -> bool {
        self.cells
            .iter()
            .all(|c| c.as_deref().map_or(true, |s| s.trim().is_empty()))
    }

    /// Width ignoring trailing empty cells.
    fn used_width(&self) -> usize {
        self.cells
            .iter()
            .rposition(|c| c.as_deref().is_some_and(|s| !s.is_empty()))
            .map_or(0, |i| i + 1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawGrid {
    pub rows: Vec<GridRow>,
    /// Reject data rows wider than the header instead of widening the table.
    pub strict_width: bool,
}

impl RawGrid {
    pub fn into_table(self, format: Format, options: &ParseOptions) -> Result<Table, ParseError> {
        let mut rows: Vec<GridRow> = self.rows.into_iter().filter(|r| !r.is_blank()).collect();

        let header = match options.header_row {
            Some(h) if h < rows.len() => {
                let header = rows.remove(h);
                rows.drain(..h);
                Some(header)
            }
            Some(_) => return Err(ParseError::EmptyDataset { format: Some(format) }),
            None => None,
        };
        if rows.is_empty() {
            return Err(ParseError::EmptyDataset { format: Some(format) });
        }

        if self.strict_width {
            let expected = header
                .as_ref()
                .map_or_else(|| rows[0].cells.len(), |h| h.cells.len());
            if let Some(bad) = rows.iter().find(|r| r.used_width() > expected) {
                return Err(ParseError::malformed(
                    format,
                    format!(
                        "line {} has {} fields, expected {}",
                        bad.source_row,
                        bad.used_width(),
                        expected
                    ),
                ));
            }
        }

        let width = rows
            .iter()
            .map(|r| r.cells.len())
            .chain(header.as_ref().map(|h| h.cells.len()))
            .max()
            .unwrap_or(0);
        let names = resolve_headers(header.as_ref().map(|h| h.cells.as_slice()), width);

        let num_rows = rows.len();
        let mut raw_columns: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(num_rows); width];
        for row in rows {
            let mut cells = row.cells.into_iter();
            for col in raw_columns.iter_mut() {
                col.push(cells.next().flatten());
            }
        }

        let na: HashSet<&str> = options.na_values.iter().map(String::as_str).collect();
        let columns: Vec<Column> = names
            .into_par_iter()
            .zip(raw_columns.into_par_iter())
            .map(|(name, cells)| Column::new(name, infer::coerce_column(cells, &na)))
            .collect();

        Table::new(columns).map_err(|e| ParseError::malformed(format, e.to_string()))
    }
}

/// Column names for `width` columns: header text where present, otherwise
/// `unnamed_<n>` (blank header cell) or `column_<n>` (no header), then
/// de-duplicated in left-to-right order.
pub fn resolve_headers(header: Option<&[Option<String>]>, width: usize) -> Vec<String> {
    let names = (0..width).map(|i| {
        let text = header
            .and_then(|h| h.get(i))
            .and_then(|c| c.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match (text, header.is_some()) {
            (Some(t), _) => t.to_string(),
            (None, true) => format!("unnamed_{}", i + 1),
            (None, false) => format!("column_{}", i + 1),
        }
    });
    dedupe(names)
}

/// The first occurrence keeps its name; repeats get `.1`, `.2`, ... skipping
/// any suffixed name already in use.
fn dedupe(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::new();

    for name in names {
        if taken.insert(name.clone()) {
            out.push(name);
            continue;
        }
        let counter = counters.entry(name.clone()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}.{}", name, counter);
            if taken.insert(candidate.clone()) {
                out.push(candidate);
                break;
            }
        }
    }
    out
}
