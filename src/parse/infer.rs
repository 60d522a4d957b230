// src/parse/infer.rs

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashSet;

use crate::table::ColumnData;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Parse the timestamp shapes we accept. Offsets are normalized to UTC.
pub fn parse_temporal(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    // Every accepted shape starts with a 4-digit year and a separator.
    if s.len() < 8 || !s.as_bytes()[..4].iter().all(u8::is_ascii_digit) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn parse_integer(s: &str) -> Option<i64> {
    s.parse().ok()
}

/// Finite floats only; `NaN` and infinities are not numbers for our purposes.
fn parse_float(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|x| x.is_finite())
}

/// Coerce raw cells to the narrowest type every non-null cell fits:
/// integer, then float, then temporal, then text. Blank cells and NA tokens
/// are null; a column with no values at all is text.
pub fn coerce_column(cells: Vec<Option<String>>, na: &HashSet<&str>) -> ColumnData {
    let cleaned: Vec<Option<&str>> = cells
        .iter()
        .map(|c| {
            c.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty() && !na.contains(s))
        })
        .collect();

    let mut any_value = false;
    let (mut int_ok, mut float_ok, mut temporal_ok) = (true, true, true);
    for v in cleaned.iter().flatten() {
        any_value = true;
        int_ok = int_ok && parse_integer(v).is_some();
        float_ok = float_ok && parse_float(v).is_some();
        temporal_ok = temporal_ok && parse_temporal(v).is_some();
        if !(int_ok || float_ok || temporal_ok) {
            break;
        }
    }

    if any_value && int_ok {
        ColumnData::Integer(cleaned.iter().map(|c| c.and_then(parse_integer)).collect())
    } else if any_value && float_ok {
        ColumnData::Float(cleaned.iter().map(|c| c.and_then(parse_float)).collect())
    } else if any_value && temporal_ok {
        ColumnData::Temporal(cleaned.iter().map(|c| c.and_then(parse_temporal)).collect())
    } else {
        let keep: Vec<bool> = cleaned.iter().map(Option::is_some).collect();
        ColumnData::Text(
            cells
                .into_iter()
                .zip(keep)
                .map(|(raw, keep)| raw.filter(|_| keep))
                .collect(),
        )
    }
}
