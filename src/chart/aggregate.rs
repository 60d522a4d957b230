// src/chart/aggregate.rs

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;

use super::Aggregation;
use crate::table::{ColumnData, DataType, Value};

/// Owned scalar carried in chart data points.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Datum {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Temporal(NaiveDateTime),
}

impl From<Value<'_>> for Datum {
    fn from(v: Value<'_>) -> Self {
        match v {
            Value::Null => Datum::Null,
            Value::Integer(i) => Datum::Integer(i),
            Value::Float(x) => Datum::Float(x),
            Value::Text(s) => Datum::Text(s.to_string()),
            Value::Temporal(t) => Datum::Temporal(t),
        }
    }
}

/// Hashable identity of a cell; floats compare by bit pattern with `-0.0 == 0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Integer(i64),
    Float(u64),
    Text(String),
    Temporal(NaiveDateTime),
}

impl From<Value<'_>> for KeyPart {
    fn from(v: Value<'_>) -> Self {
        match v {
            Value::Null => KeyPart::Null,
            Value::Integer(i) => KeyPart::Integer(i),
            Value::Float(x) => KeyPart::Float(if x == 0.0 { 0 } else { x.to_bits() }),
            Value::Text(s) => KeyPart::Text(s.to_string()),
            Value::Temporal(t) => KeyPart::Temporal(t),
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    rows: usize,
    count: usize,
    int_sum: i128,
    float_sum: f64,
    int_min: Option<i64>,
    int_max: Option<i64>,
    float_min: Option<f64>,
    float_max: Option<f64>,
}

impl Accumulator {
    fn push(&mut self, y: Option<Value<'_>>) {
        self.rows += 1;
        match y {
            Some(Value::Integer(i)) => {
                self.count += 1;
                self.int_sum += i as i128;
                self.int_min = Some(self.int_min.map_or(i, |m| m.min(i)));
                self.int_max = Some(self.int_max.map_or(i, |m| m.max(i)));
            }
            Some(Value::Float(x)) => {
                self.count += 1;
                self.float_sum += x;
                self.float_min = Some(self.float_min.map_or(x, |m| m.min(x)));
                self.float_max = Some(self.float_max.map_or(x, |m| m.max(x)));
            }
            Some(Value::Null) | None => {}
            Some(_) => self.count += 1,
        }
    }

    fn finish(&self, aggregation: Aggregation, y_type: Option<DataType>) -> Datum {
        let integer = y_type == Some(DataType::Integer);
        match aggregation {
            Aggregation::Count if y_type.is_some() => Datum::Integer(self.count as i64),
            Aggregation::Count => Datum::Integer(self.rows as i64),
            Aggregation::Sum if integer => i64::try_from(self.int_sum)
                .map(Datum::Integer)
                .unwrap_or(Datum::Float(self.int_sum as f64)),
            Aggregation::Sum => Datum::Float(self.float_sum),
            Aggregation::Mean if self.count == 0 => Datum::Null,
            Aggregation::Mean if integer => {
                Datum::Float(self.int_sum as f64 / self.count as f64)
            }
            Aggregation::Mean => Datum::Float(self.float_sum / self.count as f64),
            Aggregation::Min if integer => self.int_min.map_or(Datum::Null, Datum::Integer),
            Aggregation::Min => self.float_min.map_or(Datum::Null, Datum::Float),
            Aggregation::Max if integer => self.int_max.map_or(Datum::Null, Datum::Integer),
            Aggregation::Max => self.float_max.map_or(Datum::Null, Datum::Float),
        }
    }
}

/// One reduced group: its x (and color) identity and the aggregate of y.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    pub x: Datum,
    pub color: Option<Datum>,
    pub value: Datum,
}

/// Group rows by `(x, color)` in first-seen order and reduce `y` per group.
/// `y` may be `None` only for [`Aggregation::Count`], which then counts rows.
pub fn group_and_reduce(
    x: &ColumnData,
    color: Option<&ColumnData>,
    y: Option<&ColumnData>,
    aggregation: Aggregation,
) -> Vec<GroupRow> {
    let mut index: HashMap<(KeyPart, Option<KeyPart>), usize> = HashMap::new();
    let mut groups: Vec<(Datum, Option<Datum>, Accumulator)> = Vec::new();

    for row in 0..x.len() {
        let xv = x.value(row);
        let cv = color.map(|c| c.value(row));
        let key = (KeyPart::from(xv), cv.map(KeyPart::from));
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push((Datum::from(xv), cv.map(Datum::from), Accumulator::default()));
            groups.len() - 1
        });
        groups[slot].2.push(y.map(|c| c.value(row)));
    }

    let y_type = y.map(ColumnData::data_type);
    groups
        .into_iter()
        .map(|(x, color, acc)| GroupRow {
            value: acc.finish(aggregation, y_type),
            x,
            color,
        })
        .collect()
}
