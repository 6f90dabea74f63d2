//! Derived views over a record set.
//!
//! A [`Selector`] is a pure function of the current records. Views are
//! recomputed on every call; nothing is cached.

use crate::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A read-only projection over records.
pub trait Selector {
    type Output;

    fn select(&self, records: &[Record]) -> Self::Output;
}

impl<F, T> Selector for F
where
    F: Fn(&[Record]) -> T,
{
    type Output = T;

    fn select(&self, records: &[Record]) -> T {
        self(records)
    }
}

/// Sum of an integer field. Records without the field count as 0.
#[derive(Debug, Clone)]
pub struct Sum {
    field: String,
}

impl Sum {
    pub fn of(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Selector for Sum {
    type Output = i64;

    fn select(&self, records: &[Record]) -> i64 {
        records
            .iter()
            .filter_map(|r| r.get_i64(&self.field))
            .fold(0i64, i64::saturating_add)
    }
}

/// Positive and negative parts of a signed integer field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    /// Sum of positive values
    pub credits: i64,
    /// Sum of negative values, as a positive number
    pub debits: i64,
}

impl Totals {
    pub fn net(&self) -> i64 {
        self.credits.saturating_sub(self.debits)
    }
}

/// Sums of an integer field grouped by sign.
#[derive(Debug, Clone)]
pub struct SignedTotals {
    field: String,
}

impl SignedTotals {
    pub fn of(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Selector for SignedTotals {
    type Output = Totals;

    fn select(&self, records: &[Record]) -> Totals {
        records
            .iter()
            .filter_map(|r| r.get_i64(&self.field))
            .fold(Totals::default(), |mut t, v| {
                if v >= 0 {
                    t.credits = t.credits.saturating_add(v);
                } else {
                    t.debits = t.debits.saturating_add(v.saturating_neg());
                }
                t
            })
    }
}

/// Match on a field value, with an optional fallback for records that lack
/// the field.
#[derive(Debug, Clone)]
pub struct FieldEq {
    field: String,
    value: Value,
    fallback: Option<Value>,
}

impl FieldEq {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            fallback: None,
        }
    }

    /// Treat records without the field (or with null) as holding `value`.
    pub fn or_missing_as(mut self, value: impl Into<Value>) -> Self {
        self.fallback = Some(value.into());
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        match record.get(&self.field) {
            Some(Value::Null) | None => self.fallback.as_ref() == Some(&self.value),
            Some(v) => *v == self.value,
        }
    }
}

/// Count of records matching a field value.
#[derive(Debug, Clone)]
pub struct Count(pub FieldEq);

impl Selector for Count {
    type Output = usize;

    fn select(&self, records: &[Record]) -> usize {
        records.iter().filter(|r| self.0.matches(r)).count()
    }
}

/// Records matching a field value, in mirror order.
#[derive(Debug, Clone)]
pub struct Filter(pub FieldEq);

impl Selector for Filter {
    type Output = Vec<Record>;

    fn select(&self, records: &[Record]) -> Vec<Record> {
        records
            .iter()
            .filter(|r| self.0.matches(r))
            .cloned()
            .collect()
    }
}

/// The newest `n` records.
#[derive(Debug, Clone, Copy)]
pub struct Latest(pub usize);

impl Selector for Latest {
    type Output = Vec<Record>;

    fn select(&self, records: &[Record]) -> Vec<Record> {
        records.iter().take(self.0).cloned().collect()
    }
}
