//! Core domain model for the payroll quota migration.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "quota-core";

/// Upper bound written for windows with no known expiration (9999-12-31).
pub const SENTINEL_DATE: NaiveDate = match NaiveDate::from_ymd_opt(9999, 12, 31) {
    Some(date) => date,
    None => panic!("sentinel date is a valid calendar date"),
};

const COMPACT_DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateParseError {
    #[error("expected 8 digits (YYYYMMDD), got {0:?}")]
    Shape(String),
    #[error("{0:?} is not a calendar date")]
    Calendar(String),
}

/// Parse the 8-digit `YYYYMMDD` encoding used by the source store.
pub fn parse_compact_date(raw: &str) -> Result<NaiveDate, DateParseError> {
    let trimmed = raw.trim();
    if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DateParseError::Shape(raw.to_string()));
    }
    NaiveDate::parse_from_str(trimmed, COMPACT_DATE_FORMAT)
        .map_err(|_| DateParseError::Calendar(raw.to_string()))
}

pub fn format_compact_date(date: NaiveDate) -> String {
    date.format(COMPACT_DATE_FORMAT).to_string()
}

/// One of the four reference dimensions a quota row is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Category1,
    Category2,
    Model,
    Process,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Category1,
        Dimension::Category2,
        Dimension::Model,
        Dimension::Process,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Category1 => "category1",
            Dimension::Category2 => "category2",
            Dimension::Model => "model",
            Dimension::Process => "process",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (category-1, category-2, model, process) tuple that identifies one price timeline.
///
/// Field order is significant: the derived `Ord` is the output order of the deriver.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub category1: String,
    pub category2: String,
    pub model: String,
    pub process: String,
}

impl GroupKey {
    pub fn new(
        category1: impl Into<String>,
        category2: impl Into<String>,
        model: impl Into<String>,
        process: impl Into<String>,
    ) -> Self {
        Self {
            category1: category1.into(),
            category2: category2.into(),
            model: model.into(),
            process: process.into(),
        }
    }

    pub fn name_for(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::Category1 => &self.category1,
            Dimension::Category2 => &self.category2,
            Dimension::Model => &self.model,
            Dimension::Process => &self.process,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.category1, self.category2, self.model, self.process
        )
    }
}

/// Quota row as read from the source store, before date validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuotaRow {
    pub key: GroupKey,
    pub unit_price: Decimal,
    pub effective_date: String,
}

/// Historical price observation with a validated effective date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub key: GroupKey,
    pub unit_price: Decimal,
    pub effective_date: NaiveDate,
}

/// A quota record annotated with the last day its price is current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidityInterval {
    pub record: QuotaRecord,
    pub obsolete_date: NaiveDate,
}

impl ValidityInterval {
    pub fn key(&self) -> &GroupKey {
        &self.record.key
    }

    pub fn effective_date(&self) -> NaiveDate {
        self.record.effective_date
    }

    pub fn is_open_ended(&self) -> bool {
        self.obsolete_date == SENTINEL_DATE
    }
}

/// Fully code-keyed row appended to the destination fact table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaFact {
    pub process_code: String,
    pub cat1_code: String,
    pub cat2_code: String,
    pub model_code: String,
    pub unit_price: Decimal,
    pub effective_date: NaiveDate,
    pub obsolete_date: NaiveDate,
    pub created_by: i64,
    pub created_at: NaiveDateTime,
}

/// One `(code, name)` pair from a dimension's code table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub code: String,
    pub name: String,
}

impl DictionaryEntry {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_dates_parse_and_render() {
        let date = parse_compact_date("20200301").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2020, 3, 1).unwrap());
        assert_eq!(format_compact_date(date), "20200301");
        assert_eq!(format_compact_date(SENTINEL_DATE), "99991231");
        assert_eq!(parse_compact_date(" 20210101 ").unwrap().to_string(), "2021-01-01");
    }

    #[test]
    fn malformed_compact_dates_are_rejected() {
        assert!(matches!(parse_compact_date("2020-03-01"), Err(DateParseError::Shape(_))));
        assert!(matches!(parse_compact_date("2020031"), Err(DateParseError::Shape(_))));
        assert!(matches!(parse_compact_date(""), Err(DateParseError::Shape(_))));
        assert!(matches!(parse_compact_date("20200230"), Err(DateParseError::Calendar(_))));
        assert!(matches!(parse_compact_date("20201301"), Err(DateParseError::Calendar(_))));
    }

    #[test]
    fn group_keys_order_by_fields_in_sequence() {
        let a = GroupKey::new("A", "z", "z", "z");
        let b = GroupKey::new("B", "a", "a", "a");
        let b2 = GroupKey::new("B", "a", "a", "b");
        let mut keys = vec![b2.clone(), a.clone(), b.clone()];
        keys.sort();
        assert_eq!(keys, vec![a, b, b2]);
    }

    #[test]
    fn group_key_exposes_names_per_dimension() {
        let key = GroupKey::new("绕嵌排", "定位", "63-1", "精车");
        assert_eq!(key.name_for(Dimension::Category1), "绕嵌排");
        assert_eq!(key.name_for(Dimension::Process), "精车");
        assert_eq!(key.to_string(), "(绕嵌排, 定位, 63-1, 精车)");
        assert_eq!(Dimension::Category2.to_string(), "category2");
    }
}
