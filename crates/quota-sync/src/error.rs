use std::fmt;

use chrono::NaiveDate;
use quota_core::{format_compact_date, DateParseError, Dimension, GroupKey};
use quota_storage::{RetryError, StoreError};
use thiserror::Error;

/// A name that has no code in its dimension's dictionary, with the first row that used it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub dimension: Dimension,
    pub name: String,
    pub key: GroupKey,
    pub effective_date: NaiveDate,
}

impl fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name {:?} not found in {} dictionary (row {} effective {})",
            self.name,
            self.dimension,
            self.key,
            format_compact_date(self.effective_date)
        )
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("reading source quota rows failed: {0}")]
    SourceRead(#[source] StoreError),
    #[error("invalid effective date {raw:?} in grouping {key}: {source}")]
    InvalidEffectiveDate {
        key: GroupKey,
        raw: String,
        #[source]
        source: DateParseError,
    },
    #[error("loading {dimension} dictionary failed: {source}")]
    DictionaryLoad {
        dimension: Dimension,
        #[source]
        source: RetryError,
    },
    #[error("code table {table} for dimension {dimension} is empty")]
    EmptyDictionary { dimension: Dimension, table: String },
    #[error("duplicate dictionary name {name:?} in dimension {dimension} (table {table}, duplicated names: {duplicates:?})")]
    DuplicateDictionaryName {
        dimension: Dimension,
        table: String,
        name: String,
        duplicates: Vec<String>,
    },
    #[error("{}", describe_unresolved(.0))]
    UnresolvedReferences(Vec<UnresolvedReference>),
    #[error("writing fact batch {batch_index} ({rows} rows) failed: {source}")]
    BatchWrite {
        batch_index: usize,
        rows: usize,
        #[source]
        source: RetryError,
    },
}

impl MigrationError {
    pub fn unresolved(&self) -> &[UnresolvedReference] {
        match self {
            MigrationError::UnresolvedReferences(refs) => refs,
            _ => &[],
        }
    }
}

fn describe_unresolved(refs: &[UnresolvedReference]) -> String {
    let mut text = format!("{} unresolved dictionary name(s)", refs.len());
    for reference in refs {
        text.push_str("\n  - ");
        text.push_str(&reference.to_string());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_reference_names_dimension_name_and_row() {
        let reference = UnresolvedReference {
            dimension: Dimension::Category1,
            name: "未知类别".to_string(),
            key: GroupKey::new("未知类别", "定位", "63-1", "精车"),
            effective_date: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
        };
        let err = MigrationError::UnresolvedReferences(vec![reference]);
        let text = err.to_string();
        assert!(text.starts_with("1 unresolved dictionary name(s)"));
        assert!(text.contains("name \"未知类别\" not found in category1 dictionary"));
        assert!(text.contains("(未知类别, 定位, 63-1, 精车)"));
        assert!(text.contains("effective 20200301"));
    }
}
