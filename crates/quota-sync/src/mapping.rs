//! Translate derived quota rows into code-keyed facts.

use std::collections::BTreeSet;

use chrono::{Local, NaiveDateTime, Timelike};
use quota_core::{Dimension, QuotaFact, ValidityInterval};
use tracing::info;

use crate::dictionary::CodeDictionaries;
use crate::error::{MigrationError, UnresolvedReference};

/// Audit values shared by every fact of one mapping pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingContext {
    pub created_by: i64,
    pub created_at: NaiveDateTime,
}

impl MappingContext {
    /// Capture the local wall clock once, at second precision.
    pub fn now(created_by: i64) -> Self {
        let now = Local::now().naive_local();
        Self {
            created_by,
            created_at: now.with_nanosecond(0).unwrap_or(now),
        }
    }
}

fn resolve<'d>(
    interval: &ValidityInterval,
    dictionaries: &'d CodeDictionaries,
    dimension: Dimension,
) -> Result<&'d str, UnresolvedReference> {
    let name = interval.key().name_for(dimension);
    dictionaries
        .get(dimension)
        .lookup(name)
        .ok_or_else(|| UnresolvedReference {
            dimension,
            name: name.to_string(),
            key: interval.key().clone(),
            effective_date: interval.effective_date(),
        })
}

/// Map one row; the first dimension (in category1, category2, model, process
/// order) without a code fails the row.
pub fn map_fact(
    interval: &ValidityInterval,
    dictionaries: &CodeDictionaries,
    ctx: &MappingContext,
) -> Result<QuotaFact, UnresolvedReference> {
    Ok(QuotaFact {
        cat1_code: resolve(interval, dictionaries, Dimension::Category1)?.to_string(),
        cat2_code: resolve(interval, dictionaries, Dimension::Category2)?.to_string(),
        model_code: resolve(interval, dictionaries, Dimension::Model)?.to_string(),
        process_code: resolve(interval, dictionaries, Dimension::Process)?.to_string(),
        unit_price: interval.record.unit_price,
        effective_date: interval.effective_date(),
        obsolete_date: interval.obsolete_date,
        created_by: ctx.created_by,
        created_at: ctx.created_at,
    })
}

/// Map every row or none. On failure every distinct missing (dimension, name)
/// is reported once, with the first row that referenced it.
pub fn map_all(
    intervals: &[ValidityInterval],
    dictionaries: &CodeDictionaries,
    ctx: &MappingContext,
) -> Result<Vec<QuotaFact>, MigrationError> {
    let mut facts = Vec::with_capacity(intervals.len());
    let mut seen: BTreeSet<(Dimension, String)> = BTreeSet::new();
    let mut unresolved = Vec::new();

    for interval in intervals {
        match map_fact(interval, dictionaries, ctx) {
            Ok(fact) => facts.push(fact),
            Err(_) => {
                for dimension in Dimension::ALL {
                    if let Err(reference) = resolve(interval, dictionaries, dimension) {
                        if seen.insert((dimension, reference.name.clone())) {
                            unresolved.push(reference);
                        }
                    }
                }
            }
        }
    }

    if !unresolved.is_empty() {
        return Err(MigrationError::UnresolvedReferences(unresolved));
    }

    info!(facts = facts.len(), created_at = %ctx.created_at, "mapped quota facts");
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::CodeDictionary;
    use chrono::NaiveDate;
    use quota_core::{DictionaryEntry, GroupKey, QuotaRecord, SENTINEL_DATE};
    use rust_decimal::Decimal;

    fn dict(dimension: Dimension, pairs: &[(&str, &str)]) -> CodeDictionary {
        let entries = pairs
            .iter()
            .map(|(code, name)| DictionaryEntry::new(*code, *name))
            .collect();
        CodeDictionary::from_entries(dimension, dimension.as_str(), entries).unwrap()
    }

    fn dictionaries() -> CodeDictionaries {
        CodeDictionaries::new(
            dict(Dimension::Category1, &[("RQP", "绕嵌排")]),
            dict(Dimension::Category2, &[("DW", "定位")]),
            dict(Dimension::Model, &[("M631", "63-1")]),
            dict(Dimension::Process, &[("JC", "精车")]),
        )
    }

    fn interval(key: GroupKey, date: (i32, u32, u32), obsolete: NaiveDate) -> ValidityInterval {
        ValidityInterval {
            record: QuotaRecord {
                key,
                unit_price: Decimal::new(1000, 2),
                effective_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            },
            obsolete_date: obsolete,
        }
    }

    fn ctx() -> MappingContext {
        MappingContext {
            created_by: 1,
            created_at: NaiveDate::from_ymd_opt(2026, 1, 5)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
        }
    }

    #[test]
    fn resolved_rows_copy_price_and_dates_verbatim() {
        let row = interval(
            GroupKey::new("绕嵌排", "定位", "63-1", "精车"),
            (2020, 3, 1),
            NaiveDate::from_ymd_opt(2020, 11, 30).unwrap(),
        );
        let fact = map_fact(&row, &dictionaries(), &ctx()).expect("maps");

        assert_eq!(fact.cat1_code, "RQP");
        assert_eq!(fact.cat2_code, "DW");
        assert_eq!(fact.model_code, "M631");
        assert_eq!(fact.process_code, "JC");
        assert_eq!(fact.unit_price, Decimal::new(1000, 2));
        assert_eq!(fact.effective_date, row.effective_date());
        assert_eq!(fact.obsolete_date, row.obsolete_date);
        assert_eq!(fact.created_by, 1);
        assert_eq!(fact.created_at, ctx().created_at);
    }

    #[test]
    fn unknown_category1_is_reported_not_substituted() {
        let key = GroupKey::new("未知类别", "定位", "63-1", "精车");
        let row = interval(key.clone(), (2020, 3, 1), SENTINEL_DATE);

        let err = map_fact(&row, &dictionaries(), &ctx()).unwrap_err();
        assert_eq!(err.dimension, Dimension::Category1);
        assert_eq!(err.name, "未知类别");
        assert_eq!(err.key, key);
    }

    #[test]
    fn map_all_fails_without_partial_output_and_reports_each_missing_name_once() {
        let good = interval(
            GroupKey::new("绕嵌排", "定位", "63-1", "精车"),
            (2020, 1, 1),
            SENTINEL_DATE,
        );
        let bad_a = interval(
            GroupKey::new("未知类别", "定位", "63-9", "精车"),
            (2020, 1, 1),
            NaiveDate::from_ymd_opt(2020, 6, 30).unwrap(),
        );
        let bad_b = interval(
            GroupKey::new("未知类别", "定位", "63-9", "精车"),
            (2020, 7, 1),
            SENTINEL_DATE,
        );

        let err = map_all(&[good, bad_a, bad_b], &dictionaries(), &ctx()).unwrap_err();
        let refs = err.unresolved();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].dimension, Dimension::Category1);
        assert_eq!(refs[0].name, "未知类别");
        assert_eq!(refs[0].effective_date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(refs[1].dimension, Dimension::Model);
        assert_eq!(refs[1].name, "63-9");
    }

    #[test]
    fn context_timestamp_has_no_sub_second_part() {
        assert_eq!(MappingContext::now(7).created_at.nanosecond(), 0);
        assert_eq!(MappingContext::now(7).created_by, 7);
    }
}
