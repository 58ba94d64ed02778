//! Validity window derivation: partition by grouping key, order by effective
//! date, then close every window the day before its successor opens.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use quota_core::{
    format_compact_date, parse_compact_date, GroupKey, QuotaRecord, RawQuotaRow,
    ValidityInterval, SENTINEL_DATE,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MigrationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationStats {
    pub records: usize,
    pub groups: usize,
    /// Rows whose window ends at the sentinel date.
    pub open_ended: usize,
    /// Adjacent rows in one grouping that share an effective date.
    pub tied_dates: usize,
}

/// A row that shares its effective date with its successor and therefore carries
/// an inverted window (`obsolete_date` one day before `effective_date`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiedWindow {
    pub key: GroupKey,
    pub effective_date: NaiveDate,
    pub obsolete_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub intervals: Vec<ValidityInterval>,
    pub ties: Vec<TiedWindow>,
    pub stats: DerivationStats,
}

/// Derive the obsolete date of every row.
///
/// Output is ordered by grouping key, then by effective date. Rows sharing an
/// effective date inside a grouping keep their source order; the earlier one
/// ends up with an empty window (obsolete date before its effective date).
/// Any malformed effective date fails the whole batch.
pub fn derive_validity_windows(rows: Vec<RawQuotaRow>) -> Result<Derivation, MigrationError> {
    let mut partitions: BTreeMap<GroupKey, Vec<QuotaRecord>> = BTreeMap::new();
    for row in rows {
        let effective_date = parse_compact_date(&row.effective_date).map_err(|source| {
            MigrationError::InvalidEffectiveDate {
                key: row.key.clone(),
                raw: row.effective_date.clone(),
                source,
            }
        })?;
        partitions
            .entry(row.key.clone())
            .or_default()
            .push(QuotaRecord {
                key: row.key,
                unit_price: row.unit_price,
                effective_date,
            });
    }

    let mut stats = DerivationStats {
        groups: partitions.len(),
        ..Default::default()
    };
    let mut intervals = Vec::new();
    let mut ties = Vec::new();

    for (key, mut records) in partitions {
        // stable: ties keep source order
        records.sort_by_key(|record| record.effective_date);

        for pair in records.windows(2) {
            if pair[0].effective_date == pair[1].effective_date {
                let tie = TiedWindow {
                    key: key.clone(),
                    effective_date: pair[0].effective_date,
                    obsolete_date: day_before(pair[1].effective_date),
                };
                warn!(
                    grouping = %tie.key,
                    unit_price = %pair[0].unit_price,
                    effective_date = %format_compact_date(tie.effective_date),
                    obsolete_date = %format_compact_date(tie.obsolete_date),
                    "duplicate effective date in grouping; earlier row written with an inverted window"
                );
                ties.push(tie);
            }
        }

        let mut records = records.into_iter().peekable();
        while let Some(record) = records.next() {
            let obsolete_date = match records.peek() {
                Some(next) => day_before(next.effective_date),
                None => SENTINEL_DATE,
            };
            intervals.push(ValidityInterval {
                record,
                obsolete_date,
            });
        }
    }

    stats.records = intervals.len();
    stats.tied_dates = ties.len();
    stats.open_ended = intervals.iter().filter(|i| i.is_open_ended()).count();
    info!(
        records = stats.records,
        groups = stats.groups,
        open_ended = stats.open_ended,
        tied_dates = stats.tied_dates,
        "derived validity windows"
    );

    Ok(Derivation {
        intervals,
        ties,
        stats,
    })
}

fn day_before(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(NaiveDate::MIN)
}
