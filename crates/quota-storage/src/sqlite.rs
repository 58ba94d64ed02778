use std::str::FromStr;

use async_trait::async_trait;
use quota_core::{GroupKey, RawQuotaRow};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

use crate::layout::{quote_sqlite_ident, SourceLayout};
use crate::{SourceStore, StoreError};

/// Read-only view over the file-based source database.
#[derive(Debug, Clone)]
pub struct SqliteSourceStore {
    pool: SqlitePool,
    layout: SourceLayout,
}

impl SqliteSourceStore {
    pub async fn connect(database_url: &str, layout: SourceLayout) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool, layout))
    }

    pub fn from_pool(pool: SqlitePool, layout: SourceLayout) -> Self {
        Self { pool, layout }
    }

    fn select_sql(&self) -> String {
        let l = &self.layout;
        format!(
            "SELECT {}, {}, {}, {}, {}, {} FROM {} ORDER BY rowid",
            quote_sqlite_ident(&l.category1),
            quote_sqlite_ident(&l.category2),
            quote_sqlite_ident(&l.model),
            quote_sqlite_ident(&l.process),
            quote_sqlite_ident(&l.unit_price),
            quote_sqlite_ident(&l.effective_date),
            quote_sqlite_ident(&l.table),
        )
    }

    fn decode_row(&self, row: &SqliteRow) -> Result<RawQuotaRow, StoreError> {
        let l = &self.layout;
        let key = GroupKey {
            category1: text_cell(row, 0, &l.category1)?,
            category2: text_cell(row, 1, &l.category2)?,
            model: text_cell(row, 2, &l.model)?,
            process: text_cell(row, 3, &l.process)?,
        };
        Ok(RawQuotaRow {
            key,
            unit_price: decimal_cell(row, 4, &l.unit_price)?,
            effective_date: text_cell(row, 5, &l.effective_date)?,
        })
    }
}

#[async_trait]
impl SourceStore for SqliteSourceStore {
    async fn fetch_quota_rows(&self) -> Result<Vec<RawQuotaRow>, StoreError> {
        let rows = sqlx::query(&self.select_sql()).fetch_all(&self.pool).await?;
        info!(table = %self.layout.table, rows = rows.len(), "read source quota rows");
        rows.iter().map(|row| self.decode_row(row)).collect()
    }
}

// SQLite is dynamically typed: a column declared TEXT can still hold integers
// (model numbers, YYYYMMDD dates), so cells are read by trying each storage class.
fn text_cell(row: &SqliteRow, index: usize, column: &str) -> Result<String, StoreError> {
    if let Ok(Some(text)) = row.try_get::<Option<String>, _>(index) {
        return Ok(text);
    }
    if let Ok(Some(int)) = row.try_get::<Option<i64>, _>(index) {
        return Ok(int.to_string());
    }
    match row.try_get::<Option<f64>, _>(index) {
        Ok(Some(real)) if real.fract() == 0.0 => Ok(format!("{real:.0}")),
        Ok(Some(real)) => Ok(real.to_string()),
        _ => Err(StoreError::Decode {
            column: column.to_string(),
            details: "missing or non-text value".to_string(),
        }),
    }
}

fn decimal_cell(row: &SqliteRow, index: usize, column: &str) -> Result<Decimal, StoreError> {
    let decode_err = |details: String| StoreError::Decode {
        column: column.to_string(),
        details,
    };
    if let Ok(Some(text)) = row.try_get::<Option<String>, _>(index) {
        return Decimal::from_str(text.trim())
            .map_err(|err| decode_err(format!("{text:?} is not a decimal: {err}")));
    }
    if let Ok(Some(int)) = row.try_get::<Option<i64>, _>(index) {
        return Ok(Decimal::from(int));
    }
    match row.try_get::<Option<f64>, _>(index) {
        Ok(Some(real)) => Decimal::try_from(real)
            .map(|d| d.normalize())
            .map_err(|err| decode_err(format!("{real} is not representable: {err}"))),
        _ => Err(decode_err("missing or non-numeric value".to_string())),
    }
}
