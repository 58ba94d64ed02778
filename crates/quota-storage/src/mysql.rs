use std::time::Duration;

use async_trait::async_trait;
use quota_core::{DictionaryEntry, Dimension, QuotaFact};
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions};
use sqlx::{QueryBuilder, Row};
use tracing::{debug, info};

use crate::layout::{quote_mysql_ident, DictionaryLayouts, FactLayout};
use crate::{DestinationStore, StoreError};

const FACT_COLUMNS: [&str; 9] = [
    "cat1_code",
    "cat2_code",
    "model_code",
    "process_code",
    "unit_price",
    "effective_date",
    "obsolete_date",
    "created_by",
    "created_at",
];

/// Largest batch whose bind parameters fit in one MySQL prepared statement (65,535 placeholders).
pub const MAX_FACTS_PER_INSERT: usize = u16::MAX as usize / FACT_COLUMNS.len();

/// Server-side destination: code tables are only read, the fact table only appended to.
#[derive(Debug, Clone)]
pub struct MySqlDestinationStore {
    pool: MySqlPool,
    dictionaries: DictionaryLayouts,
    facts: FactLayout,
}

impl MySqlDestinationStore {
    pub async fn connect(
        database_url: &str,
        dictionaries: DictionaryLayouts,
        facts: FactLayout,
    ) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool, dictionaries, facts))
    }

    pub fn from_pool(pool: MySqlPool, dictionaries: DictionaryLayouts, facts: FactLayout) -> Self {
        Self {
            pool,
            dictionaries,
            facts,
        }
    }

    fn insert_prefix(&self) -> String {
        format!(
            "INSERT INTO {} ({}) ",
            quote_mysql_ident(&self.facts.table),
            FACT_COLUMNS.join(", ")
        )
    }
}

#[async_trait]
impl DestinationStore for MySqlDestinationStore {
    async fn fetch_dictionary(
        &self,
        dimension: Dimension,
    ) -> Result<Vec<DictionaryEntry>, StoreError> {
        let table = self.dictionaries.table_for(dimension);
        let sql = format!(
            "SELECT {code}, {name} FROM {table} ORDER BY {code}",
            code = quote_mysql_ident(&table.code_column),
            name = quote_mysql_ident(&table.name_column),
            table = quote_mysql_ident(&table.table),
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(DictionaryEntry {
                code: row.try_get(0)?,
                name: row.try_get(1)?,
            });
        }
        info!(%dimension, table = %table.table, entries = out.len(), "loaded code table");
        Ok(out)
    }

    async fn insert_facts(&self, facts: &[QuotaFact]) -> Result<u64, StoreError> {
        if facts.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<MySql>::new(self.insert_prefix());
        builder.push_values(facts, |mut b, fact| {
            b.push_bind(fact.cat1_code.clone())
                .push_bind(fact.cat2_code.clone())
                .push_bind(fact.model_code.clone())
                .push_bind(fact.process_code.clone())
                .push_bind(fact.unit_price)
                .push_bind(fact.effective_date)
                .push_bind(fact.obsolete_date)
                .push_bind(fact.created_by)
                .push_bind(fact.created_at);
        });

        let mut tx = self.pool.begin().await?;
        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        debug!(table = %self.facts.table, rows = result.rows_affected(), "inserted fact batch");
        Ok(result.rows_affected())
    }

    fn dictionary_source(&self, dimension: Dimension) -> String {
        self.dictionaries.table_for(dimension).table.clone()
    }
}
