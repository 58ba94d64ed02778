//! End-to-end run: read → derive → load dictionaries → map → batched append.

use std::fmt;

use chrono::{DateTime, Utc};
use quota_core::QuotaFact;
use quota_storage::{retry_with_backoff, BackoffPolicy, DestinationStore, SourceStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dictionary::resolve_dictionaries;
use crate::error::MigrationError;
use crate::mapping::{map_all, MappingContext};
use crate::validity::{derive_validity_windows, DerivationStats, TiedWindow};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_CREATED_BY: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStage {
    Init,
    SourceRead,
    Derive,
    DictionaryLoad,
    Map,
    Write,
    Done,
    Failed,
}

impl MigrationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationStage::Init => "INIT",
            MigrationStage::SourceRead => "SOURCE_READ",
            MigrationStage::Derive => "DERIVE",
            MigrationStage::DictionaryLoad => "DICTIONARY_LOAD",
            MigrationStage::Map => "MAP",
            MigrationStage::Write => "WRITE",
            MigrationStage::Done => "DONE",
            MigrationStage::Failed => "FAILED",
        }
    }
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    pub batch_size: usize,
    pub backoff: BackoffPolicy,
    pub created_by: i64,
    pub dry_run: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            backoff: BackoffPolicy::default(),
            created_by: DEFAULT_CREATED_BY,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stage: MigrationStage,
    pub dry_run: bool,
    pub derivation: DerivationStats,
    /// Rows written with an inverted window because a later row shares their effective date.
    #[serde(default)]
    pub tied_windows: Vec<TiedWindow>,
    pub facts_mapped: usize,
    pub facts_written: usize,
    pub batches_written: usize,
}

/// Successful run plus the facts it produced (written unless dry-run).
#[derive(Debug, Clone)]
pub struct CompletedMigration {
    pub summary: MigrationSummary,
    pub facts: Vec<QuotaFact>,
}

/// Terminal failure; batches committed before it stay in the destination.
#[derive(Debug, Error)]
#[error("quota migration {run_id} failed during {stage} ({rows_committed} row(s) in {batches_committed} batch(es) already committed)")]
pub struct MigrationFailure {
    pub run_id: Uuid,
    pub stage: MigrationStage,
    pub rows_committed: usize,
    pub batches_committed: usize,
    #[source]
    pub error: MigrationError,
}

struct StageOutput {
    stats: DerivationStats,
    ties: Vec<TiedWindow>,
    facts: Vec<QuotaFact>,
}

#[derive(Debug)]
struct Progress {
    stage: MigrationStage,
    rows_written: usize,
    batches_written: usize,
}

impl Progress {
    fn enter(&mut self, stage: MigrationStage) {
        info!(from = %self.stage, to = %stage, "stage transition");
        self.stage = stage;
    }
}

pub struct MigrationDriver {
    source: Box<dyn SourceStore>,
    destination: Box<dyn DestinationStore>,
    options: DriverOptions,
}

impl MigrationDriver {
    pub fn new(
        source: Box<dyn SourceStore>,
        destination: Box<dyn DestinationStore>,
        options: DriverOptions,
    ) -> Self {
        Self {
            source,
            destination,
            options,
        }
    }

    pub async fn run(&self) -> Result<CompletedMigration, MigrationFailure> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("quota_migration", %run_id, dry_run = self.options.dry_run);

        async move {
            let mut progress = Progress {
                stage: MigrationStage::Init,
                rows_written: 0,
                batches_written: 0,
            };

            match self.run_stages(&mut progress).await {
                Ok(StageOutput { stats, ties, facts }) => {
                    progress.enter(MigrationStage::Done);
                    let summary = MigrationSummary {
                        run_id,
                        started_at,
                        finished_at: Utc::now(),
                        stage: progress.stage,
                        dry_run: self.options.dry_run,
                        derivation: stats,
                        tied_windows: ties,
                        facts_mapped: facts.len(),
                        facts_written: progress.rows_written,
                        batches_written: progress.batches_written,
                    };
                    info!(
                        facts_mapped = summary.facts_mapped,
                        facts_written = summary.facts_written,
                        batches = summary.batches_written,
                        "quota migration complete"
                    );
                    Ok(CompletedMigration { summary, facts })
                }
                Err(err) => {
                    let failed_in = progress.stage;
                    progress.enter(MigrationStage::Failed);
                    error!(stage = %failed_in, error = %err, "quota migration failed");
                    Err(MigrationFailure {
                        run_id,
                        stage: failed_in,
                        rows_committed: progress.rows_written,
                        batches_committed: progress.batches_written,
                        error: err,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        progress: &mut Progress,
    ) -> Result<StageOutput, MigrationError> {
        progress.enter(MigrationStage::SourceRead);
        let rows = self
            .source
            .fetch_quota_rows()
            .await
            .map_err(MigrationError::SourceRead)?;
        if rows.is_empty() {
            info!("source quota table is empty; nothing to migrate");
            return Ok(StageOutput {
                stats: DerivationStats::default(),
                ties: Vec::new(),
                facts: Vec::new(),
            });
        }

        progress.enter(MigrationStage::Derive);
        let derivation = derive_validity_windows(rows)?;

        progress.enter(MigrationStage::DictionaryLoad);
        let dictionaries =
            resolve_dictionaries(self.destination.as_ref(), &self.options.backoff).await?;

        progress.enter(MigrationStage::Map);
        let ctx = MappingContext::now(self.options.created_by);
        let facts = map_all(&derivation.intervals, &dictionaries, &ctx)?;

        if self.options.dry_run {
            info!(facts = facts.len(), "dry run; skipping destination writes");
        } else {
            progress.enter(MigrationStage::Write);
            self.write_batches(&facts, progress).await?;
        }

        Ok(StageOutput {
            stats: derivation.stats,
            ties: derivation.ties,
            facts,
        })
    }

    async fn write_batches(
        &self,
        facts: &[QuotaFact],
        progress: &mut Progress,
    ) -> Result<(), MigrationError> {
        let batch_size = self.options.batch_size.max(1);
        for (batch_index, batch) in facts.chunks(batch_size).enumerate() {
            let span = info_span!("fact_batch", batch_index, rows = batch.len());
            let inserted = retry_with_backoff(&self.options.backoff, "insert fact batch", || {
                self.destination.insert_facts(batch)
            })
            .instrument(span)
            .await
            .map_err(|source| MigrationError::BatchWrite {
                batch_index,
                rows: batch.len(),
                source,
            })?;

            if inserted != batch.len() as u64 {
                warn!(
                    batch_index,
                    expected = batch.len(),
                    inserted,
                    "destination reported an unexpected insert count"
                );
            }
            progress.rows_written += batch.len();
            progress.batches_written += 1;
        }
        Ok(())
    }
}
