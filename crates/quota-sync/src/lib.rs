//! Quota migration pipeline: validity windows, code dictionaries, fact mapping
//! and the batched append into the destination store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quota_storage::{MySqlDestinationStore, SqliteSourceStore};
use tracing::{info, warn};

mod config;
mod dictionary;
mod driver;
mod error;
mod mapping;
mod report;
mod validity;

pub use config::MigrationConfig;
pub use dictionary::{resolve_dictionaries, CodeDictionaries, CodeDictionary};
pub use driver::{
    CompletedMigration, DriverOptions, MigrationDriver, MigrationFailure, MigrationStage,
    MigrationSummary, DEFAULT_BATCH_SIZE, DEFAULT_CREATED_BY,
};
pub use error::{MigrationError, UnresolvedReference};
pub use mapping::{map_all, map_fact, MappingContext};
pub use report::{report_recent_markdown, write_run_reports, SnapshotManifest, SnapshotManifestFile};
pub use validity::{derive_validity_windows, Derivation, DerivationStats, TiedWindow};

pub const CRATE_NAME: &str = "quota-sync";

#[derive(Debug, Clone)]
pub struct MigrationRunOutput {
    pub summary: MigrationSummary,
    pub reports_dir: Option<PathBuf>,
}

/// Connect both stores from environment configuration and run one migration.
pub async fn run_migration_from_env(dry_run: bool) -> Result<MigrationRunOutput> {
    let config = MigrationConfig::from_env();
    let layout = config.load_layout()?;

    let source = SqliteSourceStore::connect(&config.source_database_url, layout.source)
        .await
        .context("opening source store")?;
    let destination =
        MySqlDestinationStore::connect(&config.database_url, layout.dictionaries, layout.facts)
            .await
            .context("opening destination store")?;

    let driver = MigrationDriver::new(
        Box::new(source),
        Box::new(destination),
        config.driver_options(dry_run),
    );
    let completed = driver.run().await?;

    Ok(finish_run(completed, &config.reports_dir).await)
}

/// Facts are committed by the time this runs, so a report failure is logged and
/// reported as `reports_dir: None`, never as an error.
async fn finish_run(completed: CompletedMigration, reports_root: &Path) -> MigrationRunOutput {
    let reports_dir = if completed.summary.dry_run {
        None
    } else {
        match write_run_reports(reports_root, &completed.summary, &completed.facts).await {
            Ok(dir) => {
                info!(reports_dir = %dir.display(), "wrote run reports");
                Some(dir)
            }
            Err(err) => {
                warn!(
                    run_id = %completed.summary.run_id,
                    reports_root = %reports_root.display(),
                    facts_written = completed.summary.facts_written,
                    error = %format!("{err:#}"),
                    "facts committed but run reports could not be written"
                );
                None
            }
        }
    };

    MigrationRunOutput {
        summary: completed.summary,
        reports_dir,
    }
}

pub fn report_recent_from_env(runs: usize) -> Result<String> {
    let config = MigrationConfig::from_env();
    report_recent_markdown(&config.reports_dir, runs)
}
