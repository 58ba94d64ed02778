//! Per-run report artifacts: JSON summary, markdown brief, parquet snapshot of written facts.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use quota_core::{format_compact_date, QuotaFact};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::driver::MigrationSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Write `<reports_root>/<run_id>/` and return that directory.
pub async fn write_run_reports(
    reports_root: &Path,
    summary: &MigrationSummary,
    facts: &[QuotaFact],
) -> Result<PathBuf> {
    let run_dir = reports_root.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let summary_json =
        serde_json::to_vec_pretty(summary).context("serializing migration summary")?;
    fs::write(run_dir.join("run_summary.json"), summary_json)
        .await
        .context("writing run_summary.json")?;

    fs::write(run_dir.join("migration_brief.md"), render_brief(summary))
        .await
        .context("writing migration_brief.md")?;

    export_fact_snapshot(&run_dir, facts).await?;
    Ok(run_dir)
}

fn render_brief(summary: &MigrationSummary) -> String {
    let mut brief = format!(
        "# Quota Migration Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Final stage: {}\n- Dry run: {}\n\n## Counts\n- Source records: {}\n- Groupings: {}\n- Open-ended windows (99991231): {}\n- Tied effective dates: {}\n- Facts mapped: {}\n- Facts written: {} in {} batch(es)\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.stage,
        summary.dry_run,
        summary.derivation.records,
        summary.derivation.groups,
        summary.derivation.open_ended,
        summary.derivation.tied_dates,
        summary.facts_mapped,
        summary.facts_written,
        summary.batches_written,
    );
    if !summary.tied_windows.is_empty() {
        brief.push_str("\n## Inverted Windows\nRows sharing an effective date with a later row; written with obsolete date before effective date.\n");
        for tie in &summary.tied_windows {
            brief.push_str(&format!(
                "- {} effective {} obsolete {}\n",
                tie.key,
                format_compact_date(tie.effective_date),
                format_compact_date(tie.obsolete_date)
            ));
        }
    }
    brief
}

async fn export_fact_snapshot(run_dir: &Path, facts: &[QuotaFact]) -> Result<PathBuf> {
    let snapshot_dir = run_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let facts_path = snapshot_dir.join("quota_facts.parquet");
    write_facts_parquet(&facts_path, facts)?;

    let manifest = SnapshotManifest {
        schema_version: 1,
        files: vec![manifest_entry("quota_facts", run_dir, &facts_path)?],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_facts_parquet(path: &Path, facts: &[QuotaFact]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("cat1_code", DataType::Utf8, false),
        ArrowField::new("cat2_code", DataType::Utf8, false),
        ArrowField::new("model_code", DataType::Utf8, false),
        ArrowField::new("process_code", DataType::Utf8, false),
        ArrowField::new("unit_price", DataType::Utf8, false),
        ArrowField::new("effective_date", DataType::Utf8, false),
        ArrowField::new("obsolete_date", DataType::Utf8, false),
        ArrowField::new("created_by", DataType::Int64, false),
        ArrowField::new("created_at", DataType::Utf8, false),
    ]));

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(string_column(facts, |q| q.cat1_code.clone())),
            Arc::new(string_column(facts, |q| q.cat2_code.clone())),
            Arc::new(string_column(facts, |q| q.model_code.clone())),
            Arc::new(string_column(facts, |q| q.process_code.clone())),
            Arc::new(string_column(facts, |q| q.unit_price.to_string())),
            Arc::new(string_column(facts, |q| format_compact_date(q.effective_date))),
            Arc::new(string_column(facts, |q| format_compact_date(q.obsolete_date))),
            Arc::new(Int64Array::from(
                facts.iter().map(|q| q.created_by).collect::<Vec<_>>(),
            )),
            Arc::new(string_column(facts, |q| {
                q.created_at.format("%Y-%m-%d %H:%M:%S").to_string()
            })),
        ],
    )
    .context("building quota_facts record batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn string_column(facts: &[QuotaFact], value: impl Fn(&QuotaFact) -> String) -> StringArray {
    StringArray::from(facts.iter().map(value).collect::<Vec<_>>())
}

fn manifest_entry(name: &str, run_dir: &Path, path: &Path) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(run_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

/// Markdown listing of the most recent run reports under `reports_root`.
pub fn report_recent_markdown(reports_root: &Path, runs: usize) -> Result<String> {
    let mut lines = vec!["# Quota Migration Runs".to_string(), String::new()];
    if !reports_root.exists() {
        lines.push("_no runs recorded_".to_string());
        return Ok(lines.join("\n"));
    }

    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join("run_summary.json").exists())
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    for dir in dirs.into_iter().take(runs.max(1)) {
        let summary_path = dir.path().join("run_summary.json");
        let summary: MigrationSummary = serde_json::from_str(
            &std::fs::read_to_string(&summary_path)
                .with_context(|| format!("reading {}", summary_path.display()))?,
        )
        .with_context(|| format!("parsing {}", summary_path.display()))?;

        lines.push(format!("## Run `{}`", summary.run_id));
        lines.push(format!("- finished: {}", summary.finished_at));
        lines.push(format!("- stage: {}", summary.stage));
        lines.push(format!(
            "- facts written: {} / mapped: {}",
            summary.facts_written, summary.facts_mapped
        ));
        let manifest_path = dir.path().join("snapshots").join("manifest.json");
        if manifest_path.exists() {
            lines.push(format!("- snapshot manifest: `{}`", manifest_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}
