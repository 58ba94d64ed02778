use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "quota-cli")]
#[command(about = "Payroll quota migration command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Copy the legacy quota table into the destination fact table.
    Migrate {
        /// Derive and map everything, but write nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Summarize the most recent run reports.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Migrate { dry_run: false }) {
        Commands::Migrate { dry_run } => {
            let output = quota_sync::run_migration_from_env(dry_run).await?;
            let summary = &output.summary;
            println!(
                "migration complete: run_id={} records={} groups={} mapped={} written={} batches={} dry_run={}",
                summary.run_id,
                summary.derivation.records,
                summary.derivation.groups,
                summary.facts_mapped,
                summary.facts_written,
                summary.batches_written,
                summary.dry_run
            );
            match output.reports_dir {
                Some(dir) => println!("reports: {}", dir.display()),
                None if !summary.dry_run => {
                    eprintln!("reports: not written (facts are committed; see log)")
                }
                None => {}
            }
        }
        Commands::Report { runs } => {
            println!("{}", quota_sync::report_recent_from_env(runs)?);
        }
    }

    Ok(())
}
