mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use sweep_kernel::client::http::HttpControlPlane;
use sweep_kernel::config::SweepConfig;
use sweep_kernel::sweep::{sweep, SweepReport};

/// Sweep CLI
#[derive(Parser, Debug)]
#[command(name = "sweep")]
#[command(about = "Remove resources left behind by integration runs", long_about = None)]
struct Cli {
    /// Path to config JSON
    #[arg(long)]
    config: Option<String>,

    /// Store holding the test entities (overrides DELTASTREAM_STORE)
    #[arg(long)]
    store: Option<String>,

    /// Only entities starting with this prefix are dropped
    #[arg(long)]
    entity_prefix: Option<String>,

    /// List what would be dropped without dropping anything
    #[arg(long)]
    dry_run: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Wrapper for JSON output
#[derive(Debug, Serialize)]
struct CliOutput<'a> {
    clean: bool,
    resources_dropped: usize,
    report: &'a SweepReport,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    // ----------------------------
    // Load config
    // ----------------------------
    let mut config = match &cli.config {
        Some(path) => SweepConfig::from_file(path)?,
        None => SweepConfig::default_config(),
    }
    .with_env()?;

    if let Some(store) = cli.store {
        config.store = Some(store);
    }
    if let Some(prefix) = cli.entity_prefix {
        config.entity_prefix = prefix;
    }

    let mut options = config
        .sweep_options()
        .context("set DELTASTREAM_STORE or pass --store")?;
    options.dry_run = cli.dry_run;

    // ----------------------------
    // Connect and sweep
    // ----------------------------
    let client = HttpControlPlane::new(config.http_settings()?)?;
    let report = sweep(&client, &options).await?;

    // ----------------------------
    // Output
    // ----------------------------
    if cli.json {
        let output = CliOutput {
            clean: report.is_clean(),
            resources_dropped: report.resources_dropped(),
            report: &report,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for db in &report.databases {
            tracing::info!(
                database = %db.database,
                dropped = db.result.dropped.len(),
                failed = db.result.failed.len(),
                "Database swept"
            );
        }
        tracing::info!(
            entities_found = report.entities_found.len(),
            entities_dropped = report.entities_dropped.len(),
            entities_failed = report.entities_failed.len(),
            dry_run = report.dry_run,
            "Sweep finished"
        );
    }

    Ok(())
}
