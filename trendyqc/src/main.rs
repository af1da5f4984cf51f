//! trendyqc
#![deny(missing_docs)]

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, TimeZone, Utc};
use clap::Parser;
use env_logger::Builder;
use itertools::Itertools;
use log::{info, warn, LevelFilter};
use qc_config::ConfigDir;
use qc_lib::source::LocalReport;
use qc_lib::{Digest, IngestionRunner, JsonStore, LocalReportDir};
use qc_types::Severity;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

const CMD: &str = "trendyqc";

/// Import MultiQC reports into the TrendyQC store
#[derive(Parser, Debug)]
#[clap(name = CMD, version)]
struct TrendyQc {
    #[clap(subcommand)]
    subcmd: SubCommand,

    /// Configuration directory holding assays.json and tool_configs/.
    /// Defaults to $TRENDYQC_CONFIG_DIR, then to the bundled configuration.
    #[clap(long, value_name = "PATH", global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum SubCommand {
    /// Import every report found under a directory
    #[clap(name = "import")]
    Import(Import),

    /// Load every assay and tool configuration and report problems
    #[clap(name = "check-config")]
    CheckConfig,
}

#[derive(Parser, Debug)]
struct Import {
    /// Directory with one sub-directory per report, each holding
    /// multiqc_data.json and metadata.json
    #[clap(long, value_name = "PATH")]
    reports: PathBuf,

    /// JSON store file, created if missing
    #[clap(long, value_name = "PATH")]
    store: PathBuf,

    /// Only import reports of these projects
    #[clap(long, value_name = "ID")]
    project: Vec<String>,

    /// Only import reports whose job was created on or after this date
    #[clap(long, value_name = "YYYY-MM-DD")]
    since: Option<NaiveDate>,

    /// Build the records but do not write them
    #[clap(long)]
    dry_run: bool,
}

impl Import {
    fn selects(&self, report: &LocalReport) -> bool {
        let metadata = report.metadata();
        if !self.project.is_empty() && !self.project.contains(&metadata.project_id) {
            return false;
        }
        match self.since.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            Some(since) => {
                let since = Utc.from_utc_datetime(&since).timestamp_millis();
                metadata.job_created >= since
            }
            None => true,
        }
    }

    fn execute(&self, config: &ConfigDir) -> Result<ExitCode> {
        let discovered = LocalReportDir::discover(&self.reports)?;
        let selected = discovered
            .reports()
            .iter()
            .filter(|r| self.selects(r))
            .cloned()
            .collect::<Vec<_>>();
        info!(
            "{} of {} reports under {} selected",
            selected.len(),
            discovered.reports().len(),
            self.reports.display()
        );
        let reports = LocalReportDir::from_reports(selected);

        let mut store = JsonStore::open(&self.store)?;
        let outcomes = IngestionRunner::new(config, &reports, &mut store)
            .dry_run(self.dry_run)
            .import_reports(&reports.sources())
            .with_context(|| format!("importing reports from {}", self.reports.display()))?;

        let digest = Digest::new(&outcomes);
        print!("{digest}");
        Ok(match digest.severity {
            Some(Severity::Error) => ExitCode::FAILURE,
            _ => ExitCode::SUCCESS,
        })
    }
}

fn check_config(config: &ConfigDir) -> Result<ExitCode> {
    let mut failures = 0;
    for assay in config.load_all_assays()? {
        for entry in &assay.entries {
            match config.load_tool_definition(&entry.tool, entry.subtool.as_deref()) {
                Ok(tool) if tool.binding.is_none() => {
                    warn!(
                        "{}: {} does not map to a storage table",
                        assay.name, tool.key
                    )
                }
                Ok(_) => {}
                Err(e) => {
                    println!("ERROR: {}: {}: {e}", assay.name, entry.multiqc_field);
                    failures += 1;
                }
            }
        }
        info!("{}: {} sections checked", assay.name, assay.entries.len());
    }
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_error_chain(err: &anyhow::Error) {
    println!("ERROR: {}", err.chain().join("\n\tCaused by: "));
}

fn init_logging() {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn inner_main() -> Result<ExitCode> {
    let opts = TrendyQc::parse();
    init_logging();
    let config = ConfigDir::resolve(opts.config_dir.as_deref());

    match opts.subcmd {
        SubCommand::Import(import) => import.execute(&config),
        SubCommand::CheckConfig => check_config(&config),
    }
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
