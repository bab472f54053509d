//
// cli.rs
// dicom-anon-qc
//
// Defines the CLI surface with Clap, loads the configuration and prints the console summary.
//

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::config::{RunMode, Settings, DEFAULT_CONFIG_FILE};
use crate::pipeline::{self, RunOutcome};
use crate::report::SummaryDisplay;

/// Anonymize DICOM trees and verify the result against a keep list.
#[derive(Parser, Debug)]
#[command(name = "dicom-anon-qc", version)]
#[command(about = "Anonymize DICOM files and QC the anonymized output", long_about = None)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Override which stages run
    #[arg(short, long, value_enum)]
    pub mode: Option<Mode>,
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Mode {
    AnonymizeOnly,
    QcOnly,
    Both,
}

impl From<Mode> for RunMode {
    fn from(value: Mode) -> Self {
        match value {
            Mode::AnonymizeOnly => RunMode::AnonymizeOnly,
            Mode::QcOnly => RunMode::QcOnly,
            Mode::Both => RunMode::Both,
        }
    }
}

pub fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::load(&cli.config, cli.mode.map(Into::into))
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    print_config(&settings);

    let outcome = pipeline::run(&settings).context("run aborted")?;
    print_outcome(&outcome);

    Ok(ExitCode::from(outcome.exit_code()))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_config(settings: &Settings) {
    println!("{}", "=".repeat(60));
    println!("CONFIG SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Keep keywords file : {}", settings.keep_keywords_file.display());
    let keywords: Vec<&str> = settings.keep.iter().map(|s| s.keyword.as_str()).collect();
    println!("Keep keywords      : {}", keywords.join(", "));
    println!("Valid extensions   : {}", settings.scan.extensions().join(", "));
    match &settings.anonymize {
        Some(anon) => {
            println!("Anonymization      : enabled");
            println!("  input_dir        : {}", anon.input_dir.display());
            println!("  output_dir       : {}", anon.output_dir.display());
            println!("  delete_private   : {}", anon.policy.delete_private_tags);
        }
        None => println!("Anonymization      : disabled"),
    }
    match &settings.qc {
        Some(qc) => {
            println!("QC                 : enabled");
            println!("  root             : {}", qc.root.display());
            println!("  report           : {}", qc.report_path.display());
        }
        None => println!("QC                 : disabled"),
    }
    println!("{}", "=".repeat(60));
}

fn print_outcome(outcome: &RunOutcome) {
    if !outcome.renamed.is_empty() {
        println!("Normalized {} file extension(s)", outcome.renamed.len());
    }
    if let Some(anon) = &outcome.anonymization {
        println!(
            "Anonymization summary: processed={}, failed={}",
            anon.processed,
            anon.failed()
        );
        for failure in &anon.failures {
            println!("  [ERROR] {} -> {}", failure.input_path.display(), failure.message);
        }
    }
    if let Some(qc) = &outcome.qc {
        println!(
            "{}",
            SummaryDisplay {
                summary: &qc.summary,
                report_path: &qc.report_path,
            }
        );
    }
}
