//
// pipeline.rs
// dicom-anon-qc
//
// Runs the configured stages in order: normalize, anonymize, QC, report.
//

use std::path::PathBuf;

use tracing::{info, warn};

use crate::anonymize::{anonymize_tree, write_failure_log, AnonymizationSummary, ProfileAnonymizer};
use crate::config::Settings;
use crate::error::Result;
use crate::models::ReportSummary;
use crate::qc::{PiiRule, QcChecker};
use crate::report::ReportWriter;
use crate::scan::{normalize_extensions, scan, Renamed};

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub renamed: Vec<Renamed>,
    pub anonymization: Option<AnonymizationSummary>,
    pub qc: Option<QcOutcome>,
}

#[derive(Debug, Clone)]
pub struct QcOutcome {
    pub summary: ReportSummary,
    pub report_path: PathBuf,
}

impl RunOutcome {
    /// 0 on full success, 2 when any file hit a fatal error, 3 when QC only found failing verdicts.
    pub fn exit_code(&self) -> u8 {
        let anon_failures = self
            .anonymization
            .as_ref()
            .map_or(0, AnonymizationSummary::failed);
        let read_errors = self.qc.as_ref().map_or(0, |q| q.summary.errors);
        let qc_failures = self.qc.as_ref().map_or(0, |q| q.summary.failed);

        if anon_failures > 0 || read_errors > 0 {
            2
        } else if qc_failures > 0 {
            3
        } else {
            0
        }
    }
}

pub fn run(settings: &Settings) -> Result<RunOutcome> {
    // Build every stage first so configuration problems surface before any file is touched.
    let anonymizer = settings
        .anonymize
        .as_ref()
        .map(|anon| ProfileAnonymizer::new(&settings.keep, &anon.policy))
        .transpose()?;
    let checker = settings
        .qc
        .as_ref()
        .map(|qc| -> Result<QcChecker> {
            let rules = PiiRule::build_all(
                qc.pii_keywords.as_slice(),
                &qc.pii_patterns,
                &settings.keep,
            )?;
            Ok(QcChecker::new(settings.keep.clone(), rules, qc.allowed_values.clone())
                .with_root(&qc.root))
        })
        .transpose()?;

    let mut outcome = RunOutcome::default();

    if let (Some(anon), Some(anonymizer)) = (&settings.anonymize, &anonymizer) {
        if settings.normalize_extensions {
            outcome
                .renamed
                .extend(normalize_extensions(&anon.input_dir, &settings.scan)?);
        }
        let files: Vec<PathBuf> = scan(&anon.input_dir, &settings.scan)?.iter().collect();
        if files.is_empty() {
            warn!(dir = %anon.input_dir.display(), "no DICOM files found to anonymize");
        }
        let summary = anonymize_tree(&anon.input_dir, &anon.output_dir, &files, anonymizer)?;
        if !summary.failures.is_empty() {
            write_failure_log(&anon.error_log_path, &summary.failures)?;
        }
        outcome.anonymization = Some(summary);
    }

    if let (Some(qc), Some(checker)) = (&settings.qc, &checker) {
        if settings.normalize_extensions && settings.anonymize.is_none() {
            outcome
                .renamed
                .extend(normalize_extensions(&qc.root, &settings.scan)?);
        }
        let files: Vec<PathBuf> = scan(&qc.root, &settings.scan)?.iter().collect();
        info!(root = %qc.root.display(), files = files.len(), "running QC");

        let verdicts = checker.run(&files);
        let summary = ReportWriter::for_checker(&qc.root, checker)
            .include_timestamp(qc.include_timestamp)
            .write(&verdicts, &qc.report_path)?;
        outcome.qc = Some(QcOutcome {
            summary,
            report_path: qc.report_path.clone(),
        });
    }

    Ok(outcome)
}
