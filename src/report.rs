//
// report.rs
// dicom-anon-qc
//
// Groups verdicts by study and series, computes counts and writes the JSON report with stable ordering.
//

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{
    KeepRule, QcReport, QcVerdict, ReportRules, ReportSummary, SeriesReport, StudyReport,
    TagStatus, VerdictStatus,
};
use crate::qc::QcChecker;
use crate::tags::format_tag;

const UNKNOWN_STUDY: &str = "unknown-study";

pub struct ReportWriter {
    qc_root: PathBuf,
    rules: ReportRules,
    include_timestamp: bool,
}

impl ReportWriter {
    pub fn new(qc_root: impl Into<PathBuf>, rules: ReportRules) -> Self {
        Self {
            qc_root: qc_root.into(),
            rules,
            include_timestamp: false,
        }
    }

    /// Rules block derived from the checker's keep list and PII rules.
    pub fn for_checker(qc_root: impl Into<PathBuf>, checker: &QcChecker) -> Self {
        let rules = ReportRules {
            keep_keywords: checker
                .keep()
                .iter()
                .map(|spec| KeepRule {
                    keyword: spec.keyword.clone(),
                    tag: format_tag(spec.tag),
                    required: spec.required,
                })
                .collect(),
            unresolved_keywords: checker.keep().unresolved().to_vec(),
            pii_keywords: checker
                .pii_rules()
                .iter()
                .map(|rule| rule.keyword.clone())
                .collect(),
        };
        Self::new(qc_root, rules)
    }

    /// Stamp reports with `generated_at`; off by default so reruns stay byte-identical.
    pub fn include_timestamp(mut self, include: bool) -> Self {
        self.include_timestamp = include;
        self
    }

    pub fn build(&self, verdicts: &[QcVerdict]) -> QcReport {
        let mut summary = ReportSummary::default();
        for rule in &self.rules.keep_keywords {
            summary.keep_counts_by_keyword.insert(rule.keyword.clone(), 0);
        }
        for keyword in &self.rules.pii_keywords {
            summary.pii_counts_by_keyword.insert(keyword.clone(), 0);
        }

        let mut sorted: Vec<&QcVerdict> = verdicts.iter().collect();
        sorted.sort_by(|a, b| a.file.cmp(&b.file));

        let mut studies = std::collections::BTreeMap::<String, StudyReport>::new();
        for verdict in sorted {
            summary.files_checked += 1;
            summary.not_applicable += verdict.not_applicable();
            match verdict.status {
                VerdictStatus::Pass => summary.passed += 1,
                VerdictStatus::Fail => summary.failed += 1,
                VerdictStatus::Error => summary.errors += 1,
            }

            let study_key = verdict
                .study_uid
                .clone()
                .unwrap_or_else(|| UNKNOWN_STUDY.to_string());
            let series_key = verdict
                .series_uid
                .clone()
                .unwrap_or_else(|| verdict.series_dir.clone());

            let study = studies.entry(study_key).or_default();
            study.num_files += 1;
            let series = study
                .series
                .entry(series_key)
                .or_insert_with(|| SeriesReport {
                    series_name: self.series_name(&verdict.series_dir),
                    relative_path: verdict.series_dir.clone(),
                    ..SeriesReport::default()
                });

            series.num_files += 1;
            match verdict.status {
                VerdictStatus::Pass => series.passed += 1,
                VerdictStatus::Fail => series.failed += 1,
                VerdictStatus::Error => series.errors += 1,
            }

            for check in &verdict.checks {
                if check.status != TagStatus::Present {
                    continue;
                }
                *summary
                    .keep_counts_by_keyword
                    .entry(check.keyword.clone())
                    .or_default() += 1;
                if let Some(value) = &check.value {
                    series
                        .keep_values
                        .entry(check.keyword.clone())
                        .or_default()
                        .insert(value.clone());
                }
            }
            for finding in &verdict.pii_findings {
                *summary
                    .pii_counts_by_keyword
                    .entry(finding.keyword.clone())
                    .or_default() += 1;
                series
                    .pii_values
                    .entry(finding.keyword.clone())
                    .or_default()
                    .insert(finding.value.clone());
            }
            series.files.push(verdict.clone());
        }

        summary.num_studies = studies.len();
        summary.num_series = studies.values().map(|s| s.series.len()).sum();

        QcReport {
            generated_at: self
                .include_timestamp
                .then(|| Local::now().to_rfc3339()),
            qc_root: self.qc_root.to_string_lossy().into_owned(),
            rules: self.rules.clone(),
            summary,
            studies,
        }
    }

    /// Build the report and persist it as pretty JSON at `destination`.
    pub fn write(&self, verdicts: &[QcVerdict], destination: &Path) -> Result<ReportSummary> {
        let report = self.build(verdicts);
        let io_err = |source| Error::Io {
            path: destination.to_path_buf(),
            source,
        };

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut json = serde_json::to_string_pretty(&report)
            .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        json.push('\n');
        fs::write(destination, json).map_err(io_err)?;

        info!(path = %destination.display(), files = report.summary.files_checked, "wrote QC report");
        Ok(report.summary)
    }

    fn series_name(&self, series_dir: &str) -> String {
        let dir = if series_dir == "." {
            self.qc_root.as_path()
        } else {
            Path::new(series_dir)
        };
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| series_dir.to_string())
    }
}

/// Console rendering of the summary counts.
pub struct SummaryDisplay<'a> {
    pub summary: &'a ReportSummary,
    pub report_path: &'a Path,
}

impl fmt::Display for SummaryDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.summary;
        writeln!(f, "QC summary")?;
        writeln!(f, "  Files checked:  {}", s.files_checked)?;
        writeln!(f, "  Passed:         {}", s.passed)?;
        writeln!(f, "  Failed:         {}", s.failed)?;
        writeln!(f, "  Unreadable:     {}", s.errors)?;
        writeln!(f, "  Not applicable: {} tag check(s)", s.not_applicable)?;
        writeln!(f, "  Studies/Series: {}/{}", s.num_studies, s.num_series)?;
        write!(f, "  Report:         {}", self.report_path.display())
    }
}
