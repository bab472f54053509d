//
// models.rs
// dicom-anon-qc
//
// Serializable QC verdicts and the grouped report written at the end of a run.
//

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Outcome of one keep-list entry against one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagStatus {
    Present,
    Missing,
    Empty,
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCheck {
    pub keyword: String,
    pub tag: String,
    /// Whether the keep list marks this tag as required.
    pub expected: bool,
    pub present: bool,
    pub status: TagStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl TagCheck {
    pub fn is_failure(&self) -> bool {
        self.expected && matches!(self.status, TagStatus::Missing | TagStatus::Empty)
    }
}

/// An identifying attribute that still carries a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiFinding {
    pub keyword: String,
    pub tag: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Fail,
    /// The file could not be read; nothing about it is verified.
    Error,
}

/// Per-file QC result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcVerdict {
    pub file: String,
    /// Directory of the file relative to the QC root (`.` for the root itself).
    pub series_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_uid: Option<String>,
    pub status: VerdictStatus,
    pub offending_tags: Vec<String>,
    pub checks: Vec<TagCheck>,
    pub pii_findings: Vec<PiiFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QcVerdict {
    pub fn passed(&self) -> bool {
        self.status == VerdictStatus::Pass
    }

    pub fn not_applicable(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == TagStatus::NotApplicable)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepRule {
    pub keyword: String,
    pub tag: String,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRules {
    pub keep_keywords: Vec<KeepRule>,
    pub unresolved_keywords: Vec<String>,
    pub pii_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    /// Tag checks (not files) that were not applicable.
    pub not_applicable: usize,
    pub num_studies: usize,
    pub num_series: usize,
    pub keep_counts_by_keyword: BTreeMap<String, usize>,
    pub pii_counts_by_keyword: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesReport {
    pub series_name: String,
    pub relative_path: String,
    pub num_files: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub keep_values: BTreeMap<String, BTreeSet<String>>,
    pub pii_values: BTreeMap<String, BTreeSet<String>>,
    pub files: Vec<QcVerdict>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyReport {
    pub num_files: usize,
    pub series: BTreeMap<String, SeriesReport>,
}

/// Top-level JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    pub qc_root: String,
    pub rules: ReportRules,
    pub summary: ReportSummary,
    pub studies: BTreeMap<String, StudyReport>,
}

impl QcReport {
    pub fn verdicts(&self) -> impl Iterator<Item = &QcVerdict> {
        self.studies
            .values()
            .flat_map(|study| study.series.values())
            .flat_map(|series| series.files.iter())
    }
}
