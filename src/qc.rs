//
// qc.rs
// dicom-anon-qc
//
// Per-file verification: every keep-list tag gets exactly one presence check, and configured
// identifying attributes must not carry residual values.
//

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dicom::core::Tag;
use dicom::dictionary_std::tags;
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, warn};

use crate::dicom_access::TagValue;
use crate::error::{Error, Result};
use crate::models::{PiiFinding, QcVerdict, TagCheck, TagStatus, VerdictStatus};
use crate::record::DicomRecord;
use crate::tags::{format_tag, resolve_keyword, TagKeepSpec, TagSpec};

/// PatientID is left out on purpose: it is usually pseudonymized and kept.
pub const DEFAULT_PII_KEYWORDS: &[&str] = &[
    "PatientName",
    "OtherPatientIDs",
    "PatientBirthDate",
    "PatientSex",
    "PatientAddress",
    "PatientTelephoneNumbers",
    "PatientBirthName",
    "PatientMotherBirthName",
    "AccessionNumber",
    "ReferringPhysicianName",
    "PerformingPhysicianName",
    "OperatorsName",
    "InstitutionName",
    "InstitutionAddress",
];

const DEFAULT_PII_PATTERN: &str = r"\S";

#[derive(Debug, Clone)]
pub struct PiiRule {
    pub keyword: String,
    pub tag: Tag,
    pub pattern: Regex,
}

impl PiiRule {
    /// Build rules for `keywords`, skipping any tag the keep list retains on purpose.
    /// PatientID is never a rule: the anonymizer either keeps it or writes its own pseudonym.
    pub fn build_all<S: AsRef<str>>(
        keywords: &[S],
        patterns: &BTreeMap<String, String>,
        keep: &TagKeepSpec,
    ) -> Result<Vec<PiiRule>> {
        for keyword in patterns.keys() {
            if !keywords.iter().any(|k| k.as_ref() == keyword) {
                warn!(keyword = %keyword, "pattern given for keyword that is not a PII keyword");
            }
        }

        let mut rules = Vec::new();
        for keyword in keywords {
            let keyword = keyword.as_ref();
            let tag = resolve_keyword(keyword)
                .ok_or_else(|| Error::config(format!("unknown PII keyword '{keyword}'")))?;
            if tag == tags::PATIENT_ID {
                debug!(keyword, "PatientID is pseudonymized, not checked");
                continue;
            }
            if keep.contains(tag) {
                debug!(keyword, "PII keyword is kept, not checked");
                continue;
            }
            let source = patterns
                .get(keyword)
                .map(String::as_str)
                .unwrap_or(DEFAULT_PII_PATTERN);
            let pattern = Regex::new(source).map_err(|e| {
                Error::config(format!("invalid PII pattern for {keyword}: {e}"))
            })?;
            rules.push(PiiRule {
                keyword: keyword.to_string(),
                tag,
                pattern,
            });
        }
        Ok(rules)
    }
}

/// Stateless checker; the same record always yields the same verdict.
#[derive(Debug, Clone)]
pub struct QcChecker {
    keep: TagKeepSpec,
    pii: Vec<PiiRule>,
    allowed_values: Vec<String>,
    root: Option<PathBuf>,
}

impl QcChecker {
    pub fn new(keep: TagKeepSpec, pii: Vec<PiiRule>, allowed_values: Vec<String>) -> Self {
        Self {
            keep,
            pii,
            allowed_values,
            root: None,
        }
    }

    /// Report series directories relative to `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn keep(&self) -> &TagKeepSpec {
        &self.keep
    }

    pub fn pii_rules(&self) -> &[PiiRule] {
        &self.pii
    }

    pub fn check(&self, record: &DicomRecord) -> QcVerdict {
        let checks: Vec<TagCheck> = self
            .keep
            .iter()
            .map(|spec| check_tag(record, spec))
            .collect();

        let pii_findings: Vec<PiiFinding> = self
            .pii
            .iter()
            .filter_map(|rule| self.pii_finding(record, rule))
            .collect();

        let mut offending_tags: Vec<String> = checks
            .iter()
            .filter(|c| c.is_failure())
            .map(|c| c.keyword.clone())
            .collect();
        offending_tags.extend(pii_findings.iter().map(|f| f.keyword.clone()));

        let status = if offending_tags.is_empty() {
            VerdictStatus::Pass
        } else {
            VerdictStatus::Fail
        };

        QcVerdict {
            file: record.path().to_string_lossy().into_owned(),
            series_dir: self.series_dir(record.path()),
            study_uid: record.study_uid().map(str::to_string),
            series_uid: record.series_uid().map(str::to_string),
            status,
            offending_tags,
            checks,
            pii_findings,
            error: None,
        }
    }

    /// Read and check one file; read failures come back as `Error::Read`.
    pub fn check_file(&self, path: &Path) -> Result<QcVerdict> {
        let record = DicomRecord::read(path)?;
        Ok(self.check(&record))
    }

    /// Like [`check_file`](Self::check_file) but turns a read failure into an `error` verdict.
    pub fn verdict_for(&self, path: &Path) -> QcVerdict {
        match self.check_file(path) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "QC could not read file");
                QcVerdict {
                    file: path.to_string_lossy().into_owned(),
                    series_dir: self.series_dir(path),
                    study_uid: None,
                    series_uid: None,
                    status: VerdictStatus::Error,
                    offending_tags: Vec::new(),
                    checks: Vec::new(),
                    pii_findings: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Check every file; verdict order follows `files`.
    pub fn run(&self, files: &[PathBuf]) -> Vec<QcVerdict> {
        files.par_iter().map(|path| self.verdict_for(path)).collect()
    }

    fn pii_finding(&self, record: &DicomRecord, rule: &PiiRule) -> Option<PiiFinding> {
        let found = record.lookup(rule.tag)?;
        let value = match found {
            TagValue::Text { value } => value.clone(),
            TagValue::Sequence { items } if *items > 0 => found.display(),
            _ => return None,
        };
        if value.is_empty() || self.allowed_values.iter().any(|a| *a == value) {
            return None;
        }
        if !rule.pattern.is_match(&value) {
            return None;
        }
        Some(PiiFinding {
            keyword: rule.keyword.clone(),
            tag: format_tag(rule.tag),
            value,
        })
    }

    fn series_dir(&self, path: &Path) -> String {
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        let relative = match &self.root {
            Some(root) => parent.strip_prefix(root).unwrap_or(parent),
            None => parent,
        };
        let text = relative.to_string_lossy();
        if text.is_empty() {
            ".".to_string()
        } else {
            text.into_owned()
        }
    }
}

fn check_tag(record: &DicomRecord, spec: &TagSpec) -> TagCheck {
    let found = record.lookup(spec.tag);
    let status = match found {
        Some(value) if value.is_empty() => TagStatus::Empty,
        Some(_) => TagStatus::Present,
        None if !spec.required => TagStatus::NotApplicable,
        // A vendor block that does not exist in this file cannot be expected to hold the tag.
        None if spec.is_private() && record.lookup(private_creator(spec.tag)).is_none() => {
            TagStatus::NotApplicable
        }
        None => TagStatus::Missing,
    };
    TagCheck {
        keyword: spec.keyword.clone(),
        tag: format_tag(spec.tag),
        expected: spec.required,
        present: found.is_some(),
        status,
        value: found.filter(|v| !v.is_empty()).map(TagValue::display),
    }
}

fn private_creator(tag: Tag) -> Tag {
    Tag(tag.group(), tag.element() >> 8)
}
