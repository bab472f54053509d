//
// config.rs
// dicom-anon-qc
//
// YAML configuration: the raw file model and its resolution into the immutable Settings
// passed through the pipeline.
//

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::anonymize::AnonymizationPolicy;
use crate::error::{Error, Result};
use crate::qc::DEFAULT_PII_KEYWORDS;
use crate::scan::{Detection, ScanOptions};
use crate::tags::TagKeepSpec;

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Which stages run; the CLI may override what the file says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    AnonymizeOnly,
    QcOnly,
    Both,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_keep_keywords_file")]
    pub keep_keywords_file: PathBuf,
    #[serde(default)]
    pub report_output_path: Option<PathBuf>,
    #[serde(default)]
    pub identifiers: IdentifiersSection,
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default, alias = "anonymization")]
    pub anonymize: AnonymizeSection,
    #[serde(default)]
    pub qc: QcSection,
    #[serde(default)]
    pub report: ReportSection,
}

#[derive(Debug, Deserialize)]
pub struct IdentifiersSection {
    #[serde(default = "yes")]
    pub keep_patient_id: bool,
    #[serde(default = "yes")]
    pub keep_series_instance_uid: bool,
}

impl Default for IdentifiersSection {
    fn default() -> Self {
        Self {
            keep_patient_id: true,
            keep_series_instance_uid: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanSection {
    #[serde(default)]
    pub detection: Detection,
    #[serde(default = "default_extensions")]
    pub valid_extensions: Vec<String>,
    #[serde(default)]
    pub normalize_extensions: bool,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            detection: Detection::default(),
            valid_extensions: default_extensions(),
            normalize_extensions: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnonymizeSection {
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default = "yes")]
    pub delete_private_tags: bool,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    #[serde(default)]
    pub extra_keep_keywords: Vec<String>,
    #[serde(default)]
    pub blank_keywords: Vec<String>,
    #[serde(default)]
    pub replace_keywords: Vec<String>,
    #[serde(default)]
    pub remove_keywords: Vec<String>,
    #[serde(default = "default_anon_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_error_log_filename")]
    pub error_log_filename: String,
}

impl Default for AnonymizeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            delete_private_tags: true,
            placeholder: default_placeholder(),
            extra_keep_keywords: Vec::new(),
            blank_keywords: Vec::new(),
            replace_keywords: Vec::new(),
            remove_keywords: Vec::new(),
            log_dir: default_anon_log_dir(),
            error_log_filename: default_error_log_filename(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QcSection {
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub pii_keywords: Option<Vec<String>>,
    #[serde(default)]
    pub pii_patterns: BTreeMap<String, String>,
    #[serde(default = "default_allowed_values")]
    pub allowed_values: Vec<String>,
}

impl Default for QcSection {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
            pii_keywords: None,
            pii_patterns: BTreeMap::new(),
            allowed_values: default_allowed_values(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportSection {
    #[serde(default)]
    pub include_timestamp: bool,
}

fn yes() -> bool {
    true
}

fn default_keep_keywords_file() -> PathBuf {
    PathBuf::from("keep_keywords.json")
}

fn default_extensions() -> Vec<String> {
    vec![".dcm".to_string(), ".dicom".to_string()]
}

fn default_placeholder() -> String {
    "ANONYMIZED".to_string()
}

fn default_anon_log_dir() -> PathBuf {
    PathBuf::from("logs_anonymization")
}

fn default_error_log_filename() -> String {
    "errors.json".to_string()
}

fn default_allowed_values() -> Vec<String> {
    vec!["ANONYMOUS".to_string()]
}

#[derive(Debug, Clone)]
pub struct AnonymizeSettings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub policy: AnonymizationPolicy,
    pub error_log_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct QcSettings {
    pub root: PathBuf,
    pub report_path: PathBuf,
    pub pii_keywords: Vec<String>,
    pub pii_patterns: BTreeMap<String, String>,
    pub allowed_values: Vec<String>,
    pub include_timestamp: bool,
}

/// Fully resolved, immutable run configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub keep_keywords_file: PathBuf,
    pub keep: TagKeepSpec,
    pub scan: ScanOptions,
    pub normalize_extensions: bool,
    pub anonymize: Option<AnonymizeSettings>,
    pub qc: Option<QcSettings>,
}

impl Settings {
    /// Read, parse and resolve the configuration file at `path`.
    pub fn load(path: &Path, mode: Option<RunMode>) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let file: ConfigFile = serde_yaml::from_str(&text)
            .map_err(|e| Error::config(format!("malformed config file {}: {e}", path.display())))?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::resolve(file, base_dir, mode)
    }

    /// Validate and resolve a parsed file; relative paths are taken from `base_dir`.
    pub fn resolve(file: ConfigFile, base_dir: &Path, mode: Option<RunMode>) -> Result<Self> {
        let (run_anonymize, run_qc) = match mode {
            Some(RunMode::AnonymizeOnly) => (true, false),
            Some(RunMode::QcOnly) => (false, true),
            Some(RunMode::Both) => (true, true),
            None => (file.anonymize.enabled, file.qc.enabled),
        };
        if !run_anonymize && !run_qc {
            return Err(Error::config(
                "neither anonymization nor QC is enabled, nothing to do",
            ));
        }

        let absolute = |p: &Path| -> PathBuf {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };

        let keep_keywords_file = absolute(&file.keep_keywords_file);
        let mut keep = TagKeepSpec::load(&keep_keywords_file)?;
        for keyword in &file.anonymize.extra_keep_keywords {
            keep.add_keyword(keyword, true);
        }
        if file.identifiers.keep_patient_id {
            keep.add_keyword("PatientID", true);
        }
        if file.identifiers.keep_series_instance_uid {
            keep.add_keyword("SeriesInstanceUID", true);
        }
        if keep.is_empty() {
            return Err(Error::config(format!(
                "no keep keyword in {} resolved to a DICOM tag",
                keep_keywords_file.display()
            )));
        }

        let scan = ScanOptions::new(file.scan.detection, &file.scan.valid_extensions);
        if scan.extensions().is_empty() {
            return Err(Error::config("scan.valid_extensions must not be empty"));
        }

        let input_dir = file.input_dir.as_deref().map(absolute);
        let output_dir = file.output_dir.as_deref().map(absolute);
        let policy = AnonymizationPolicy {
            delete_private_tags: file.anonymize.delete_private_tags,
            placeholder: file.anonymize.placeholder.clone(),
            blank_keywords: file.anonymize.blank_keywords.clone(),
            replace_keywords: file.anonymize.replace_keywords.clone(),
            remove_keywords: file.anonymize.remove_keywords.clone(),
        };

        let anonymize = if run_anonymize {
            let (Some(input_dir), Some(output_dir)) = (input_dir.clone(), output_dir.clone())
            else {
                return Err(Error::config(
                    "anonymization is enabled but 'input_dir' or 'output_dir' is missing",
                ));
            };
            if output_dir.starts_with(&input_dir) || input_dir.starts_with(&output_dir) {
                return Err(Error::config(format!(
                    "'output_dir' ({}) and 'input_dir' ({}) must not contain each other",
                    output_dir.display(),
                    input_dir.display()
                )));
            }
            let log_dir = if file.anonymize.log_dir.is_absolute() {
                file.anonymize.log_dir.clone()
            } else {
                output_dir.join(&file.anonymize.log_dir)
            };
            Some(AnonymizeSettings {
                error_log_path: log_dir.join(&file.anonymize.error_log_filename),
                input_dir,
                output_dir,
                policy: policy.clone(),
            })
        } else {
            None
        };

        let qc = if run_qc {
            let root = file
                .qc
                .root
                .as_deref()
                .map(absolute)
                .or_else(|| output_dir.clone())
                .ok_or_else(|| {
                    Error::config("QC is enabled but neither 'qc.root' nor 'output_dir' is set")
                })?;
            let report_path = file
                .report_output_path
                .as_deref()
                .map(absolute)
                .unwrap_or_else(|| root.join("logs_qc").join("anonymization_qc.json"));
            let pii_keywords = file.qc.pii_keywords.clone().unwrap_or_else(|| {
                DEFAULT_PII_KEYWORDS.iter().map(|k| k.to_string()).collect()
            });
            let mut allowed_values = file.qc.allowed_values.clone();
            if !allowed_values.contains(&policy.placeholder) {
                allowed_values.push(policy.placeholder.clone());
            }
            Some(QcSettings {
                root,
                report_path,
                pii_keywords,
                pii_patterns: file.qc.pii_patterns.clone(),
                allowed_values,
                include_timestamp: file.report.include_timestamp,
            })
        } else {
            None
        };

        debug!(
            keep = keep.len(),
            anonymize = anonymize.is_some(),
            qc = qc.is_some(),
            "configuration resolved"
        );

        Ok(Settings {
            keep_keywords_file,
            keep,
            scan,
            normalize_extensions: file.scan.normalize_extensions,
            anonymize,
            qc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_keep(dir: &Path) {
        fs::write(
            dir.join("keep_keywords.json"),
            r#"{"keywords": ["Modality", "MagneticFieldStrength"]}"#,
        )
        .expect("write keep list");
    }

    #[test]
    fn defaults_fill_in_around_required_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_keep(dir.path());
        let cfg = dir.path().join("config.yaml");
        fs::write(&cfg, "input_dir: raw\noutput_dir: anon\n").expect("write config");

        let settings = Settings::load(&cfg, None).expect("settings");
        let anon = settings.anonymize.expect("anonymize enabled");
        assert_eq!(anon.input_dir, dir.path().join("raw"));
        assert_eq!(
            anon.error_log_path,
            dir.path().join("anon/logs_anonymization/errors.json")
        );
        let qc = settings.qc.expect("qc enabled");
        assert_eq!(qc.root, dir.path().join("anon"));
        assert_eq!(
            qc.report_path,
            dir.path().join("anon/logs_qc/anonymization_qc.json")
        );
        assert!(qc.allowed_values.contains(&"ANONYMIZED".to_string()));
        // Modality, MagneticFieldStrength, PatientID, SeriesInstanceUID
        assert_eq!(settings.keep.len(), 4);
    }

    #[test]
    fn mode_override_wins_over_file_flags() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_keep(dir.path());
        let cfg = dir.path().join("config.yaml");
        fs::write(
            &cfg,
            "output_dir: anon\nanonymize:\n  enabled: true\nqc:\n  enabled: false\n",
        )
        .expect("write config");

        let settings = Settings::load(&cfg, Some(RunMode::QcOnly)).expect("settings");
        assert!(settings.anonymize.is_none());
        assert!(settings.qc.is_some());
    }

    #[test]
    fn missing_dirs_and_bad_yaml_are_config_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_keep(dir.path());
        let cfg = dir.path().join("config.yaml");

        fs::write(&cfg, "anonymize:\n  enabled: true\n").expect("write config");
        let err = Settings::load(&cfg, Some(RunMode::AnonymizeOnly)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        fs::write(&cfg, "input_dir: [unterminated\n").expect("write config");
        assert!(matches!(Settings::load(&cfg, None), Err(Error::Config(_))));

        let missing = dir.path().join("nope.yaml");
        assert!(matches!(Settings::load(&missing, None), Err(Error::Config(_))));
    }

    #[test]
    fn overlapping_input_and_output_trees_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_keep(dir.path());
        let cfg = dir.path().join("config.yaml");

        for (input, output) in [("data", "data"), ("data", "data/anon"), ("data/raw", "data")] {
            fs::write(&cfg, format!("input_dir: {input}\noutput_dir: {output}\n"))
                .expect("write config");
            let err = Settings::load(&cfg, None).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{input} -> {output}");
        }

        fs::write(&cfg, "input_dir: data/raw\noutput_dir: data/anon\n").expect("write config");
        assert!(Settings::load(&cfg, None).is_ok());
    }

    #[test]
    fn original_section_name_is_accepted() {
        let file: ConfigFile = serde_yaml::from_str(
            "anonymization:\n  enabled: false\n  delete_private_tags: false\n",
        )
        .expect("parse");
        assert!(!file.anonymize.enabled);
        assert!(!file.anonymize.delete_private_tags);
        assert!(file.qc.enabled);
    }
}
