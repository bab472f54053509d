use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use dicom::core::value::PrimitiveValue;
use dicom::core::{DataElement, Tag, VR};
use dicom::dictionary_std::{tags, StandardDataDictionary};
use dicom::object::{open_file, DefaultDicomObject, FileDicomObject, FileMetaTableBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::dicom_access::ElementAccess;
use crate::error::{Error, Result};
use crate::tags::{is_private, resolve_keyword, TagKeepSpec};

/// What happens to an identifying element that is present in the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Keep the element but drop its value.
    Blank,
    /// Overwrite text values with the placeholder; non-text VRs are blanked.
    Replace,
    Remove,
    /// Pseudonymous `ANON_<hash>` derived from the original value.
    HashId,
    /// Deterministic `2.25.<n>` UID derived from the original UID.
    RemapUid,
}

/// Identifying attributes handled by default, roughly following the DICOM basic profile.
const DEFAULT_PROFILE: &[(&str, Action)] = &[
    ("PatientName", Action::Replace),
    ("PatientID", Action::HashId),
    ("OtherPatientIDs", Action::Remove),
    ("OtherPatientIDsSequence", Action::Remove),
    ("OtherPatientNames", Action::Remove),
    ("PatientBirthDate", Action::Blank),
    ("PatientBirthTime", Action::Remove),
    ("PatientBirthName", Action::Remove),
    ("PatientMotherBirthName", Action::Remove),
    ("PatientSex", Action::Blank),
    ("PatientAddress", Action::Remove),
    ("PatientTelephoneNumbers", Action::Remove),
    ("PatientComments", Action::Remove),
    ("MilitaryRank", Action::Remove),
    ("EthnicGroup", Action::Remove),
    ("Occupation", Action::Remove),
    ("AdditionalPatientHistory", Action::Remove),
    ("AccessionNumber", Action::Blank),
    ("StudyID", Action::Blank),
    ("ReferringPhysicianName", Action::Blank),
    ("PerformingPhysicianName", Action::Remove),
    ("NameOfPhysiciansReadingStudy", Action::Remove),
    ("RequestingPhysician", Action::Remove),
    ("OperatorsName", Action::Remove),
    ("InstitutionName", Action::Replace),
    ("InstitutionAddress", Action::Remove),
    ("InstitutionalDepartmentName", Action::Remove),
    ("StationName", Action::Remove),
    ("DeviceSerialNumber", Action::Remove),
    ("ReferencedPatientSequence", Action::Remove),
    ("RequestAttributesSequence", Action::Remove),
    ("StudyDate", Action::Blank),
    ("StudyTime", Action::Blank),
    ("SeriesDate", Action::Remove),
    ("AcquisitionDate", Action::Remove),
    ("ContentDate", Action::Remove),
    ("AcquisitionDateTime", Action::Remove),
    ("StudyInstanceUID", Action::RemapUid),
    ("SeriesInstanceUID", Action::RemapUid),
    ("SOPInstanceUID", Action::RemapUid),
    ("FrameOfReferenceUID", Action::RemapUid),
];

/// Options forwarded from the configuration to the transform.
#[derive(Debug, Clone)]
pub struct AnonymizationPolicy {
    pub delete_private_tags: bool,
    pub placeholder: String,
    pub blank_keywords: Vec<String>,
    pub replace_keywords: Vec<String>,
    pub remove_keywords: Vec<String>,
}

impl Default for AnonymizationPolicy {
    fn default() -> Self {
        Self {
            delete_private_tags: true,
            placeholder: "ANONYMIZED".to_string(),
            blank_keywords: Vec::new(),
            replace_keywords: Vec::new(),
            remove_keywords: Vec::new(),
        }
    }
}

/// Seam for the tag-stripping transform. The adapter only maps paths and isolates failures.
pub trait Anonymizer: Send + Sync {
    fn anonymize(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Default transform: a keyword profile with keep-list precedence.
#[derive(Debug, Clone)]
pub struct ProfileAnonymizer {
    keep: HashSet<Tag>,
    actions: BTreeMap<Tag, Action>,
    delete_private_tags: bool,
    placeholder: String,
}

impl ProfileAnonymizer {
    pub fn new(keep: &TagKeepSpec, policy: &AnonymizationPolicy) -> Result<Self> {
        let mut actions = BTreeMap::new();
        for (keyword, action) in DEFAULT_PROFILE {
            match resolve_keyword(keyword) {
                Some(tag) => {
                    actions.insert(tag, *action);
                }
                None => debug!(keyword, "profile keyword missing from dictionary"),
            }
        }

        let overrides = [
            (&policy.blank_keywords, Action::Blank),
            (&policy.replace_keywords, Action::Replace),
            (&policy.remove_keywords, Action::Remove),
        ];
        for (keywords, action) in overrides {
            for keyword in keywords {
                let tag = resolve_keyword(keyword).ok_or_else(|| {
                    Error::config(format!("unknown keyword '{keyword}' in anonymization policy"))
                })?;
                actions.insert(tag, action);
            }
        }

        // Private creators of kept private elements must survive private-tag deletion.
        let mut keep_tags = keep.tags();
        let creators: Vec<Tag> = keep_tags
            .iter()
            .filter(|tag| is_private(**tag) && tag.element() >= 0x1000)
            .map(|tag| Tag(tag.group(), tag.element() >> 8))
            .collect();
        keep_tags.extend(creators);

        Ok(Self {
            keep: keep_tags,
            actions,
            delete_private_tags: policy.delete_private_tags,
            placeholder: policy.placeholder.clone(),
        })
    }

    /// Apply the profile in memory; exposed separately so it can be tested without files.
    pub fn apply(&self, obj: &mut DefaultDicomObject) {
        let present: Vec<(Tag, VR)> = obj
            .iter()
            .map(|e| (e.header().tag, e.header().vr))
            .collect();

        for (tag, vr) in present {
            if self.keep.contains(&tag) {
                continue;
            }
            if self.delete_private_tags && is_private(tag) {
                obj.remove_element(tag);
                continue;
            }
            let Some(action) = self.actions.get(&tag) else {
                continue;
            };
            match action {
                Action::Remove => {
                    obj.remove_element(tag);
                }
                Action::Blank => blank(obj, tag, vr),
                Action::Replace => {
                    if accepts_placeholder(vr) {
                        obj.put(DataElement::new(
                            tag,
                            vr,
                            PrimitiveValue::from(self.placeholder.as_str()),
                        ));
                    } else {
                        blank(obj, tag, vr);
                    }
                }
                Action::HashId => {
                    let original = obj.element_str(tag).unwrap_or_default();
                    let anon_id = format!("ANON_{}", generate_hash(&original));
                    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(anon_id)));
                }
                Action::RemapUid => {
                    if let Some(original) = obj.element_str(tag).filter(|s| !s.is_empty()) {
                        obj.put(DataElement::new(
                            tag,
                            VR::UI,
                            PrimitiveValue::from(remap_uid(&original)),
                        ));
                    }
                }
            }
        }
    }
}

impl Anonymizer for ProfileAnonymizer {
    fn anonymize(&self, input: &Path, output: &Path) -> Result<()> {
        let failure = |message: String| Error::Anonymization {
            path: input.to_path_buf(),
            message,
        };

        let mut obj = open_file(input).map_err(|e| failure(e.to_string()))?;
        self.apply(&mut obj);

        // Rebuild the file meta so MediaStorageSOPInstanceUID tracks the remapped SOPInstanceUID.
        let meta = obj.meta();
        let sop_instance_uid = obj
            .element_str(tags::SOP_INSTANCE_UID)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| trim_uid(&meta.media_storage_sop_instance_uid));
        let new_meta = FileMetaTableBuilder::new()
            .transfer_syntax(meta.transfer_syntax())
            .media_storage_sop_class_uid(trim_uid(&meta.media_storage_sop_class_uid))
            .media_storage_sop_instance_uid(sop_instance_uid)
            .build()
            .map_err(|e| failure(format!("cannot rebuild file meta: {e}")))?;

        let mut file_obj =
            FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, new_meta);
        for elem in obj.iter() {
            file_obj.put(elem.clone());
        }

        file_obj
            .write_to_file(output)
            .map_err(|e| failure(format!("cannot write {}: {e}", output.display())))?;
        debug!(input = %input.display(), output = %output.display(), "anonymized");
        Ok(())
    }
}

fn blank(obj: &mut DefaultDicomObject, tag: Tag, vr: VR) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::Empty));
}

fn accepts_placeholder(vr: VR) -> bool {
    matches!(
        vr,
        VR::PN | VR::LO | VR::SH | VR::LT | VR::ST | VR::UT | VR::UC
    )
}

fn trim_uid(uid: &str) -> String {
    uid.trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn generate_hash(original: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(original.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result)[..16].to_uppercase()
}

/// Deterministic UUID-derived UID under the `2.25` root.
pub fn remap_uid(original: &str) -> String {
    let digest = Sha256::digest(original.as_bytes());
    let mut bytes = [0_u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    format!("2.25.{}", u128::from_be_bytes(bytes))
}

/// One file that could not be anonymized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizationFailure {
    pub timestamp: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub error_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnonymizationSummary {
    pub processed: usize,
    pub failures: Vec<AnonymizationFailure>,
}

impl AnonymizationSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Anonymize `files` (all under `input_root`) into the mirrored tree under `output_root`.
pub fn anonymize_tree(
    input_root: &Path,
    output_root: &Path,
    files: &[PathBuf],
    anonymizer: &dyn Anonymizer,
) -> Result<AnonymizationSummary> {
    // A nested output tree would be picked up again as input on the next run.
    if output_root.starts_with(input_root) || input_root.starts_with(output_root) {
        return Err(Error::config(format!(
            "output directory {} overlaps input directory {}",
            output_root.display(),
            input_root.display()
        )));
    }
    info!(
        input = %input_root.display(),
        output = %output_root.display(),
        files = files.len(),
        "anonymizing tree"
    );

    let results: Vec<std::result::Result<(), AnonymizationFailure>> = files
        .par_iter()
        .map(|input| {
            let output = mirror_path(input_root, output_root, input);
            anonymize_one(anonymizer, input, &output).map_err(|err| {
                error!(path = %input.display(), error = %err, "anonymization failed");
                AnonymizationFailure {
                    timestamp: Local::now().to_rfc3339(),
                    input_path: input.clone(),
                    output_path: output,
                    error_type: err.kind().to_string(),
                    message: err.to_string(),
                }
            })
        })
        .collect();

    let mut summary = AnonymizationSummary::default();
    for result in results {
        match result {
            Ok(()) => summary.processed += 1,
            Err(failure) => summary.failures.push(failure),
        }
    }
    info!(
        processed = summary.processed,
        failed = summary.failed(),
        "anonymization finished"
    );
    Ok(summary)
}

fn anonymize_one(anonymizer: &dyn Anonymizer, input: &Path, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::Anonymization {
            path: input.to_path_buf(),
            message: format!("cannot create {}: {e}", parent.display()),
        })?;
    }
    anonymizer.anonymize(input, output)
}

/// Map `input` (under `input_root`) onto the same relative location under `output_root`.
pub fn mirror_path(input_root: &Path, output_root: &Path, input: &Path) -> PathBuf {
    match input.strip_prefix(input_root) {
        Ok(relative) => output_root.join(relative),
        Err(_) => {
            warn!(path = %input.display(), "file outside input root, flattening");
            output_root.join(input.file_name().unwrap_or(input.as_os_str()))
        }
    }
}

/// Persist failure records as pretty JSON, creating parent directories.
pub fn write_failure_log(path: &Path, failures: &[AnonymizationFailure]) -> Result<()> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(failures)
        .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    fs::write(path, json).map_err(io_err)?;
    info!(path = %path.display(), count = failures.len(), "wrote anonymization errors");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_and_uids_are_deterministic() {
        assert_eq!(generate_hash("PAT123"), generate_hash("PAT123"));
        assert_eq!(generate_hash("PAT123").len(), 16);
        assert_ne!(generate_hash("PAT123"), generate_hash("PAT124"));

        let uid = remap_uid("1.2.3.4");
        assert!(uid.starts_with("2.25."));
        assert!(uid.len() <= 64);
        assert_eq!(uid, remap_uid("1.2.3.4"));
    }

    #[test]
    fn mirror_path_keeps_relative_layout() {
        let out = mirror_path(
            Path::new("/in"),
            Path::new("/out"),
            Path::new("/in/study/series/IM1.dcm"),
        );
        assert_eq!(out, PathBuf::from("/out/study/series/IM1.dcm"));
    }

    #[test]
    fn unknown_policy_keyword_is_rejected() {
        let policy = AnonymizationPolicy {
            remove_keywords: vec!["NoSuchKeyword".into()],
            ..AnonymizationPolicy::default()
        };
        let err = ProfileAnonymizer::new(&TagKeepSpec::default(), &policy).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn overlapping_input_and_output_roots_are_rejected() {
        struct Never;
        impl Anonymizer for Never {
            fn anonymize(&self, _: &Path, _: &Path) -> Result<()> {
                unreachable!()
            }
        }
        let err = anonymize_tree(Path::new("/data"), Path::new("/data"), &[], &Never).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let err =
            anonymize_tree(Path::new("/data"), Path::new("/data/anon"), &[], &Never).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(anonymize_tree(Path::new("/data/raw"), Path::new("/data/anon"), &[], &Never).is_ok());
    }
}
