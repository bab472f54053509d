//
// tags.rs
// dicom-anon-qc
//
// Keep-list loading: resolves keywords and (gggg,eeee) strings against the standard dictionary
// into the immutable set of tags that must survive anonymization.
//

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use dicom::core::dictionary::DataDictionary;
use dicom::core::Tag;
use dicom::dictionary_std::StandardDataDictionary;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// One entry of the keep list: a tag that has to be retained after anonymization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpec {
    pub keyword: String,
    pub tag: Tag,
    pub required: bool,
}

impl TagSpec {
    pub fn is_private(&self) -> bool {
        is_private(self.tag)
    }
}

/// Ordered, de-duplicated keep list.
#[derive(Debug, Clone, Default)]
pub struct TagKeepSpec {
    specs: Vec<TagSpec>,
    unresolved: Vec<String>,
}

#[derive(Deserialize)]
struct KeepListFile {
    #[serde(default)]
    keywords: Option<Vec<KeepEntry>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeepEntry {
    Keyword(String),
    Detailed {
        #[serde(default)]
        keyword: Option<String>,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default = "default_required")]
        required: bool,
    },
}

fn default_required() -> bool {
    true
}

impl TagKeepSpec {
    /// Load a keep list from a JSON (or YAML, by extension) document with a `keywords` array.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "cannot read keep-keywords file {}: {e}",
                path.display()
            ))
        })?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| {
                ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
            });
        let spec = if is_yaml {
            Self::from_yaml_str(&text)
        } else {
            Self::from_json_str(&text)
        };
        spec.map_err(|e| match e {
            Error::Config(msg) => Error::config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: KeepListFile = serde_json::from_str(text)
            .map_err(|e| Error::config(format!("malformed keep list: {e}")))?;
        Self::from_file_model(file)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: KeepListFile = serde_yaml::from_str(text)
            .map_err(|e| Error::config(format!("malformed keep list: {e}")))?;
        Self::from_file_model(file)
    }

    fn from_file_model(file: KeepListFile) -> Result<Self> {
        let entries = file
            .keywords
            .ok_or_else(|| Error::config("keep list has no 'keywords' array"))?;
        if entries.is_empty() {
            return Err(Error::config("keep list is empty"));
        }

        let mut spec = TagKeepSpec::default();
        for entry in entries {
            match entry {
                KeepEntry::Keyword(keyword) => spec.add_keyword(&keyword, true),
                KeepEntry::Detailed {
                    keyword: Some(keyword),
                    tag: None,
                    required,
                } => spec.add_keyword(&keyword, required),
                KeepEntry::Detailed {
                    keyword,
                    tag: Some(tag),
                    required,
                } => {
                    let parsed = parse_tag(&tag).ok_or_else(|| {
                        Error::config(format!("invalid tag '{tag}' in keep list"))
                    })?;
                    let keyword = keyword
                        .or_else(|| keyword_for_tag(parsed))
                        .unwrap_or_else(|| format_tag(parsed));
                    spec.insert(TagSpec {
                        keyword,
                        tag: parsed,
                        required,
                    });
                }
                KeepEntry::Detailed {
                    keyword: None,
                    tag: None,
                    ..
                } => {
                    return Err(Error::config(
                        "keep list entry needs either 'keyword' or 'tag'",
                    ))
                }
            }
        }
        Ok(spec)
    }

    /// Resolve `keyword` through the dictionary and add it; unknown keywords are remembered, not fatal.
    pub fn add_keyword(&mut self, keyword: &str, required: bool) {
        let keyword = keyword.trim();
        match resolve_keyword(keyword) {
            Some(tag) => self.insert(TagSpec {
                keyword: keyword.to_string(),
                tag,
                required,
            }),
            None => {
                warn!(keyword, "unknown DICOM keyword in keep list");
                if !self.unresolved.iter().any(|k| k == keyword) {
                    self.unresolved.push(keyword.to_string());
                }
            }
        }
    }

    fn insert(&mut self, spec: TagSpec) {
        if let Some(existing) = self.specs.iter_mut().find(|s| s.tag == spec.tag) {
            existing.required |= spec.required;
            debug!(keyword = %spec.keyword, "duplicate keep entry collapsed");
            return;
        }
        self.specs.push(spec);
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagSpec> {
        self.specs.iter()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.specs.iter().any(|s| s.tag == tag)
    }

    pub fn tags(&self) -> HashSet<Tag> {
        self.specs.iter().map(|s| s.tag).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Keywords that did not resolve against the standard dictionary.
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }
}

impl FromIterator<TagSpec> for TagKeepSpec {
    fn from_iter<I: IntoIterator<Item = TagSpec>>(iter: I) -> Self {
        let mut spec = TagKeepSpec::default();
        for item in iter {
            spec.insert(item);
        }
        spec
    }
}

pub fn resolve_keyword(keyword: &str) -> Option<Tag> {
    StandardDataDictionary
        .by_name(keyword)
        .map(|entry| entry.tag.inner())
}

pub fn keyword_for_tag(tag: Tag) -> Option<String> {
    StandardDataDictionary
        .by_tag(tag)
        .map(|entry| entry.alias.to_string())
}

/// Accepts `(gggg,eeee)`, `gggg,eeee` or `ggggeeee` in hexadecimal.
pub fn parse_tag(text: &str) -> Option<Tag> {
    let cleaned: String = text
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.len() != 8 {
        return None;
    }
    let group = u16::from_str_radix(&cleaned[..4], 16).ok()?;
    let element = u16::from_str_radix(&cleaned[4..], 16).ok()?;
    Some(Tag(group, element))
}

pub fn format_tag(tag: Tag) -> String {
    format!("({:04X},{:04X})", tag.group(), tag.element())
}

pub fn is_private(tag: Tag) -> bool {
    tag.group() % 2 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_resolve_through_dictionary() {
        assert_eq!(resolve_keyword("PatientID"), Some(Tag(0x0010, 0x0020)));
        assert_eq!(resolve_keyword("Modality"), Some(Tag(0x0008, 0x0060)));
        assert_eq!(resolve_keyword("NotARealKeyword"), None);
        assert_eq!(keyword_for_tag(Tag(0x0018, 0x0087)).as_deref(), Some("MagneticFieldStrength"));
    }

    #[test]
    fn tag_strings_parse_in_all_forms() {
        assert_eq!(parse_tag("(0018,0080)"), Some(Tag(0x0018, 0x0080)));
        assert_eq!(parse_tag("0018,0080"), Some(Tag(0x0018, 0x0080)));
        assert_eq!(parse_tag("00180080"), Some(Tag(0x0018, 0x0080)));
        assert_eq!(parse_tag("0018"), None);
        assert_eq!(parse_tag("zz18,0080"), None);
        assert_eq!(format_tag(Tag(0x0029, 0x1010)), "(0029,1010)");
    }

    #[test]
    fn keep_list_loads_mixed_entries() {
        let spec = TagKeepSpec::from_json_str(
            r#"{"keywords": [
                "RepetitionTime",
                {"keyword": "EchoTime", "required": false},
                {"tag": "(0029,1010)", "keyword": "SiemensCsaHeader", "required": false},
                "Bogus"
            ]}"#,
        )
        .expect("keep list");

        assert_eq!(spec.len(), 3);
        let items: Vec<_> = spec.iter().collect();
        assert_eq!(items[0].keyword, "RepetitionTime");
        assert!(items[0].required);
        assert!(!items[1].required);
        assert!(items[2].is_private());
        assert_eq!(spec.unresolved(), &["Bogus".to_string()]);
    }

    #[test]
    fn duplicates_collapse_and_required_wins() {
        let spec = TagKeepSpec::from_json_str(
            r#"{"keywords": [{"keyword": "Modality", "required": false}, "Modality"]}"#,
        )
        .expect("keep list");
        assert_eq!(spec.len(), 1);
        assert!(spec.iter().next().unwrap().required);
    }

    #[test]
    fn malformed_or_empty_lists_are_config_errors() {
        for text in ["{", r#"{"keywords": []}"#, r#"{"other": 1}"#, r#"{"keywords": "Modality"}"#] {
            let err = TagKeepSpec::from_json_str(text).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{text}");
        }
    }

    #[test]
    fn yaml_keep_list_is_accepted() {
        let spec = TagKeepSpec::from_yaml_str("keywords:\n  - Modality\n  - SliceThickness\n")
            .expect("yaml keep list");
        assert!(spec.contains(Tag(0x0018, 0x0050)));
    }
}
