//
// record.rs
// dicom-anon-qc
//
// A DICOM file reduced to a path plus a typed tag→value map, read once and dropped after its verdict.
//

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::OpenFileOptions;
use tracing::debug;

use crate::dicom_access::{ElementAccess, TagValue};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DicomRecord {
    path: PathBuf,
    values: BTreeMap<Tag, TagValue>,
}

impl DicomRecord {
    /// Read the dataset up to (not including) the pixel data.
    pub fn read(path: &Path) -> Result<Self> {
        let obj = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|e| Error::Read {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let values = obj.tag_values();
        if values.is_empty() {
            return Err(Error::Read {
                path: path.to_path_buf(),
                message: "file contains no parseable DICOM elements".to_string(),
            });
        }
        debug!(path = %path.display(), elements = values.len(), "read DICOM record");
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn from_values(
        path: impl Into<PathBuf>,
        values: impl IntoIterator<Item = (Tag, TagValue)>,
    ) -> Self {
        Self {
            path: path.into(),
            values: values.into_iter().collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, tag: Tag) -> Option<&TagValue> {
        self.values.get(&tag)
    }

    /// Non-empty text value of `tag`.
    pub fn text(&self, tag: Tag) -> Option<&str> {
        self.lookup(tag)
            .and_then(TagValue::as_text)
            .filter(|s| !s.is_empty())
    }

    pub fn study_uid(&self) -> Option<&str> {
        self.text(tags::STUDY_INSTANCE_UID)
    }

    pub fn series_uid(&self) -> Option<&str> {
        self.text(tags::SERIES_INSTANCE_UID)
    }
}
