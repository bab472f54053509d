//
// scan.rs
// dicom-anon-qc
//
// Directory enumeration of DICOM files plus the separate, logged extension-normalization step.
//

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";

/// How files without a recognized extension are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detection {
    /// Only files whose extension is listed count as DICOM.
    #[default]
    Extension,
    /// Also accept files carrying the `DICM` magic after the 128-byte preamble.
    Sniff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub detection: Detection,
    extensions: Vec<String>,
}

impl ScanOptions {
    pub fn new<S: AsRef<str>>(detection: Detection, extensions: &[S]) -> Self {
        let extensions = extensions
            .iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self {
            detection,
            extensions,
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn has_valid_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|valid| *valid == ext)
            })
    }

    pub fn is_dicom(&self, path: &Path) -> bool {
        if self.has_valid_extension(path) {
            return true;
        }
        self.detection == Detection::Sniff && sniff_dicom(path)
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::new(Detection::Extension, &[".dcm", ".dicom"])
    }
}

/// Lazy, restartable enumeration of DICOM files under a root directory.
#[derive(Debug, Clone)]
pub struct DicomScan {
    root: PathBuf,
    options: ScanOptions,
}

/// Fails with a filesystem error when `root` is not an existing directory.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<DicomScan> {
    ensure_dir(root)?;
    Ok(DicomScan {
        root: root.to_path_buf(),
        options: options.clone(),
    })
}

impl DicomScan {
    /// Walk the tree again from the start, in file-name order.
    pub fn iter(&self) -> impl Iterator<Item = PathBuf> + '_ {
        walk_files(&self.root).filter(move |path| self.options.is_dicom(path))
    }
}

/// A single rename performed by [`normalize_extensions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Renamed {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Append `.dcm` to files that lack a recognized extension but carry DICOM content.
pub fn normalize_extensions(root: &Path, options: &ScanOptions) -> Result<Vec<Renamed>> {
    ensure_dir(root)?;

    let candidates: Vec<PathBuf> = walk_files(root)
        .filter(|path| !options.has_valid_extension(path))
        .filter(|path| sniff_dicom(path))
        .collect();

    let mut renamed = Vec::with_capacity(candidates.len());
    for from in candidates {
        let Some(name) = from.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %from.display(), "skipping file with non UTF-8 name");
            continue;
        };
        let to = from.with_file_name(format!("{name}.dcm"));
        if to.exists() {
            warn!(from = %from.display(), to = %to.display(), "skipping rename, target exists");
            continue;
        }
        match fs::rename(&from, &to) {
            Ok(()) => {
                info!(from = %from.display(), to = %to.display(), "renamed DICOM file");
                renamed.push(Renamed { from, to });
            }
            Err(err) => {
                warn!(path = %from.display(), error = %err, "rename failed");
            }
        }
    }
    Ok(renamed)
}

/// True when the file has the `DICM` magic right after the preamble.
pub fn sniff_dicom(path: &Path) -> bool {
    let mut header = [0_u8; PREAMBLE_LEN + 4];
    let read = File::open(path).and_then(|mut file| file.read_exact(&mut header));
    match read {
        Ok(()) => &header[PREAMBLE_LEN..] == MAGIC,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "sniff failed");
            false
        }
    }
}

fn walk_files(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

fn ensure_dir(root: &Path) -> Result<()> {
    if root.is_dir() {
        return Ok(());
    }
    Err(Error::Filesystem {
        path: root.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotFound, "directory does not exist"),
    })
}
