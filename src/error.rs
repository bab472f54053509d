//
// error.rs
// dicom-anon-qc
//
// Error taxonomy shared by the scanner, anonymizer, QC checker and report writer.
//

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing configuration; aborts before any file is touched.
    #[error("configuration error: {0}")]
    Config(String),

    /// A directory the run depends on is missing or cannot be walked.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Per-file anonymization failure. Recorded, never fatal to the run.
    #[error("failed to anonymize {}: {message}", path.display())]
    Anonymization { path: PathBuf, message: String },

    /// Per-file parse failure. Becomes an `error` verdict in the report.
    #[error("failed to read DICOM file {}: {message}", path.display())]
    Read { path: PathBuf, message: String },

    /// Report persistence failure.
    #[error("I/O error writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Short kind label used in logs and failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "ConfigError",
            Error::Filesystem { .. } => "FilesystemError",
            Error::Anonymization { .. } => "AnonymizationError",
            Error::Read { .. } => "ReadError",
            Error::Io { .. } => "IOError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_match_taxonomy() {
        let err = Error::Read {
            path: PathBuf::from("a.dcm"),
            message: "bad preamble".into(),
        };
        assert_eq!(err.kind(), "ReadError");
        assert!(err.to_string().contains("a.dcm"));
        assert_eq!(Error::config("x").kind(), "ConfigError");
    }
}
