//
// lib.rs
// dicom-anon-qc
//
// Exposes the pipeline stages for both the binary and library consumers.
//

// Leaf-first: keep list, scanning, anonymization, QC, reporting.
pub mod anonymize;
pub mod cli;
pub mod config;
pub mod dicom_access;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod qc;
pub mod record;
pub mod report;
pub mod scan;
pub mod tags;

pub use cli::{run as run_cli, Cli};
pub use error::{Error, Result};
