//
// main.rs
// dicom-anon-qc
//
// Entry point that hands off execution to the CLI layer; the exit code reflects file-level failures.
//

use std::process::ExitCode;

use dicom_anon_qc::cli;

fn main() -> anyhow::Result<ExitCode> {
    cli::run()
}
