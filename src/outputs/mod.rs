//! Flat-file persistence around a run.
//!
//! # Submodules
//!
//! - [`tabular`]: records and run log as CSV
//! - [`json`]: per-run JSON reports
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── teasers.csv      # deduplicated records, merged and rewritten each run
//! ├── run_log.csv      # one row per target, appended
//! └── runs/
//!     └── 20250920T143000Z.json
//! ```

pub mod json;
pub mod tabular;

use crate::error::TeasyError;
use crate::runner::RunReport;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub const RECORDS_FILE: &str = "teasers.csv";
pub const RUN_LOG_FILE: &str = "run_log.csv";

pub fn records_path(output_dir: &Path) -> PathBuf {
    output_dir.join(RECORDS_FILE)
}

/// Persist everything a run produced.
///
/// The records file is read back first and this run's records are merged
/// into it (first seen wins), so earlier rows survive with or without
/// `--resume`.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display()))]
pub async fn persist(report: &RunReport, output_dir: &Path) -> Result<(), TeasyError> {
    let path = records_path(output_dir);
    let mut records = tabular::read_records(&path).await?;
    let new = records.merge(report.results.records().iter().cloned());
    info!(new, total = records.len(), "Merged run into records file");
    tabular::write_records(&path, &records).await?;
    tabular::append_run_log(&output_dir.join(RUN_LOG_FILE), &report.log).await?;
    json::write_run_report(report, output_dir).await?;
    Ok(())
}
