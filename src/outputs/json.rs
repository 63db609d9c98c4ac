//! JSON run reports.
//!
//! Each run writes one report (state, summary, abort reason and the full run
//! log) named after its start time:
//!
//! ```text
//! output_dir/
//! └── runs/
//!     ├── 20250920T143000Z.json
//!     └── 20250921T080000Z.json
//! ```

use crate::error::TeasyError;
use crate::runner::RunReport;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Write `report` under `{output_dir}/runs/{started_at}.json`.
///
/// # Arguments
///
/// * `report` - The finished run
/// * `output_dir` - Base output directory
///
/// # Returns
///
/// The path written, or an error if directory creation or the write fails.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display()))]
pub async fn write_run_report(report: &RunReport, output_dir: &Path) -> Result<PathBuf, TeasyError> {
    let json = serde_json::to_string_pretty(report)?;

    let runs_dir = output_dir.join("runs");
    if let Err(e) = fs::create_dir_all(&runs_dir).await {
        error!(path = %runs_dir.display(), error = %e, "Failed to create runs dir");
        return Err(e.into());
    }

    let path = runs_dir.join(format!("{}.json", report.started_at.format("%Y%m%dT%H%M%SZ")));
    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote run report");
    Ok(path)
}
