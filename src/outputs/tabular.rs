//! CSV persistence for records and the run log.
//!
//! `teasers.csv` holds the whole deduplicated record set and is rewritten
//! after each run (via a temporary file and rename). `run_log.csv` only ever
//! grows: each run appends its entries, writing the header when the file is
//! new.

use crate::dedup::ResultSet;
use crate::error::TeasyError;
use crate::models::{RunLogEntry, TeaserRecord};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

/// Load prior records. A missing file is an empty set.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_records(path: &Path) -> Result<ResultSet, TeasyError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No previous records; starting empty");
            return Ok(ResultSet::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Fields)
        .from_reader(bytes.as_slice());
    let mut records = Vec::new();
    for row in reader.deserialize::<TeaserRecord>() {
        records.push(row?);
    }
    let set = ResultSet::from_records(records);
    info!(count = set.len(), "Loaded previous records");
    Ok(set)
}

/// Rewrite the records file with `set`, in insertion order.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_records(path: &Path, set: &ResultSet) -> Result<(), TeasyError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in set.records() {
        writer.serialize(record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| TeasyError::Io(e.into_error()))?;

    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, &bytes).await?;
    fs::rename(&tmp, path).await?;
    info!(count = set.len(), "Wrote records");
    Ok(())
}

/// Append `entries` to the run log, writing the header only for a new or empty file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn append_run_log(path: &Path, entries: &[RunLogEntry]) -> Result<(), TeasyError> {
    let has_header = match fs::metadata(path).await {
        Ok(meta) => meta.len() > 0,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(!has_header)
        .from_writer(Vec::new());
    for entry in entries {
        writer.serialize(entry)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| TeasyError::Io(e.into_error()))?;

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&bytes).await?;
    file.flush().await?;
    info!(count = entries.len(), "Appended run log");
    Ok(())
}
