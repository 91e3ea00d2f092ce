//! JSON Lines Log Writer and Reader

use crate::record::PollRecord;
use crate::StorageError;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Append-only writer; every record is flushed before `append` returns.
pub struct JsonlWriter {
    path: PathBuf,
    file: File,
    /// Also `fsync` file data after each flush
    sync_data: bool,
    lines_written: u64,
}

impl JsonlWriter {
    /// Open `path` for appending, creating it and its parent directories.
    ///
    /// Existing content is never truncated.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!("Opened log file {}", path.display());
        Ok(Self {
            path,
            file,
            sync_data: false,
            lines_written: 0,
        })
    }

    pub fn with_sync_data(mut self, sync_data: bool) -> Self {
        self.sync_data = sync_data;
        self
    }

    /// Serialize `record` as a single line and write it durably
    pub async fn append(&mut self, record: &PollRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        self.file.write_all(&line).await?;
        self.file.flush().await?;
        if self.sync_data {
            self.file.sync_data().await?;
        }

        self.lines_written += 1;
        debug!("Appended {} byte record to {}", line.len(), self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines appended through this writer
    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }
}

/// Append a single record to `path` without keeping the file open
pub async fn append(path: impl AsRef<Path>, record: &PollRecord) -> Result<(), StorageError> {
    let mut writer = JsonlWriter::open(path).await?;
    writer.append(record).await
}

/// Read every record of a log file as an ordered JSON object.
///
/// A final line without a terminating newline is the remains of an
/// interrupted write and is skipped if it does not parse.
pub async fn read_records(path: impl AsRef<Path>) -> Result<Vec<Map<String, Value>>, StorageError> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    let terminated = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();
    let last = lines.len().saturating_sub(1);

    let mut records = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => records.push(record),
            Ok(other) => {
                return Err(StorageError::Corrupt {
                    line: index + 1,
                    reason: format!("expected an object, found {}", other),
                })
            }
            Err(e) if index == last && !terminated => {
                warn!("Skipping partial final line {}: {}", index + 1, e);
            }
            Err(e) => {
                return Err(StorageError::Corrupt {
                    line: index + 1,
                    reason: e.to_string(),
                })
            }
        }
    }

    Ok(records)
}
