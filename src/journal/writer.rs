use crate::journal::record::{LogRecord, LOG_HEADER};
use crate::transfer::{TransferResult, TransferTask};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Destination for resolved transfers. The dispatcher calls [`TransferSink::record`]
/// exactly once per task, and an error aborts the run.
pub trait TransferSink: Send {
    fn record(&mut self, task: &TransferTask, result: &TransferResult) -> Result<()>;
}

/// Append-only CSV audit log. Every record is written with a single write
/// and synced to disk before [`AuditLogger::append`] returns.
#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    file: File,
    appended: u64,
}

impl AuditLogger {
    /// Opens (or creates) the log. A new file receives the header row; an
    /// existing file whose last record was torn is terminated with a newline
    /// so the next record starts on its own line.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;

        let len = file
            .metadata()
            .with_context(|| format!("failed to stat audit log {}", path.display()))?
            .len();

        if len == 0 {
            file.write_all(&encode_header()?).with_context(|| {
                format!("failed to write header to audit log {}", path.display())
            })?;
            tracing::info!(path = %path.display(), "created audit log");
        } else if !ends_with_newline(&mut file)? {
            tracing::warn!(
                path = %path.display(),
                "audit log ends with a partial record; terminating it before appending"
            );
            file.write_all(b"\n").with_context(|| {
                format!("failed to terminate torn line in audit log {}", path.display())
            })?;
        }
        file.sync_data()
            .with_context(|| format!("failed to sync audit log {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            appended: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let line = encode_row(record)?;
        self.file
            .write_all(&line)
            .and_then(|_| self.file.sync_data())
            .with_context(|| format!("failed to append to audit log {}", self.path.display()))?;
        self.appended += 1;
        Ok(())
    }
}

impl TransferSink for AuditLogger {
    fn record(&mut self, task: &TransferTask, result: &TransferResult) -> Result<()> {
        self.append(&LogRecord::from_outcome(task, result, Utc::now()))
    }
}

fn ends_with_newline(file: &mut File) -> Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn encode_header() -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(LOG_HEADER)?;
    writer
        .into_inner()
        .map_err(|err| anyhow!("failed to encode log header: {}", err.error()))
}

fn encode_row<S: Serialize>(row: S) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.serialize(row)?;
    writer
        .into_inner()
        .map_err(|err| anyhow!("failed to encode log record: {}", err.error()))
}
