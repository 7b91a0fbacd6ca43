use crate::journal::record::{LogRecord, ProcessedKey, LOG_HEADER};
use crate::transfer::{AssetType, Recipient};
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashSet;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Pairs that already have a SUCCESS record in a prior run's audit log.
///
/// A SUCCESS record is sticky: later FAILED rows for the same pair do not
/// make it eligible again, whatever order the rows appear in.
#[derive(Debug, Default, Clone)]
pub struct ProcessedLedger {
    processed: HashSet<ProcessedKey>,
    records: usize,
    skipped: usize,
}

impl ProcessedLedger {
    /// Reads the log at `path`. A missing file means no prior progress.
    pub fn load(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no audit log found; starting fresh");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to open audit log {}", path.display()))
            }
        };

        let ledger = Self::from_reader(file)
            .with_context(|| format!("failed to read audit log {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            records = ledger.records,
            processed = ledger.len(),
            skipped = ledger.skipped,
            "audit log replayed"
        );
        Ok(ledger)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut ledger = Self::default();
        let mut raw = StringRecord::new();
        let mut line = 0usize;

        loop {
            line += 1;
            match csv.read_record(&mut raw) {
                Ok(false) => break,
                Ok(true) => {}
                Err(err) if err.is_io_error() => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(line, error = %err, "skipping unreadable audit log line");
                    ledger.skipped += 1;
                    continue;
                }
            }

            if is_header(&raw) {
                continue;
            }

            match raw.deserialize::<LogRecord>(None) {
                Ok(record) => ledger.observe(&record),
                Err(err) => {
                    tracing::warn!(line, error = %err, "skipping malformed audit log line");
                    ledger.skipped += 1;
                }
            }
        }

        Ok(ledger)
    }

    /// Folds one record into the processed set.
    pub fn observe(&mut self, record: &LogRecord) {
        self.records += 1;
        if record.is_success() {
            self.processed
                .insert(ProcessedKey::new(record.asset, &record.address));
        }
    }

    pub fn contains(&self, asset: AssetType, address_hex: &str) -> bool {
        self.processed
            .contains(&ProcessedKey::new(asset, address_hex))
    }

    /// Recipients still owed a transfer of `asset`, in their original order.
    pub fn pending(&self, asset: AssetType, recipients: &[Recipient]) -> Vec<Recipient> {
        recipients
            .iter()
            .filter(|recipient| !self.contains(asset, &recipient.address_hex()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    /// Well-formed records read, whatever their status.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Lines that could not be parsed and were ignored.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

fn is_header(record: &StringRecord) -> bool {
    record.get(0) == Some(LOG_HEADER[0])
}
