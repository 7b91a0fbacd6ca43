use crate::intake::amount::{parse_amount, render_fixed_point};
use crate::runtime::config::DistributorConfig;
use crate::transfer::Recipient;
use alloy::primitives::Address;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Per-class counts of what happened to every row of a recipient file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub accepted: usize,
    pub header_rows: usize,
    pub malformed: usize,
    pub invalid_address: usize,
    pub blacklisted: usize,
    pub invalid_amount: usize,
    pub below_minimum: usize,
    pub duplicates: usize,
}

impl LoadReport {
    pub fn rejected(&self) -> usize {
        self.malformed
            + self.invalid_address
            + self.blacklisted
            + self.invalid_amount
            + self.below_minimum
            + self.duplicates
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted={} malformed={} invalid_address={} blacklisted={} invalid_amount={} below_minimum={} duplicates={}",
            self.accepted,
            self.malformed,
            self.invalid_address,
            self.blacklisted,
            self.invalid_amount,
            self.below_minimum,
            self.duplicates
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientList {
    pub recipients: Vec<Recipient>,
    pub report: LoadReport,
}

enum RowOutcome {
    Accepted(Recipient),
    Header,
    Blank,
    Malformed,
    InvalidAddress,
    Blacklisted,
    InvalidAmount,
    BelowMinimum,
}

/// Reads `address,amount` rows and keeps only the ones eligible for payment.
#[derive(Debug, Clone)]
pub struct RecipientLoader {
    min_amount: Decimal,
    blacklist: HashSet<Address>,
}

impl RecipientLoader {
    pub fn new(min_amount: Decimal, blacklist: HashSet<Address>) -> Self {
        Self {
            min_amount,
            blacklist,
        }
    }

    pub fn from_config(config: &DistributorConfig) -> Self {
        Self::new(config.min_amount(), config.blacklist().clone())
    }

    /// Loads the recipient file. An unreadable file is an error, not an empty run.
    pub fn load_path(&self, path: &Path) -> Result<RecipientList> {
        let file = File::open(path)
            .with_context(|| format!("failed to open recipient file {}", path.display()))?;
        let list = self
            .load_reader(file)
            .with_context(|| format!("failed to read recipient file {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            accepted = list.report.accepted,
            rejected = list.report.rejected(),
            report = %list.report,
            "recipient file loaded"
        );
        Ok(list)
    }

    pub fn load_reader<R: Read>(&self, reader: R) -> Result<RecipientList> {
        let mut csv = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut report = LoadReport::default();
        let mut recipients = Vec::new();
        let mut seen = HashSet::new();

        for (index, row) in csv.records().enumerate() {
            let line = index + 1;
            let record = match row {
                Ok(record) => record,
                Err(err) if err.is_io_error() => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(line, error = %err, "skipping unparseable recipient row");
                    report.malformed += 1;
                    continue;
                }
            };

            match self.classify(&record) {
                RowOutcome::Accepted(recipient) => {
                    if seen.insert(recipient.address()) {
                        report.accepted += 1;
                        recipients.push(recipient);
                    } else {
                        tracing::warn!(
                            line,
                            address = %recipient.address_hex(),
                            "skipping duplicate recipient; first occurrence wins"
                        );
                        report.duplicates += 1;
                    }
                }
                RowOutcome::Header => report.header_rows += 1,
                RowOutcome::Blank => {}
                RowOutcome::Malformed => {
                    tracing::warn!(line, fields = record.len(), "skipping malformed recipient row");
                    report.malformed += 1;
                }
                RowOutcome::InvalidAddress => {
                    tracing::warn!(line, address = record.get(0), "skipping invalid address");
                    report.invalid_address += 1;
                }
                RowOutcome::Blacklisted => {
                    tracing::info!(line, address = record.get(0), "skipping blacklisted address");
                    report.blacklisted += 1;
                }
                RowOutcome::InvalidAmount => {
                    tracing::warn!(line, amount = record.get(1), "skipping invalid amount");
                    report.invalid_amount += 1;
                }
                RowOutcome::BelowMinimum => {
                    tracing::debug!(
                        line,
                        amount = record.get(1),
                        min_amount = %self.min_amount,
                        "skipping amount at or below the minimum"
                    );
                    report.below_minimum += 1;
                }
            }
        }

        Ok(RecipientList { recipients, report })
    }

    fn classify(&self, record: &StringRecord) -> RowOutcome {
        let first = record.get(0).unwrap_or_default();

        if record.len() < 2 {
            return if first.is_empty() {
                RowOutcome::Blank
            } else {
                RowOutcome::Malformed
            };
        }

        if first.to_ascii_lowercase().contains("address") {
            return RowOutcome::Header;
        }

        let normalized = first.to_ascii_lowercase();
        if !is_address_shape(&normalized) {
            return RowOutcome::InvalidAddress;
        }
        let Ok(address) = Address::from_str(&normalized) else {
            return RowOutcome::InvalidAddress;
        };

        if self.blacklist.contains(&address) {
            return RowOutcome::Blacklisted;
        }

        let amount = match parse_amount(record.get(1).unwrap_or_default()) {
            Ok(amount) => amount,
            Err(_) => return RowOutcome::InvalidAmount,
        };

        if amount <= self.min_amount {
            return RowOutcome::BelowMinimum;
        }

        RowOutcome::Accepted(Recipient::new(address, render_fixed_point(amount)))
    }
}

fn is_address_shape(candidate: &str) -> bool {
    candidate.len() == 42
        && candidate.starts_with("0x")
        && candidate[2..].bytes().all(|byte| byte.is_ascii_hexdigit())
}
