use crate::transfer::{AssetType, TransferResult, TransferTask};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column names of the audit log, in file order.
pub const LOG_HEADER: [&str; 7] = [
    "Timestamp",
    "Type",
    "Address",
    "Amount",
    "Reference",
    "Status",
    "Error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "SUCCESS",
            LogStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the audit log. Field order matches [`LOG_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Type")]
    pub asset: AssetType,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "Reference")]
    pub reference: String,
    #[serde(rename = "Status")]
    pub status: LogStatus,
    #[serde(rename = "Error")]
    pub error: String,
}

impl LogRecord {
    pub fn from_outcome(
        task: &TransferTask,
        result: &TransferResult,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let status = if result.is_success() {
            LogStatus::Success
        } else {
            LogStatus::Failed
        };

        Self {
            timestamp,
            asset: task.asset,
            address: task.recipient.address_hex(),
            amount: task.recipient.amount().to_owned(),
            reference: result.reference().unwrap_or_default().to_owned(),
            status,
            error: result.reason().unwrap_or_default().to_owned(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == LogStatus::Success
    }
}

/// `(asset, address)` pair that already has a successful transfer on record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessedKey {
    pub asset: AssetType,
    /// Lowercase `0x`-prefixed address.
    pub address: String,
}

impl ProcessedKey {
    pub fn new(asset: AssetType, address: &str) -> Self {
        Self {
            asset,
            address: address.trim().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for ProcessedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asset, self.address)
    }
}
