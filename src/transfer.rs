//! Value types shared by every stage of a distribution run: what is being
//! sent, to whom, with which sequence number, and how it ended.

use alloy::primitives::Address;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of value a transfer moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetType {
    /// The chain's native currency, sent as plain value.
    Native,
    /// The configured token contract, sent through `transfer(to, amount)`.
    Token,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Native => "NATIVE",
            AssetType::Token => "TOKEN",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NATIVE" => Ok(AssetType::Native),
            "TOKEN" => Ok(AssetType::Token),
            other => bail!("unknown asset type {other:?} (expected NATIVE or TOKEN)"),
        }
    }
}

/// A validated payout row. Built only by the recipient loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    address: Address,
    amount: String,
}

impl Recipient {
    pub(crate) fn new(address: Address, amount: String) -> Self {
        Self { address, amount }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Lowercase `0x`-prefixed hex form used in logs and ledger keys.
    pub fn address_hex(&self) -> String {
        address_hex(&self.address)
    }

    /// Fixed-point decimal amount, never in exponential notation.
    pub fn amount(&self) -> &str {
        &self.amount
    }
}

/// One unit of work handed to a transfer executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub recipient: Recipient,
    pub asset: AssetType,
    pub sequence_number: u64,
}

/// Outcome of a single transfer. Executors always produce one of these and
/// never surface errors to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    Success {
        reference: String,
    },
    Failure {
        reason: String,
        /// Whether the network may hold a transaction with this sequence number.
        nonce_consumed: bool,
        reference: Option<String>,
    },
}

impl TransferResult {
    pub fn success(reference: impl Into<String>) -> Self {
        TransferResult::Success {
            reference: reference.into(),
        }
    }

    /// Failure before the network accepted anything; the sequence number is free again.
    pub fn rejected(reason: impl Into<String>) -> Self {
        TransferResult::Failure {
            reason: reason.into(),
            nonce_consumed: false,
            reference: None,
        }
    }

    /// Failure after (or possibly after) acceptance; the sequence number stays spent.
    pub fn failed_after_submission(reason: impl Into<String>, reference: Option<String>) -> Self {
        TransferResult::Failure {
            reason: reason.into(),
            nonce_consumed: true,
            reference,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransferResult::Success { .. })
    }

    pub fn nonce_consumed(&self) -> bool {
        match self {
            TransferResult::Success { .. } => true,
            TransferResult::Failure { nonce_consumed, .. } => *nonce_consumed,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            TransferResult::Success { reference } => Some(reference.as_str()),
            TransferResult::Failure { reference, .. } => reference.as_deref(),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            TransferResult::Success { .. } => None,
            TransferResult::Failure { reason, .. } => Some(reason.as_str()),
        }
    }
}

pub(crate) fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}
