use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{anyhow, Context, Result};
use distributor::{
    AssetType, ChainClient, DistributorConfig, DistributorConfigBuilder, LogRecord, ReceiptStatus,
    RpcError,
};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use tempfile::TempDir;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

pub const FUNDING_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const CHAIN_ID: u64 = 137;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn funding_signer() -> PrivateKeySigner {
    PrivateKeySigner::from_str(FUNDING_KEY).expect("test key must parse")
}

/// Deterministic recipient address `0xNN…NN`.
pub fn address(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn address_hex(byte: u8) -> String {
    format!("0x{}", hex::encode(address(byte).as_slice()))
}

/// The fields of a signed transaction a test needs to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub nonce: u64,
    pub to: Option<Address>,
    pub hash: B256,
}

pub fn decode_submission(raw: &[u8]) -> Result<Submitted> {
    let mut buf = raw;
    let envelope = TxEnvelope::decode_2718(&mut buf)
        .map_err(|err| anyhow!("undecodable transaction: {err}"))?;
    Ok(Submitted {
        nonce: envelope.nonce(),
        to: envelope.to(),
        hash: *envelope.tx_hash(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendEvent {
    Started(u64),
    Finished(u64),
}

/// In-memory node. Accepts every transaction unless a rejection was scripted
/// for its sequence number, and mines everything it accepted. With
/// [`MemoryChain::mining_in_order`] a transaction is only mined once every
/// lower sequence number has been accepted too.
pub struct MemoryChain {
    pending: Mutex<u64>,
    in_order_from: Option<u64>,
    rejections: Mutex<HashMap<u64, String>>,
    submitted: Mutex<Vec<Submitted>>,
    events: Mutex<Vec<SendEvent>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    send_delay: Duration,
}

impl MemoryChain {
    pub fn new(pending: u64) -> Self {
        Self {
            pending: Mutex::new(pending),
            in_order_from: None,
            rejections: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            send_delay: Duration::ZERO,
        }
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn mining_in_order(mut self) -> Self {
        self.in_order_from = Some(*self.pending.lock().expect("pending poisoned"));
        self
    }

    /// Rejects the next submission carrying `nonce` with `message`.
    pub fn reject_once(&self, nonce: u64, message: impl Into<String>) {
        self.rejections
            .lock()
            .expect("rejections poisoned")
            .insert(nonce, message.into());
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.submitted.lock().expect("submitted poisoned").clone()
    }

    pub fn submitted_nonces(&self) -> Vec<u64> {
        self.submitted().iter().map(|tx| tx.nonce).collect()
    }

    pub fn events(&self) -> Vec<SendEvent> {
        self.events.lock().expect("events poisoned").clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn accept(&self, raw: &[u8]) -> Result<B256> {
        let tx = decode_submission(raw)?;
        self.events
            .lock()
            .expect("events poisoned")
            .push(SendEvent::Started(tx.nonce));
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.send_delay.is_zero() {
            sleep(self.send_delay).await;
        }

        let rejection = self
            .rejections
            .lock()
            .expect("rejections poisoned")
            .remove(&tx.nonce);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.events
            .lock()
            .expect("events poisoned")
            .push(SendEvent::Finished(tx.nonce));

        if let Some(message) = rejection {
            return Err(RpcError::Rejected {
                method: "eth_sendRawTransaction",
                code: -32000,
                message,
            }
            .into());
        }

        {
            let mut pending = self.pending.lock().expect("pending poisoned");
            *pending = (*pending).max(tx.nonce + 1);
        }
        let hash = tx.hash;
        self.submitted.lock().expect("submitted poisoned").push(tx);
        Ok(hash)
    }
}

impl ChainClient for MemoryChain {
    fn chain_id(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async { Ok(CHAIN_ID) })
    }

    fn pending_nonce(&self, _address: Address) -> BoxFuture<'_, Result<u64>> {
        let pending = *self.pending.lock().expect("pending poisoned");
        Box::pin(async move { Ok(pending) })
    }

    fn send_raw_transaction<'a>(&'a self, raw: &'a [u8]) -> BoxFuture<'a, Result<B256>> {
        Box::pin(self.accept(raw))
    }

    fn transaction_receipt(&self, hash: B256) -> BoxFuture<'_, Result<Option<ReceiptStatus>>> {
        let submitted = self.submitted.lock().expect("submitted poisoned");
        let mined = submitted
            .iter()
            .find(|tx| tx.hash == hash)
            .is_some_and(|tx| match self.in_order_from {
                Some(floor) => {
                    let held: HashSet<u64> = submitted.iter().map(|tx| tx.nonce).collect();
                    (floor..tx.nonce).all(|nonce| held.contains(&nonce))
                }
                None => true,
            });
        drop(submitted);
        Box::pin(async move { Ok(mined.then_some(ReceiptStatus::Success)) })
    }
}

/// Temporary directory holding one run's recipient file and audit log.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new().context("failed to create temp dir")?,
        })
    }

    pub fn recipients_path(&self) -> PathBuf {
        self.dir.path().join("recipients.csv")
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("distribution_log.csv")
    }

    pub fn write_recipients(&self, contents: &str) -> Result<()> {
        fs::write(self.recipients_path(), contents).context("failed to write recipient file")
    }

    pub fn write_log(&self, contents: &str) -> Result<()> {
        fs::write(self.log_path(), contents).context("failed to write audit log")
    }

    pub fn read_log(&self) -> Result<Vec<LogRecord>> {
        let mut reader = csv::Reader::from_path(self.log_path()).context("failed to open log")?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row.context("failed to decode log row")?);
        }
        Ok(rows)
    }

    /// Base configuration for runs against an injected chain client.
    pub fn config(&self) -> DistributorConfigBuilder {
        DistributorConfig::builder()
            .rpc_url("http://127.0.0.1:8545")
            .chain_id(CHAIN_ID)
            .recipients_path(self.recipients_path())
            .log_path(self.log_path())
            .assets([AssetType::Native])
            .concurrency_limit(2)
            .batch_delay(Duration::from_millis(5))
            .await_confirmation(false)
            .skip_countdown(true)
    }
}

/// Groups log rows by status for one asset.
pub fn successful_addresses(rows: &[LogRecord], asset: AssetType) -> HashSet<String> {
    rows.iter()
        .filter(|row| row.asset == asset && row.is_success())
        .map(|row| row.address.clone())
        .collect()
}

/// Asserts that no send of batch `k + 1` started before every send of batch
/// `k` finished.
pub fn assert_batches_do_not_overlap(events: &[SendEvent], base: u64, limit: u64) {
    let batch_of = |nonce: u64| (nonce - base) / limit;
    let mut open: Vec<u64> = Vec::new();
    let mut current_batch = None;

    for event in events {
        match *event {
            SendEvent::Started(nonce) => {
                let batch = batch_of(nonce);
                if current_batch != Some(batch) {
                    assert!(
                        open.is_empty(),
                        "batch {batch} started while {open:?} were still in flight"
                    );
                    current_batch = Some(batch);
                }
                open.push(nonce);
            }
            SendEvent::Finished(nonce) => open.retain(|&existing| existing != nonce),
        }
    }
}
