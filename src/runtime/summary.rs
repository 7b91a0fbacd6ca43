use crate::intake::LoadReport;
use crate::rpc::RpcMetricsSnapshot;
use crate::transfer::AssetType;
use std::fmt;

/// Outcome of one asset pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSummary {
    pub asset: AssetType,
    /// Recipients still owed this asset when the pass started.
    pub queued: usize,
    /// Recipients skipped because the audit log already holds a SUCCESS for them.
    pub already_processed: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub batches: u64,
    /// Pending count reported by the chain when the pass started.
    pub first_sequence: Option<u64>,
    /// Next never-issued sequence number when the pass ended.
    pub next_sequence: Option<u64>,
    /// Released sequence numbers nothing was sent with.
    pub unfilled_sequences: Vec<u64>,
    pub cancelled: bool,
}

impl AssetSummary {
    pub fn new(asset: AssetType) -> Self {
        Self {
            asset,
            queued: 0,
            already_processed: 0,
            succeeded: 0,
            failed: 0,
            batches: 0,
            first_sequence: None,
            next_sequence: None,
            unfilled_sequences: Vec::new(),
            cancelled: false,
        }
    }

    pub fn resolved(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Queued recipients the pass never reached (only non-zero after cancellation).
    pub fn remaining(&self) -> usize {
        self.queued.saturating_sub(self.resolved() as usize)
    }
}

impl fmt::Display for AssetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} succeeded, {} failed in {} batches ({} already processed",
            self.asset, self.succeeded, self.failed, self.batches, self.already_processed
        )?;
        if self.cancelled {
            write!(f, ", {} not attempted", self.remaining())?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub load_report: LoadReport,
    pub assets: Vec<AssetSummary>,
    pub cancelled: bool,
    pub rpc: Option<RpcMetricsSnapshot>,
}

impl RunSummary {
    pub fn asset(&self, asset: AssetType) -> Option<&AssetSummary> {
        self.assets.iter().find(|summary| summary.asset == asset)
    }

    pub fn total_succeeded(&self) -> u64 {
        self.assets.iter().map(|summary| summary.succeeded).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.assets.iter().map(|summary| summary.failed).sum()
    }

    /// Emits the end-of-run report, one line per asset pass.
    pub fn log(&self) {
        for summary in &self.assets {
            tracing::info!(
                asset = %summary.asset,
                succeeded = summary.succeeded,
                failed = summary.failed,
                batches = summary.batches,
                already_processed = summary.already_processed,
                cancelled = summary.cancelled,
                "{summary}"
            );
            if !summary.unfilled_sequences.is_empty() {
                tracing::warn!(
                    asset = %summary.asset,
                    sequences = ?summary.unfilled_sequences,
                    "released sequence numbers were never reused; later transactions may wait behind them"
                );
            }
        }

        if let Some(rpc) = &self.rpc {
            tracing::info!(
                requests = rpc.total_requests,
                errors = rpc.total_errors,
                rejections = rpc.total_rejections,
                timeouts = rpc.total_timeouts,
                avg_latency_ms = format!("{:.1}", rpc.average_latency_ms),
                "rpc totals"
            );
        }

        tracing::info!(
            succeeded = self.total_succeeded(),
            failed = self.total_failed(),
            cancelled = self.cancelled,
            "distribution run finished"
        );
    }
}
