use crate::rpc::ChainClient;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters shared by the dispatcher and the metrics reporter.
#[derive(Default, Debug)]
pub struct Telemetry {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
    in_flight: AtomicUsize,
}

impl Telemetry {
    pub fn record_dispatched(&self, count: usize) {
        self.in_flight.store(count, Ordering::Relaxed);
        self.dispatched.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, success: bool) {
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_batch_complete(&self) {
        self.in_flight.store(0, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub batches: u64,
}

impl TelemetrySnapshot {
    pub fn resolved(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Spawns a background task that periodically logs transfer throughput,
/// outcome counters, and RPC request metrics.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    client: Arc<dyn ChainClient>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "distributor::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let resolved_delta = current.resolved().saturating_sub(last_snapshot.resolved());
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        resolved_delta as f64 / elapsed
                    };
                    let rpc = client.metrics_snapshot().unwrap_or_default();

                    tracing::info!(
                        target: "distributor::metrics",
                        throughput = format!("{throughput:.2}"),
                        dispatched = current.dispatched,
                        succeeded = current.succeeded,
                        failed = current.failed,
                        batches = current.batches,
                        in_flight = telemetry.in_flight(),
                        rpc_requests = rpc.total_requests,
                        rpc_errors = rpc.total_errors,
                        rpc_timeouts = rpc.total_timeouts,
                        rpc_latency_ms = format!("{:.1}", rpc.average_latency_ms),
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
