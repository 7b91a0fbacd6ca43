//! Batch dispatch loop for one asset pass.
//!
//! The dispatcher is the only owner of the [`SequenceCoordinator`]. Each batch
//! moves through `Dispatching → Submitting → Refilling → Awaiting → Recording
//! → Advancing`: sequence numbers are assigned before any future is polled,
//! every submission is joined before any receipt is awaited, and every result
//! is recorded before the next window is formed.
//!
//! Under [`ReservationPolicy::ReserveOnAcceptance`] a number the node refused
//! strands every accepted higher number of the window, because nodes mine a
//! sender's transactions in order. `Refilling` hands such numbers to the next
//! queued recipients, or to no-op self transfers once the queue is empty,
//! before any receipt is awaited.

use crate::journal::TransferSink;
use crate::processor::executor::{Submission, TransferExecutor};
use crate::processor::sequence::{ReservationPolicy, SequenceCoordinator};
use crate::runtime::error::{RunError, RunStage};
use crate::runtime::summary::AssetSummary;
use crate::runtime::telemetry::Telemetry;
use crate::transfer::{Recipient, TransferResult, TransferTask};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Dispatching,
    Submitting,
    Refilling,
    Awaiting,
    Recording,
    Advancing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchParams {
    /// Window size and the cap on transfers in flight.
    pub concurrency_limit: usize,
    pub batch_delay: Duration,
}

pub struct BatchDispatcher<'a> {
    executor: &'a dyn TransferExecutor,
    sink: &'a mut dyn TransferSink,
    sequence: SequenceCoordinator,
    params: DispatchParams,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    state: DispatchState,
}

impl<'a> BatchDispatcher<'a> {
    pub fn new(
        executor: &'a dyn TransferExecutor,
        sink: &'a mut dyn TransferSink,
        sequence: SequenceCoordinator,
        params: DispatchParams,
        telemetry: Arc<Telemetry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            executor,
            sink,
            sequence,
            params: DispatchParams {
                concurrency_limit: params.concurrency_limit.max(1),
                batch_delay: params.batch_delay,
            },
            telemetry,
            shutdown,
            state: DispatchState::Idle,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Sends every recipient in order. Returns early, with `cancelled` set,
    /// when the shutdown token fires; a batch already in flight always
    /// finishes and is recorded first.
    pub async fn run(mut self, recipients: Vec<Recipient>) -> Result<AssetSummary, RunError> {
        let asset = self.executor.asset();
        let mut summary = AssetSummary::new(asset);
        summary.queued = recipients.len();
        summary.first_sequence = Some(self.sequence.base());

        let mut queue: VecDeque<Recipient> = recipients.into();

        while !queue.is_empty() {
            if self.shutdown.is_cancelled() {
                tracing::warn!(
                    asset = %asset,
                    remaining = queue.len(),
                    "shutdown requested; stopping at batch boundary"
                );
                summary.cancelled = true;
                break;
            }

            self.transition(DispatchState::Dispatching);
            let window = queue.len().min(self.params.concurrency_limit);
            let numbers = self.sequence.assign(window);
            let mut tasks: Vec<TransferTask> = queue
                .drain(..window)
                .zip(numbers)
                .map(|(recipient, sequence_number)| TransferTask {
                    recipient,
                    asset,
                    sequence_number,
                })
                .collect();
            self.telemetry.record_dispatched(tasks.len());

            self.transition(DispatchState::Submitting);
            let executor = self.executor;
            let mut submissions =
                join_all(tasks.iter().map(|task| submit_guarded(executor, task))).await;

            let mut fillers = Vec::new();
            if self.sequence.policy() == ReservationPolicy::ReserveOnAcceptance {
                self.transition(DispatchState::Refilling);
                fillers = self
                    .refill_gaps(&mut queue, &mut tasks, &mut submissions)
                    .await;
            }

            self.transition(DispatchState::Awaiting);
            let results = join_all(
                tasks
                    .iter()
                    .zip(submissions)
                    .map(|(task, submission)| resolve_guarded(executor, task, submission)),
            )
            .await;

            self.transition(DispatchState::Recording);
            for (task, result) in tasks.iter().zip(&results) {
                self.sink
                    .record(task, result)
                    .map_err(|err| RunError::new(RunStage::AppendLog, err))?;
                self.telemetry.record_outcome(result.is_success());
                report_transfer(task, result);
                if result.is_success() {
                    summary.succeeded += 1;
                } else {
                    summary.failed += 1;
                }
            }

            self.transition(DispatchState::Advancing);
            self.sequence.settle(
                tasks
                    .iter()
                    .zip(&results)
                    .map(|(task, result)| (task.sequence_number, result.nonce_consumed()))
                    .chain(fillers),
            );
            self.telemetry.record_batch_complete();
            summary.batches += 1;

            if !queue.is_empty() {
                self.pause().await;
            }
        }

        self.transition(DispatchState::Done);
        summary.next_sequence = Some(self.sequence.base());
        summary.unfilled_sequences = self.sequence.released().collect();
        Ok(summary)
    }

    /// Reuses numbers released in this window that sit below a number the
    /// node holds. Returns the outcome of every no-op filler sent.
    async fn refill_gaps(
        &self,
        queue: &mut VecDeque<Recipient>,
        tasks: &mut Vec<TransferTask>,
        submissions: &mut Vec<Submission>,
    ) -> Vec<(u64, bool)> {
        let asset = self.executor.asset();
        let executor = self.executor;
        let mut fillers = Vec::new();

        loop {
            let gaps = open_gaps(tasks, submissions, &fillers);
            if gaps.is_empty() {
                break;
            }

            let refills = gaps.len().min(queue.len());
            if refills > 0 {
                tracing::info!(
                    asset = %asset,
                    sequences = ?&gaps[..refills],
                    "refilling released sequence numbers before awaiting receipts"
                );
                let refill_tasks: Vec<TransferTask> = queue
                    .drain(..refills)
                    .zip(gaps)
                    .map(|(recipient, sequence_number)| TransferTask {
                        recipient,
                        asset,
                        sequence_number,
                    })
                    .collect();
                self.telemetry.record_dispatched(refill_tasks.len());
                let refill_submissions =
                    join_all(refill_tasks.iter().map(|task| submit_guarded(executor, task))).await;
                tasks.extend(refill_tasks);
                submissions.extend(refill_submissions);
                continue;
            }

            tracing::warn!(
                asset = %asset,
                sequences = ?gaps,
                "no recipients left for released sequence numbers; sending no-op transfers"
            );
            let outcomes = join_all(gaps.iter().map(|&number| fill_guarded(executor, number))).await;
            for (number, submission) in gaps.into_iter().zip(outcomes) {
                if let Submission::Resolved(result) = &submission {
                    tracing::warn!(
                        sequence = number,
                        reason = result.reason().unwrap_or_default(),
                        "no-op transfer was not accepted; later transfers may not confirm"
                    );
                }
                fillers.push((number, submission.nonce_consumed()));
            }
            break;
        }

        fillers
    }

    async fn pause(&self) {
        if self.params.batch_delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = sleep(self.params.batch_delay) => {}
        }
    }

    fn transition(&mut self, next: DispatchState) {
        tracing::debug!(from = ?self.state, to = ?next, "dispatcher state transition");
        self.state = next;
    }
}

/// Released numbers below the highest number the node may hold, ascending.
fn open_gaps(
    tasks: &[TransferTask],
    submissions: &[Submission],
    fillers: &[(u64, bool)],
) -> Vec<u64> {
    let mut latest: BTreeMap<u64, bool> = tasks
        .iter()
        .zip(submissions)
        .map(|(task, submission)| (task.sequence_number, submission.nonce_consumed()))
        .collect();
    latest.extend(fillers.iter().copied());

    let Some(highest) = latest
        .iter()
        .filter(|(_, consumed)| **consumed)
        .map(|(number, _)| *number)
        .max()
    else {
        return Vec::new();
    };

    latest
        .into_iter()
        .filter(|&(number, consumed)| !consumed && number < highest)
        .map(|(number, _)| number)
        .collect()
}

async fn submit_guarded(executor: &dyn TransferExecutor, task: &TransferTask) -> Submission {
    match AssertUnwindSafe(executor.submit(task)).catch_unwind().await {
        Ok(submission) => submission,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(
                sequence = task.sequence_number,
                address = %task.recipient.address_hex(),
                panic = %message,
                "transfer executor panicked"
            );
            Submission::Resolved(TransferResult::rejected(format!(
                "executor panicked: {message}"
            )))
        }
    }
}

async fn resolve_guarded(
    executor: &dyn TransferExecutor,
    task: &TransferTask,
    submission: Submission,
) -> TransferResult {
    let hash = match submission {
        Submission::Accepted(hash) => hash,
        Submission::Resolved(result) => return result,
    };

    match AssertUnwindSafe(executor.confirm(hash)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(
                sequence = task.sequence_number,
                tx_hash = %hash,
                panic = %message,
                "confirmation panicked"
            );
            TransferResult::failed_after_submission(
                format!("executor panicked: {message}"),
                Some(hash.to_string()),
            )
        }
    }
}

async fn fill_guarded(executor: &dyn TransferExecutor, sequence_number: u64) -> Submission {
    match AssertUnwindSafe(executor.fill_gap(sequence_number)).catch_unwind().await {
        Ok(submission) => submission,
        Err(payload) => Submission::Resolved(TransferResult::rejected(format!(
            "executor panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn report_transfer(task: &TransferTask, result: &TransferResult) {
    match result {
        TransferResult::Success { reference } => tracing::info!(
            asset = %task.asset,
            address = %task.recipient.address_hex(),
            amount = task.recipient.amount(),
            sequence = task.sequence_number,
            reference = %reference,
            "transfer succeeded"
        ),
        TransferResult::Failure {
            reason,
            nonce_consumed,
            ..
        } => tracing::warn!(
            asset = %task.asset,
            address = %task.recipient.address_hex(),
            amount = task.recipient.amount(),
            sequence = task.sequence_number,
            nonce_consumed = *nonce_consumed,
            reason = %reason,
            "transfer failed"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
