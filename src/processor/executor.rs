//! Transfer executors: build, sign and submit one EIP-1559 transaction per
//! task, then optionally wait for its receipt.
//!
//! Submission and confirmation are separate steps so the dispatcher can
//! close sequence gaps in a window before anything waits on a receipt.
//! Executors never return errors. Every failure mode is folded into a
//! [`Submission`] or [`TransferResult`] so the dispatcher can record it and
//! move on.

use crate::intake::amount::{to_base_units, NATIVE_DECIMALS};
use crate::processor::backoff::{poll_until, PollBackoff, PollOutcome};
use crate::rpc::{ChainClient, ReceiptStatus, RpcError};
use crate::runtime::config::DistributorConfig;
use crate::transfer::{AssetType, TransferResult, TransferTask};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use anyhow::{anyhow, Context, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

alloy::sol! {
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

pub type TransferFuture<'a> = Pin<Box<dyn Future<Output = TransferResult> + Send + 'a>>;
pub type SubmitFuture<'a> = Pin<Box<dyn Future<Output = Submission> + Send + 'a>>;

/// What the node made of a signed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The node holds the transaction under this hash; it may not be mined yet.
    Accepted(B256),
    /// Settled without a receipt wait, successfully or not.
    Resolved(TransferResult),
}

impl Submission {
    /// Whether the sequence number used for this submission is spent.
    pub fn nonce_consumed(&self) -> bool {
        match self {
            Self::Accepted(_) => true,
            Self::Resolved(result) => result.nonce_consumed(),
        }
    }
}

/// Sends transfers of a fixed asset type.
pub trait TransferExecutor: Send + Sync {
    fn asset(&self) -> AssetType;

    /// Builds, signs and submits the transfer for `task`.
    fn submit<'a>(&'a self, task: &'a TransferTask) -> SubmitFuture<'a>;

    /// Resolves a transfer the node accepted under `hash`.
    fn confirm<'a>(&'a self, hash: B256) -> TransferFuture<'a>;

    /// Occupies `sequence_number` with a zero-value transfer back to the
    /// funding account, so later numbers can be mined.
    fn fill_gap(&self, sequence_number: u64) -> SubmitFuture<'_>;

    fn execute<'a>(&'a self, task: &'a TransferTask) -> TransferFuture<'a> {
        Box::pin(async move {
            match self.submit(task).await {
                Submission::Accepted(hash) => self.confirm(hash).await,
                Submission::Resolved(result) => result,
            }
        })
    }
}

/// Node replies meaning this exact payload is already in the pool.
const ALREADY_KNOWN: &[&str] = &["already known", "known transaction", "already imported"];

/// Node replies meaning another transaction already holds the sequence number.
const SEQUENCE_TAKEN: &[&str] = &[
    "nonce too low",
    "replacement transaction underpriced",
    "nonce has already been used",
];

const MAX_RECEIPT_POLL_DELAY: Duration = Duration::from_secs(10);

/// Gas for a plain value transfer with no calldata.
const FILLER_GAS_LIMIT: u64 = 21_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeParams {
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub wait: bool,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferKind {
    Native,
    Token { contract: Address, decimals: u8 },
}

pub struct ExecutorParams {
    pub client: Arc<dyn ChainClient>,
    pub signer: PrivateKeySigner,
    pub chain_id: u64,
    pub fees: FeeParams,
    pub gas_limit: u64,
    pub confirmation: ConfirmationPolicy,
}

struct SignedTransfer {
    hash: B256,
    raw: Vec<u8>,
}

/// Executor for both asset types, signing locally with the funding key.
pub struct EvmTransferExecutor {
    client: Arc<dyn ChainClient>,
    signer: PrivateKeySigner,
    wallet: EthereumWallet,
    chain_id: u64,
    kind: TransferKind,
    fees: FeeParams,
    gas_limit: u64,
    confirmation: ConfirmationPolicy,
}

impl EvmTransferExecutor {
    pub fn native(params: ExecutorParams) -> Self {
        Self::with_kind(params, TransferKind::Native)
    }

    pub fn token(params: ExecutorParams, contract: Address, decimals: u8) -> Self {
        Self::with_kind(params, TransferKind::Token { contract, decimals })
    }

    /// Builds the executor for `asset` from the run configuration.
    pub fn for_asset(
        asset: AssetType,
        config: &DistributorConfig,
        client: Arc<dyn ChainClient>,
        signer: PrivateKeySigner,
        chain_id: u64,
    ) -> Result<Self> {
        let fees = FeeParams {
            max_priority_fee_per_gas: config.max_priority_fee_per_gas(),
            max_fee_per_gas: config.max_fee_per_gas(),
        };
        let confirmation = ConfirmationPolicy {
            wait: config.await_confirmation(),
            timeout: config.confirmation_timeout(),
            poll_interval: config.receipt_poll_interval(),
        };

        match asset {
            AssetType::Native => Ok(Self::native(ExecutorParams {
                client,
                signer,
                chain_id,
                fees,
                gas_limit: config.native_gas_limit(),
                confirmation,
            })),
            AssetType::Token => {
                let contract = config
                    .token_contract()
                    .context("token_contract is required for TOKEN transfers")?;
                Ok(Self::token(
                    ExecutorParams {
                        client,
                        signer,
                        chain_id,
                        fees,
                        gas_limit: config.token_gas_limit(),
                        confirmation,
                    },
                    contract,
                    config.token_decimals(),
                ))
            }
        }
    }

    fn with_kind(params: ExecutorParams, kind: TransferKind) -> Self {
        let ExecutorParams {
            client,
            signer,
            chain_id,
            fees,
            gas_limit,
            confirmation,
        } = params;

        Self {
            client,
            wallet: EthereumWallet::from(signer.clone()),
            signer,
            chain_id,
            kind,
            fees,
            gas_limit,
            confirmation,
        }
    }

    /// Address every transfer is sent from.
    pub fn funding_address(&self) -> Address {
        self.signer.address()
    }

    async fn submit_task(&self, task: &TransferTask) -> Submission {
        let request = match self.build_request(task) {
            Ok(request) => request,
            Err(err) => {
                return Submission::Resolved(TransferResult::rejected(format!(
                    "failed to build transaction: {err:#}"
                )))
            }
        };
        self.sign_and_send(request).await
    }

    async fn submit_filler(&self, sequence_number: u64) -> Submission {
        let request = self
            .filler_request(sequence_number)
            .with_gas_limit(FILLER_GAS_LIMIT);
        match self.sign_and_send(request).await {
            Submission::Accepted(hash) => {
                tracing::info!(
                    sequence = sequence_number,
                    tx_hash = %hash,
                    "released sequence number occupied by a no-op transfer"
                );
                Submission::Accepted(hash)
            }
            other => other,
        }
    }

    async fn sign_and_send(&self, request: TransactionRequest) -> Submission {
        let signed = match self.sign(request).await {
            Ok(signed) => signed,
            Err(err) => {
                return Submission::Resolved(TransferResult::rejected(format!(
                    "failed to build transaction: {err:#}"
                )))
            }
        };
        self.send(&signed).await
    }

    async fn finish(&self, hash: B256) -> TransferResult {
        if !self.confirmation.wait {
            return TransferResult::success(hash.to_string());
        }

        self.await_receipt(hash).await
    }

    async fn sign(&self, request: TransactionRequest) -> Result<SignedTransfer> {
        let envelope = request
            .build(&self.wallet)
            .await
            .map_err(|err| anyhow!("signing failed: {err}"))?;

        Ok(SignedTransfer {
            hash: *envelope.tx_hash(),
            raw: envelope.encoded_2718(),
        })
    }

    fn build_request(&self, task: &TransferTask) -> Result<TransactionRequest> {
        let recipient = task.recipient.address();
        let amount = task.recipient.amount();

        let request = match self.kind {
            TransferKind::Native => {
                let value = to_base_units(amount, NATIVE_DECIMALS)?;
                TransactionRequest::default()
                    .with_to(recipient)
                    .with_value(value)
            }
            TransferKind::Token { contract, decimals } => {
                let amount = to_base_units(amount, decimals)?;
                let calldata = IERC20::transferCall {
                    to: recipient,
                    amount,
                }
                .abi_encode();
                TransactionRequest::default()
                    .with_to(contract)
                    .with_input(calldata)
            }
        };

        Ok(self
            .with_envelope(request, task.sequence_number)
            .with_gas_limit(self.gas_limit))
    }

    fn filler_request(&self, sequence_number: u64) -> TransactionRequest {
        let request = TransactionRequest::default()
            .with_to(self.funding_address())
            .with_value(U256::ZERO);
        self.with_envelope(request, sequence_number)
    }

    fn with_envelope(&self, request: TransactionRequest, sequence_number: u64) -> TransactionRequest {
        let mut request = request
            .with_chain_id(self.chain_id)
            .with_nonce(sequence_number)
            .with_max_priority_fee_per_gas(self.fees.max_priority_fee_per_gas)
            .with_max_fee_per_gas(self.fees.max_fee_per_gas);
        request.from = Some(self.funding_address());
        request
    }

    async fn send(&self, signed: &SignedTransfer) -> Submission {
        let err = match self.client.send_raw_transaction(&signed.raw).await {
            Ok(hash) => return Submission::Accepted(hash),
            Err(err) => err,
        };
        let reason = format!("{err:#}");

        match classify_submit_error(&err) {
            SubmitError::AlreadyKnown => {
                tracing::debug!(tx_hash = %signed.hash, "node already holds the transaction");
                Submission::Accepted(signed.hash)
            }
            SubmitError::SequenceTaken => self.resolve_taken_sequence(reason, signed.hash).await,
            SubmitError::Rejected => Submission::Resolved(TransferResult::rejected(reason)),
            SubmitError::Unknown => Submission::Resolved(TransferResult::failed_after_submission(
                reason,
                Some(signed.hash.to_string()),
            )),
        }
    }

    /// The number is spent; an earlier, unacknowledged send of this same
    /// payload may be what spent it.
    async fn resolve_taken_sequence(&self, reason: String, local_hash: B256) -> Submission {
        match self.client.transaction_receipt(local_hash).await {
            Ok(Some(_)) => {
                tracing::info!(
                    tx_hash = %local_hash,
                    "sequence number was taken by this transfer's own payload"
                );
                Submission::Accepted(local_hash)
            }
            Ok(None) => Submission::Resolved(TransferResult::failed_after_submission(reason, None)),
            Err(err) => {
                tracing::warn!(
                    tx_hash = %local_hash,
                    error = %format!("{err:#}"),
                    "receipt lookup after a taken sequence number failed"
                );
                Submission::Resolved(TransferResult::failed_after_submission(
                    reason,
                    Some(local_hash.to_string()),
                ))
            }
        }
    }

    async fn await_receipt(&self, hash: B256) -> TransferResult {
        let client = &self.client;
        let schedule = PollBackoff::new(self.confirmation.poll_interval, self.confirmation.timeout)
            .with_max_delay(MAX_RECEIPT_POLL_DELAY);

        let outcome = poll_until(schedule, move |attempt| async move {
            match client.transaction_receipt(hash).await {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(
                        tx_hash = %hash,
                        attempt,
                        error = %err,
                        "receipt lookup failed; will poll again"
                    );
                    None
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready(ReceiptStatus::Success) => TransferResult::success(hash.to_string()),
            PollOutcome::Ready(ReceiptStatus::Reverted) => {
                TransferResult::failed_after_submission("transaction reverted", Some(hash.to_string()))
            }
            PollOutcome::TimedOut { attempts } => TransferResult::failed_after_submission(
                format!(
                    "not confirmed within {}s ({attempts} receipt checks)",
                    self.confirmation.timeout.as_secs()
                ),
                Some(hash.to_string()),
            ),
        }
    }
}

impl TransferExecutor for EvmTransferExecutor {
    fn asset(&self) -> AssetType {
        match self.kind {
            TransferKind::Native => AssetType::Native,
            TransferKind::Token { .. } => AssetType::Token,
        }
    }

    fn submit<'a>(&'a self, task: &'a TransferTask) -> SubmitFuture<'a> {
        Box::pin(self.submit_task(task))
    }

    fn confirm<'a>(&'a self, hash: B256) -> TransferFuture<'a> {
        Box::pin(self.finish(hash))
    }

    fn fill_gap(&self, sequence_number: u64) -> SubmitFuture<'_> {
        Box::pin(self.submit_filler(sequence_number))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitError {
    /// This exact payload is already in the pool.
    AlreadyKnown,
    /// Some transaction already holds the sequence number.
    SequenceTaken,
    /// The node refused the payload; the sequence number is still free.
    Rejected,
    /// No verdict from the node. It may hold the payload.
    Unknown,
}

fn classify_submit_error(err: &anyhow::Error) -> SubmitError {
    let Some(rpc_error) = err.downcast_ref::<RpcError>() else {
        return SubmitError::Unknown;
    };

    match rpc_error {
        RpcError::Rejected { message, .. } => {
            let message = message.to_ascii_lowercase();
            if ALREADY_KNOWN.iter().any(|needle| message.contains(needle)) {
                SubmitError::AlreadyKnown
            } else if SEQUENCE_TAKEN.iter().any(|needle| message.contains(needle)) {
                SubmitError::SequenceTaken
            } else {
                SubmitError::Rejected
            }
        }
        RpcError::Timeout { .. } | RpcError::InvalidResponse { .. } => SubmitError::Unknown,
    }
}
