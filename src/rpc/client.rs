//! RPC client implementation and reusable abstractions for talking to an
//! EVM-compatible node over JSON-RPC. Houses `EvmRpcClient`, its error
//! classification, and the `ChainClient` trait consumed by the sequence
//! coordinator and the transfer executors.

use crate::rpc::auth::build_auth_headers;
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use crate::rpc::retry::{
    RetryContext, CHAIN_ID_RETRY, PENDING_NONCE_RETRY, RECEIPT_RETRY, SEND_RAW_RETRY,
};
use crate::runtime::config::DistributorConfig;
use alloy::primitives::{Address, B256};
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::{ClientT, Error as JsonRpcError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{fmt, future::Future, str::FromStr, sync::Arc, time::Duration};
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug)]
pub enum RpcError {
    Timeout {
        method: &'static str,
    },
    /// The node answered with a JSON-RPC error object.
    Rejected {
        method: &'static str,
        code: i32,
        message: String,
    },
    InvalidResponse {
        method: &'static str,
        detail: String,
    },
}

impl RpcError {
    /// Message text of a node rejection, if this is one.
    pub fn rejection_message(&self) -> Option<&str> {
        match self {
            RpcError::Rejected { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::Rejected {
                method,
                code,
                message,
            } => write!(f, "rpc {method} rejected (code={code}): {message}"),
            RpcError::InvalidResponse { method, detail } => {
                write!(f, "rpc {method} returned an invalid response: {detail}")
            }
        }
    }
}

impl std::error::Error for RpcError {}

/// Execution status reported by a mined transaction receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Chain operations the engine depends on. Implemented by [`EvmRpcClient`] and
/// by in-memory doubles in tests.
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> BoxFuture<'_, Result<u64>>;

    /// Next sequence number for `address`, counting transactions still in the mempool.
    fn pending_nonce(&self, address: Address) -> BoxFuture<'_, Result<u64>>;

    fn send_raw_transaction<'a>(&'a self, raw: &'a [u8]) -> BoxFuture<'a, Result<B256>>;

    /// `Ok(None)` while the transaction is not yet mined.
    fn transaction_receipt(&self, hash: B256) -> BoxFuture<'_, Result<Option<ReceiptStatus>>>;

    /// Request counters, when the implementation keeps them.
    fn metrics_snapshot(&self) -> Option<RpcMetricsSnapshot> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct EvmRpcClient {
    rpc_url: Arc<String>,
    client: HttpClient,
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
}

impl ChainClient for EvmRpcClient {
    fn chain_id(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.chain_id())
    }

    fn pending_nonce(&self, address: Address) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.pending_nonce(address))
    }

    fn send_raw_transaction<'a>(&'a self, raw: &'a [u8]) -> BoxFuture<'a, Result<B256>> {
        Box::pin(self.send_raw_transaction(raw))
    }

    fn transaction_receipt(&self, hash: B256) -> BoxFuture<'_, Result<Option<ReceiptStatus>>> {
        Box::pin(self.transaction_receipt(hash))
    }

    fn metrics_snapshot(&self) -> Option<RpcMetricsSnapshot> {
        Some(self.metrics())
    }
}

enum FailureClass {
    Rejected,
    Timeout,
    Transport,
}

impl EvmRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_options(url, None, None, RpcClientOptions::default())
    }

    pub fn with_options(
        url: impl Into<String>,
        user: Option<&str>,
        password: Option<&str>,
        options: RpcClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let headers = build_auth_headers(user, password)?;

        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;

        Ok(Self {
            rpc_url: Arc::new(rpc_url),
            client,
            options,
            metrics: Arc::new(RpcMetrics::default()),
        })
    }

    pub fn from_config(config: &DistributorConfig) -> Result<Self> {
        config.validate()?;
        let options = RpcClientOptions {
            request_timeout: config.rpc_timeout(),
            max_attempts: config.rpc_max_attempts(),
            max_concurrent_requests: std::cmp::max(
                16,
                config.concurrency_limit().saturating_mul(2),
            ),
            ..RpcClientOptions::default()
        };
        Self::with_options(
            config.rpc_url().to_owned(),
            config.rpc_user(),
            config.rpc_password(),
            options,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn chain_id(&self) -> Result<u64> {
        const METHOD: &str = "eth_chainId";

        self.retry_request(
            RetryContext::new(&CHAIN_ID_RETRY),
            || async {
                let raw: String = self.call(METHOD, rpc_params![]).await?;
                parse_quantity(METHOD, &raw)
            },
            |attempt, chain_id: &u64| {
                tracing::debug!(attempt, chain_id = *chain_id, "resolved chain id");
            },
        )
        .await
    }

    pub async fn pending_nonce(&self, address: Address) -> Result<u64> {
        const METHOD: &str = "eth_getTransactionCount";
        let target = address.to_string();

        self.retry_request(
            RetryContext::with_target(&PENDING_NONCE_RETRY, &target),
            || async {
                let raw: String = self
                    .call(METHOD, rpc_params![target.as_str(), "pending"])
                    .await?;
                parse_quantity(METHOD, &raw)
            },
            |attempt, nonce: &u64| {
                tracing::debug!(attempt, nonce = *nonce, "fetched pending nonce");
            },
        )
        .await
    }

    /// Submits a signed transaction. Timeouts and transport failures resend the
    /// identical payload, which the node deduplicates by hash.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        const METHOD: &str = "eth_sendRawTransaction";
        let payload = format!("0x{}", hex::encode(raw));

        self.retry_request(
            RetryContext::new(&SEND_RAW_RETRY),
            || async {
                let hash: String = self.call(METHOD, rpc_params![payload.as_str()]).await?;
                B256::from_str(&hash).map_err(|err| {
                    anyhow::Error::from(RpcError::InvalidResponse {
                        method: METHOD,
                        detail: format!("bad transaction hash {hash}: {err}"),
                    })
                })
            },
            |attempt, hash: &B256| {
                tracing::debug!(attempt, tx_hash = %hash, "transaction accepted by node");
            },
        )
        .await
    }

    pub async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptStatus>> {
        const METHOD: &str = "eth_getTransactionReceipt";
        let target = hash.to_string();

        self.retry_request(
            RetryContext::with_target(&RECEIPT_RETRY, &target),
            || async {
                let receipt: Option<Value> =
                    self.call(METHOD, rpc_params![target.as_str()]).await?;
                receipt.map(|value| parse_receipt_status(&value)).transpose()
            },
            |_, _| {},
        )
        .await
    }

    async fn call<R>(&self, method: &'static str, params: ArrayParams) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let value = timeout(
            self.options.request_timeout,
            self.client.request(method, params),
        )
        .await
        .map_err(|_| RpcError::Timeout { method })?
        .map_err(|err| map_rpc_error(method, err))?;
        Ok(value)
    }

    /// Shared retry/backoff loop wrapping RPC operations with metrics,
    /// exponential backoff, and consistent logging. Node rejections are final.
    async fn retry_request<T, F, Fut, S>(
        &self,
        context: RetryContext<'_>,
        mut operation: F,
        mut on_success: S,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        S: FnMut(usize, &T),
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let start = Instant::now();

            match operation().await {
                Ok(value) => {
                    self.metrics.record_success(start.elapsed());
                    on_success(attempt, &value);
                    return Ok(value);
                }
                Err(err) => {
                    let elapsed = start.elapsed();
                    let timed_out = match classify(&err) {
                        FailureClass::Rejected => {
                            self.metrics.record_rejection(elapsed);
                            context.log_rejected(attempt, &err);
                            return Err(err);
                        }
                        FailureClass::Timeout => {
                            self.metrics.record_timeout(elapsed);
                            true
                        }
                        FailureClass::Transport => {
                            self.metrics.record_failure(elapsed);
                            false
                        }
                    };

                    if attempt >= self.options.max_attempts {
                        context.log_exhausted(attempt, &err, timed_out);
                        return Err(err);
                    }

                    let backoff = self.backoff_delay(attempt);
                    context.log_retry(attempt, backoff, &err, timed_out);
                    sleep(backoff).await;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            return self.options.initial_backoff;
        }

        let exponent = attempt.saturating_sub(1) as u32;
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.options
            .initial_backoff
            .saturating_mul(multiplier)
            .min(self.options.max_backoff)
    }
}

fn classify(err: &anyhow::Error) -> FailureClass {
    match err.downcast_ref::<RpcError>() {
        Some(RpcError::Rejected { .. }) | Some(RpcError::InvalidResponse { .. }) => {
            FailureClass::Rejected
        }
        Some(RpcError::Timeout { .. }) => FailureClass::Timeout,
        None => FailureClass::Transport,
    }
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    match err {
        JsonRpcError::Call(object) => RpcError::Rejected {
            method,
            code: object.code(),
            message: object.message().to_owned(),
        }
        .into(),
        JsonRpcError::RequestTimeout => RpcError::Timeout { method }.into(),
        JsonRpcError::ParseError(err) => RpcError::InvalidResponse {
            method,
            detail: err.to_string(),
        }
        .into(),
        other => anyhow!("rpc {method} call failed: {other}"),
    }
}

/// Decodes a `0x`-prefixed hex quantity as returned by `eth_*` methods.
pub(crate) fn parse_quantity(method: &'static str, raw: &str) -> Result<u64> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| RpcError::InvalidResponse {
            method,
            detail: format!("quantity {raw:?} is missing the 0x prefix"),
        })?;

    if digits.is_empty() {
        return Err(RpcError::InvalidResponse {
            method,
            detail: "empty quantity".to_owned(),
        }
        .into());
    }

    u64::from_str_radix(digits, 16).map_err(|err| {
        RpcError::InvalidResponse {
            method,
            detail: format!("quantity {raw:?} is not valid hex: {err}"),
        }
        .into()
    })
}

fn parse_receipt_status(receipt: &Value) -> Result<ReceiptStatus> {
    const METHOD: &str = "eth_getTransactionReceipt";

    // Pre-Byzantium receipts carry no status; mined means applied.
    let Some(status) = receipt.get("status").and_then(Value::as_str) else {
        return Ok(ReceiptStatus::Success);
    };

    match parse_quantity(METHOD, status)? {
        0 => Ok(ReceiptStatus::Reverted),
        _ => Ok(ReceiptStatus::Success),
    }
}
