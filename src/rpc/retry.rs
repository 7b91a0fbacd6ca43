//! Shared retry context, logging helpers, and canned message templates used by
//! the RPC client to keep instrumentation consistent across methods.

use anyhow::Error;
use std::time::Duration;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(target) = $ctx.target {
            tracing::$level!(target_ref = target, $($rest)*);
        } else {
            tracing::$level!($($rest)*);
        }
    }};
}

/// Logging labels describing how a particular RPC method reports retry
/// attempts, node rejections, and exhaustion.
#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) retry: &'static str,
    pub(crate) rejected: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) exhausted_timeout: Option<&'static str>,
}

/// Context passed into `retry_request` so callers can attach the address or
/// transaction hash a request concerns.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    target: Option<&'a str>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(messages: &'a RetryMessages) -> Self {
        Self {
            target: None,
            messages,
        }
    }

    pub(crate) fn with_target(messages: &'a RetryMessages, target: &'a str) -> Self {
        Self {
            target: Some(target),
            messages,
        }
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &Error, timeout: bool) {
        let backoff_ms = duration_to_millis(backoff);
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms,
            error = %err,
            timeout,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_rejected(&self, attempt: usize, err: &Error) {
        log_with_retry_ctx!(debug, self, attempt, error = %err, "{}", self.messages.rejected);
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &Error, timeout: bool) {
        let message = if timeout {
            self.messages
                .exhausted_timeout
                .unwrap_or(self.messages.exhausted)
        } else {
            self.messages.exhausted
        };
        log_with_retry_ctx!(error, self, attempt, error = %err, "{}", message);
    }
}

fn duration_to_millis(backoff: Duration) -> u64 {
    backoff.as_millis().min(u128::from(u64::MAX)) as u64
}

pub(crate) const CHAIN_ID_RETRY: RetryMessages = RetryMessages {
    retry: "eth_chainId failed; retrying",
    rejected: "eth_chainId rejected by node",
    exhausted: "eth_chainId exhausted retries",
    exhausted_timeout: Some("eth_chainId exhausted retries after timeout"),
};

pub(crate) const PENDING_NONCE_RETRY: RetryMessages = RetryMessages {
    retry: "eth_getTransactionCount failed; retrying",
    rejected: "eth_getTransactionCount rejected by node",
    exhausted: "eth_getTransactionCount exhausted retries",
    exhausted_timeout: Some("eth_getTransactionCount exhausted retries after timeout"),
};

pub(crate) const SEND_RAW_RETRY: RetryMessages = RetryMessages {
    retry: "eth_sendRawTransaction failed; resubmitting identical payload",
    rejected: "eth_sendRawTransaction rejected by node",
    exhausted: "eth_sendRawTransaction exhausted retries",
    exhausted_timeout: Some("eth_sendRawTransaction exhausted retries after timeout"),
};

pub(crate) const RECEIPT_RETRY: RetryMessages = RetryMessages {
    retry: "eth_getTransactionReceipt failed; retrying",
    rejected: "eth_getTransactionReceipt rejected by node",
    exhausted: "eth_getTransactionReceipt exhausted retries",
    exhausted_timeout: None,
};
