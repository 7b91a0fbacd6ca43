//! JSON-RPC client plumbing for EVM-compatible nodes: authentication, retry
//! policy, request metrics, and the `ChainClient` seam used by the engine.

pub mod auth;
pub mod client;
pub mod metrics;
pub mod options;
pub mod retry;

pub use client::{ChainClient, EvmRpcClient, ReceiptStatus, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
