pub mod intake;
pub mod journal;
pub mod processor;
pub mod rpc;
pub mod runtime;
pub mod transfer;

pub use intake::{LoadReport, RecipientList, RecipientLoader};
pub use journal::{AuditLogger, LogRecord, LogStatus, ProcessedKey, ProcessedLedger, TransferSink};
pub use processor::dispatcher::{BatchDispatcher, DispatchParams, DispatchState};
pub use processor::executor::{
    ConfirmationPolicy, EvmTransferExecutor, ExecutorParams, FeeParams, SubmitFuture, Submission,
    TransferExecutor, TransferFuture,
};
pub use processor::sequence::{ReservationPolicy, SequenceCoordinator};
pub use rpc::{ChainClient, EvmRpcClient, ReceiptStatus, RpcError};
pub use runtime::config::{DistributorConfig, DistributorConfigBuilder, DistributorConfigParams};
pub use runtime::error::{RunError, RunStage};
pub use runtime::runner::Runner;
pub use runtime::summary::{AssetSummary, RunSummary};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use transfer::{AssetType, Recipient, TransferResult, TransferTask};
