//! The durable audit log: one CSV row per resolved transfer, appended by
//! [`AuditLogger`] and replayed by [`ProcessedLedger`] at the start of the
//! next run to decide what still needs sending.

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::ProcessedLedger;
pub use record::{LogRecord, LogStatus, ProcessedKey, LOG_HEADER};
pub use writer::{AuditLogger, TransferSink};
