//! Processor orchestration covering sequence-number coordination, transfer
//! execution, and the batch dispatch loop.

pub(crate) mod backoff;
pub mod dispatcher;
pub mod executor;
pub mod sequence;
