//! Runtime glue that wires configuration, telemetry, run summaries, and
//! runner orchestration.

pub mod config;
pub mod error;
pub mod runner;
pub mod summary;
pub mod telemetry;
