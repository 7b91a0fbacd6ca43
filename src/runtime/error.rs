use anyhow::Error as AnyError;
use std::fmt;

/// Steps of a run whose failure aborts the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    LoadRecipients,
    ReadLedger,
    OpenLog,
    FetchChainId,
    PrepareExecutor,
    FetchSequence,
    AppendLog,
}

/// Run-level failure. Individual transfer failures never produce one.
#[derive(Debug)]
pub struct RunError {
    stage: RunStage,
    source: AnyError,
}

impl RunError {
    pub fn new(stage: RunStage, source: AnyError) -> Self {
        Self { stage, source }
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} failed: {:#}", self.stage, self.source)
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
