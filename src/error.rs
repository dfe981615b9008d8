//! Error taxonomy for the trace pipeline.
//!
//! Nothing in this crate propagates into the host: every failure ends up
//! formatted through one of these variants and appended to the error
//! sink. The numbered codes are stable so operators can grep for them.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    /// The aggregate store was unavailable or an operation against it
    /// failed. Aggregation is skipped; the sample decision is unaffected.
    #[error("[sql-trace-error-01] aggregate store failure: {0:#}")]
    Store(anyhow::Error),

    /// One or both primary sinks failed to open, so nothing can be traced.
    #[error("[sql-trace-error-02] trace sinks are not open")]
    SinksUnavailable,

    /// A pipeline step failed after the sample decision.
    #[error("[sql-trace-error-03] {step} failed: {cause:#}")]
    Step { step: Step, cause: anyhow::Error },
}

/// Pipeline stage tag carried by step failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Identify,
    PersistSql,
    PersistStack,
    Push,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Identify => "identify",
            Step::PersistSql => "persist-sql",
            Step::PersistStack => "persist-stack",
            Step::Push => "push",
        };
        f.write_str(name)
    }
}
