//! Error types for the admin storage layer.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the history stores and the teardown coordinator.
///
/// No operation retries internally; every failure carries the operation name
/// or key it happened under so an operator can retry by hand.
#[derive(Debug, Error)]
pub enum Error {
    /// The storage cluster was unreachable or a query against it failed.
    #[error("storage error during {op}: {source}")]
    Connection {
        op: String,
        #[source]
        source: sqlx::Error,
    },

    /// The read target does not exist.
    #[error("{what} not found for {key}")]
    NotFound { what: &'static str, key: String },

    /// A stored row or blob did not decode into its expected shape.
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    /// A branch token or continuation token was corrupt.
    #[error("invalid token: {0}")]
    Codec(String),

    /// Invalid input caught before any storage I/O.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Skip-and-continue teardown finished with one or more failed steps.
    #[error("{0}")]
    PartialDeletion(PartialDeletion),
}

impl Error {
    /// Wrap a query failure with the name of the operation that issued it.
    pub(crate) fn storage(op: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
        move |source| Error::Connection {
            op: op.to_string(),
            source,
        }
    }
}

/// One teardown step of a full execution removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    History,
    Snapshot,
    CurrentPointer,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TeardownStep::History => "history",
            TeardownStep::Snapshot => "snapshot",
            TeardownStep::CurrentPointer => "current-pointer",
        };
        f.write_str(name)
    }
}

/// A teardown step that failed under skip-and-continue.
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub step: TeardownStep,
    pub reason: String,
}

/// Aggregate outcome of a skip-and-continue teardown with failures.
///
/// Every step was still attempted; this records which of them failed and why.
#[derive(Debug, Clone)]
pub struct PartialDeletion {
    pub failed: Vec<StepFailure>,
}

impl fmt::Display for PartialDeletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "teardown incomplete, {} step(s) failed:", self.failed.len())?;
        for failure in &self.failed {
            write!(f, " [{}: {}]", failure.step, failure.reason)?;
        }
        Ok(())
    }
}
