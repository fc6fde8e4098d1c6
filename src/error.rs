use thiserror::Error;

/// Typed failures surfaced by the ledger engine and store. Anything else
/// (connection loss, malformed SQL rows) propagates as a plain anyhow error.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
}
