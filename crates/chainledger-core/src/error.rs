//! Error types for the chainledger pipeline.
//!
//! Decode and validation failures are local: the offending log is preserved as
//! a raw record or rejected with context, and the batch continues. Reorg
//! handling failures are global to a chain: they halt that chain's polling and
//! must reach an operator.

use thiserror::Error;

/// Errors from ABI registration and resolution.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("ABI version {version} for {chain}:{address} overlaps existing version {existing}")]
    RangeConflict {
        chain: String,
        address: String,
        version: u32,
        existing: u32,
    },

    #[error("invalid ABI JSON for {chain}:{address}: {reason}")]
    InvalidAbi {
        chain: String,
        address: String,
        reason: String,
    },
}

/// Errors from the stored-ledger backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Errors signalled by the ingestion collaborator (typed, never a crash).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider RPC error: {0}")]
    Rpc(String),

    #[error("block not found: {reference}")]
    BlockNotFound { reference: String },

    #[error("provider fetch timed out after {ms}ms")]
    Timeout { ms: u64 },
}

/// A decoded event that fails the normalizer's shape check.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("event {event}: required field '{field}' missing")]
    MissingField { event: String, field: String },

    #[error("event {event}: field '{field}' is not an address: {value}")]
    InvalidAddress {
        event: String,
        field: String,
        value: String,
    },

    #[error("event {event}: field '{field}' is not a non-negative integer: {value}")]
    InvalidAmount {
        event: String,
        field: String,
        value: String,
    },
}

/// Errors from reorg detection.
#[derive(Debug, Error)]
pub enum ReorgError {
    /// The fork point lies deeper than the configured bound. Fatal for the
    /// poll cycle; an operator must intervene before polling resumes.
    #[error("no common ancestor within {max_depth} blocks on chain {chain}")]
    AncestorNotFound { chain: String, max_depth: u64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the recovery engine.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The chain head moved while recovery was in flight; the run was
    /// abandoned so a fresh detect cycle can start against the new head.
    #[error("head moved during recovery: expected {expected}, observed {observed}")]
    HeadMoved { expected: String, observed: String },

    #[error("fetch exhausted for block {hash} after {attempts} attempts: {source}")]
    FetchExhausted {
        hash: String,
        attempts: u32,
        source: ProviderError,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fatal outcomes of one reorg-handling cycle, surfaced by the manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Detect(#[from] ReorgError),

    #[error("rollback incomplete: {failed} record-type demotions failed")]
    RollbackIncomplete { failed: usize },

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}
