//! Ledger storage trait.
//!
//! The canonical ledger is the one shared mutable resource of the system.
//! Concrete backends live in `chainledger-storage` (memory, SQLite); the core
//! engines only ever see this trait.
//!
//! Contract for implementations:
//! - `(chain, record_type, tx_hash, log_index)` is unique; re-inserting an
//!   existing record is a no-op (this is what makes recovery idempotent).
//! - Rows are never physically deleted. Demoted rows stay for audit.
//! - Read APIs default to the canonical view; non-canonical rows are only
//!   visible when explicitly requested.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::StoreError,
    normalize::{NormalizedRecord, RecordType},
    reorg::ReorgEvent,
    types::BlockHead,
};

/// A stored block row — the ledger's own view of one block on one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub chain: String,
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: i64,
    pub canonical: bool,
}

impl BlockRecord {
    pub fn from_head(chain: impl Into<String>, head: &BlockHead, canonical: bool) -> Self {
        Self {
            chain: chain.into(),
            number: head.number,
            hash: head.hash.clone(),
            parent_hash: head.parent_hash.clone(),
            timestamp: head.timestamp,
            canonical,
        }
    }

    pub fn head(&self) -> BlockHead {
        BlockHead {
            number: self.number,
            hash: self.hash.clone(),
            parent_hash: self.parent_hash.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Which rows a read should see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryView {
    /// Only rows on the currently-agreed chain history. The default for
    /// every downstream consumer.
    #[default]
    CanonicalOnly,
    /// Canonical and demoted rows alike (audit tooling).
    IncludeNonCanonical,
}

impl QueryView {
    /// Returns `true` if a row with the given flag is visible in this view.
    pub fn admits(&self, canonical: bool) -> bool {
        match self {
            Self::CanonicalOnly => canonical,
            Self::IncludeNonCanonical => true,
        }
    }
}

/// Storage backend for the canonical ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a block row. Returns `false` if `(chain, number, hash)` already
    /// existed (the row is left untouched).
    async fn insert_block(&self, block: &BlockRecord) -> Result<bool, StoreError>;

    /// Insert log-derived records, skipping any whose
    /// `(chain, record_type, tx_hash, log_index)` already exists.
    /// Returns the number actually inserted.
    async fn insert_records(&self, records: &[NormalizedRecord]) -> Result<u64, StoreError>;

    /// Flip the canonical flag on every row of `record_type` matching
    /// `(chain, block_number, block_hash)`. Returns the number of rows whose
    /// flag actually changed; re-applying the same value is a no-op.
    ///
    /// Only the canonical flag manager may call this.
    async fn set_canonical(
        &self,
        chain: &str,
        record_type: RecordType,
        block_number: u64,
        block_hash: &str,
        canonical: bool,
    ) -> Result<u64, StoreError>;

    /// The canonical block row at `number`, if any.
    async fn canonical_block(
        &self,
        chain: &str,
        number: u64,
    ) -> Result<Option<BlockRecord>, StoreError>;

    /// The highest canonical block row for `chain` (detector bootstrap).
    async fn max_canonical_block(&self, chain: &str) -> Result<Option<BlockRecord>, StoreError>;

    /// Returns `true` if the ledger has already seen `(chain, number, hash)`,
    /// canonical or not — recovery uses this to re-flag instead of re-fetch.
    async fn block_seen(&self, chain: &str, number: u64, hash: &str)
        -> Result<bool, StoreError>;

    /// Records of one type, ordered by `(block_number, log_index)`.
    async fn records_by_type(
        &self,
        chain: &str,
        record_type: RecordType,
        view: QueryView,
    ) -> Result<Vec<NormalizedRecord>, StoreError>;

    /// Records emitted by one contract.
    async fn records_by_contract(
        &self,
        chain: &str,
        contract: &str,
        view: QueryView,
    ) -> Result<Vec<NormalizedRecord>, StoreError>;

    /// Transfer/approval records a wallet participates in.
    async fn records_by_wallet(
        &self,
        chain: &str,
        wallet: &str,
        view: QueryView,
    ) -> Result<Vec<NormalizedRecord>, StoreError>;

    /// Append to the reorg audit trail. The trail is append-only; events are
    /// never updated after creation.
    async fn append_reorg_event(&self, event: &ReorgEvent) -> Result<(), StoreError>;

    /// Audit events for `chain` with `detected_at` in `[from_ts, to_ts]`.
    async fn reorg_events(
        &self,
        chain: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<ReorgEvent>, StoreError>;
}
