//! Canonical flag manager — the single authority for canonical flag flips.
//!
//! Every component that needs to change what counts as canonical (optimistic
//! ingest, rollback demotion, recovery promotion) routes through this type
//! rather than touching the store directly, so there is exactly one source of
//! truth for "what is canonical right now" across all record types.

use std::sync::Arc;

use crate::{error::StoreError, normalize::RecordType, store::LedgerStore};

/// Flips canonical flags on ledger rows, scoped to
/// `(record_type, block_number, block_hash)`.
///
/// The key is narrow enough that concurrent flips for different blocks never
/// contend; idempotency comes from the store contract (re-applying a flag
/// value changes zero rows).
#[derive(Clone)]
pub struct CanonicalFlags {
    store: Arc<dyn LedgerStore>,
}

impl CanonicalFlags {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Mark every row of `record_type` under `(block_number, block_hash)`
    /// with the given canonical value. Returns the number of rows changed.
    pub async fn set_canonical(
        &self,
        chain: &str,
        record_type: RecordType,
        block_number: u64,
        block_hash: &str,
        canonical: bool,
    ) -> Result<u64, StoreError> {
        let changed = self
            .store
            .set_canonical(chain, record_type, block_number, block_hash, canonical)
            .await?;
        if changed > 0 {
            tracing::debug!(
                chain,
                %record_type,
                block_number,
                block_hash,
                canonical,
                changed,
                "canonical flag flipped"
            );
        }
        Ok(changed)
    }
}
