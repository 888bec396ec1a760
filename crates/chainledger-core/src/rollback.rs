//! Rollback engine — demotes every record under the orphaned blocks of a
//! detected fork.
//!
//! Record types are processed independently: a store failure on one type is
//! recorded and the remaining types are still demoted, so the orchestrator
//! can see exactly how much of the rollback took effect before deciding
//! whether recovery may proceed.

use crate::{
    canonical::CanonicalFlags,
    error::StoreError,
    normalize::RecordType,
    reorg::ReorgEvent,
    types::BlockRef,
};

/// One record-type demotion that failed.
#[derive(Debug)]
pub struct RollbackFailure {
    pub record_type: RecordType,
    pub block: BlockRef,
    pub error: StoreError,
}

/// Aggregated outcome of a rollback.
#[derive(Debug, Default)]
pub struct RollbackResult {
    /// Total rows demoted across all record types.
    pub affected: u64,
    /// Demotions that failed (empty on full success).
    pub failures: Vec<RollbackFailure>,
}

impl RollbackResult {
    /// Returns `true` if every demotion succeeded.
    pub fn complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Demotes orphaned-block rows to non-canonical via the flag manager.
pub struct RollbackEngine {
    flags: CanonicalFlags,
}

impl RollbackEngine {
    pub fn new(flags: CanonicalFlags) -> Self {
        Self { flags }
    }

    /// Demote all rows belonging to the event's orphaned blocks, across every
    /// record type. Never short-circuits; partial failures are aggregated.
    pub async fn rollback(&self, event: &ReorgEvent) -> RollbackResult {
        let mut result = RollbackResult::default();

        for block in &event.affected_blocks {
            for record_type in RecordType::ALL {
                match self
                    .flags
                    .set_canonical(&event.chain, record_type, block.number, &block.hash, false)
                    .await
                {
                    Ok(changed) => result.affected += changed,
                    Err(error) => {
                        tracing::warn!(
                            chain = %event.chain,
                            %record_type,
                            block = %block,
                            error = %error,
                            "rollback demotion failed"
                        );
                        result.failures.push(RollbackFailure {
                            record_type,
                            block: block.clone(),
                            error,
                        });
                    }
                }
            }
        }

        tracing::info!(
            chain = %event.chain,
            depth = event.depth,
            affected = result.affected,
            failures = result.failures.len(),
            "rollback finished"
        );
        result
    }
}
