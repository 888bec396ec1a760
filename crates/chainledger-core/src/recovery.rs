//! Recovery engine — re-establishes canonical rows along the new branch
//! after a rollback.
//!
//! Recovery is idempotent: blocks whose rows already exist under the new
//! `(number, hash)` are merely re-flagged canonical, and only genuinely
//! missing blocks are re-fetched and pushed through decode→normalize. Fetches
//! are bounded by a timeout and retried with exponential backoff; exhaustion
//! surfaces as an error, never a silent skip.

use std::{sync::Arc, time::Duration};

use crate::{
    canonical::CanonicalFlags,
    error::{ProviderError, RecoveryError},
    ingest::Ingestor,
    normalize::RecordType,
    provider::{fetch_with_retry, ChainClient, RetryPolicy},
    reorg::ReorgEvent,
    store::LedgerStore,
    types::{BlockHead, BlockRef, LedgerConfig},
};

/// Outcome of a completed recovery.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Blocks processed along the new branch.
    pub blocks: u64,
    /// Blocks whose existing rows were re-flagged canonical.
    pub reflagged: u64,
    /// Blocks fetched from the provider and re-ingested.
    pub refetched: u64,
}

/// Replays the new branch of a reorg into the ledger.
pub struct RecoveryEngine {
    chain: String,
    client: Arc<dyn ChainClient>,
    flags: CanonicalFlags,
    store: Arc<dyn LedgerStore>,
    ingestor: Ingestor,
    fetch_timeout: Duration,
    retry: RetryPolicy,
    descent_scan_limit: u64,
}

impl RecoveryEngine {
    pub fn new(
        config: &LedgerConfig,
        client: Arc<dyn ChainClient>,
        flags: CanonicalFlags,
        store: Arc<dyn LedgerStore>,
        ingestor: Ingestor,
    ) -> Self {
        Self {
            chain: config.chain.clone(),
            client,
            flags,
            store,
            ingestor,
            fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
            retry: RetryPolicy::new(config.retry.clone()),
            descent_scan_limit: config.descent_scan_limit,
        }
    }

    /// Walk the new branch from the event's head down to the common ancestor
    /// and make every block canonical. Returns the branch head on success so
    /// the detector can advance to it.
    pub async fn recover(
        &self,
        event: &ReorgEvent,
    ) -> Result<(RecoveryResult, BlockHead), RecoveryError> {
        let branch = self.collect_branch(event).await?;
        let branch_head = branch
            .last()
            .cloned()
            .ok_or_else(|| RecoveryError::Provider(ProviderError::BlockNotFound {
                reference: event.new_head.hash.clone(),
            }))?;

        let mut result = RecoveryResult::default();
        for block in &branch {
            // a deeper reorg may have arrived mid-recovery; finishing against
            // stale data would re-canonicalize a dead branch
            self.ensure_head_on_branch(&event.new_head).await?;

            if self.store.block_seen(&self.chain, block.number, &block.hash).await? {
                for record_type in RecordType::ALL {
                    self.flags
                        .set_canonical(&self.chain, record_type, block.number, &block.hash, true)
                        .await?;
                }
                result.reflagged += 1;
            } else {
                let logs = fetch_with_retry(&self.retry, self.fetch_timeout, || {
                    self.client.logs_in_block(&block.hash)
                })
                .await
                .map_err(|e| RecoveryError::FetchExhausted {
                    hash: block.hash.clone(),
                    attempts: e.attempts,
                    source: e.last,
                })?;

                self.ingestor.ingest_block(block, &logs).await?;
                result.refetched += 1;
            }
            result.blocks += 1;
        }

        tracing::info!(
            chain = %self.chain,
            blocks = result.blocks,
            reflagged = result.reflagged,
            refetched = result.refetched,
            "recovery finished"
        );
        Ok((result, branch_head))
    }

    /// Fetch the new branch `new_head → common_ancestor` (exclusive), oldest
    /// first.
    async fn collect_branch(&self, event: &ReorgEvent) -> Result<Vec<BlockHead>, RecoveryError> {
        let mut branch = Vec::new();
        let mut cursor = self.header_by_hash(&event.new_head.hash).await?;

        while cursor.number > event.common_ancestor.number {
            let parent_hash = cursor.parent_hash.clone();
            let at_fork_point = cursor.number == event.common_ancestor.number + 1;
            branch.push(cursor);

            if at_fork_point {
                if parent_hash != event.common_ancestor.hash {
                    // branch no longer attaches where detection said it did
                    return Err(RecoveryError::HeadMoved {
                        expected: event.common_ancestor.hash.clone(),
                        observed: parent_hash,
                    });
                }
                break;
            }
            cursor = self.header_by_hash(&parent_hash).await?;
        }

        branch.reverse();
        Ok(branch)
    }

    /// Abandon with `HeadMoved` unless the provider head still is, or still
    /// descends from, the branch head this recovery is replaying.
    async fn ensure_head_on_branch(&self, target: &BlockRef) -> Result<(), RecoveryError> {
        let observed = self.client.head().await?;
        if observed.hash == target.hash {
            return Ok(());
        }
        if observed.number <= target.number {
            return Err(RecoveryError::HeadMoved {
                expected: target.hash.clone(),
                observed: observed.hash,
            });
        }

        // the head may simply have grown on top of our branch — walk down to
        // the target height and compare
        let mut cursor = observed;
        let mut scanned = 0u64;
        while cursor.number > target.number {
            if scanned >= self.descent_scan_limit {
                return Err(RecoveryError::HeadMoved {
                    expected: target.hash.clone(),
                    observed: cursor.hash,
                });
            }
            cursor = self.header_by_hash(&cursor.parent_hash).await?;
            scanned += 1;
        }
        if cursor.hash == target.hash {
            Ok(())
        } else {
            Err(RecoveryError::HeadMoved {
                expected: target.hash.clone(),
                observed: cursor.hash,
            })
        }
    }

    async fn header_by_hash(&self, hash: &str) -> Result<BlockHead, RecoveryError> {
        let hash_owned = hash.to_string();
        fetch_with_retry(&self.retry, self.fetch_timeout, || {
            let client = self.client.clone();
            let hash = hash_owned.clone();
            async move {
                client
                    .block_by_hash(&hash)
                    .await?
                    .ok_or(ProviderError::BlockNotFound { reference: hash })
            }
        })
        .await
        .map_err(|e| RecoveryError::FetchExhausted {
            hash: hash.to_string(),
            attempts: e.attempts,
            source: e.last,
        })
    }
}
