//! Reorg detector — tracks the last known head per chain and classifies every
//! newly observed head as unchanged, a normal advance, or a fork.
//!
//! The fork search is an explicit bounded loop, never recursion: the new
//! branch is walked by parent hash through the provider while the old branch
//! is read from the ledger's canonical rows, and exceeding the configured
//! depth is a first-class `AncestorNotFound` outcome rather than a crash.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    error::{ProviderError, ReorgError},
    provider::ChainClient,
    store::LedgerStore,
    types::{BlockHead, BlockRef, LedgerConfig},
};

/// Immutable audit record of one detected fork. Created once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorgEvent {
    pub chain: String,
    /// Number of old-branch blocks orphaned (`old_head.number - common_ancestor.number`).
    pub depth: u64,
    pub old_head: BlockRef,
    pub new_head: BlockRef,
    pub common_ancestor: BlockRef,
    /// Old-branch blocks strictly above the common ancestor, oldest first.
    pub affected_blocks: Vec<BlockRef>,
    /// Unix timestamp of detection.
    pub detected_at: i64,
}

/// Outcome of one head poll.
#[derive(Debug, Clone)]
pub enum HeadCheck {
    /// Head hash unchanged since the last poll.
    Unchanged,
    /// The new head descends from the last known head (or the detector had
    /// no baseline yet); the tracked head was updated.
    Advanced,
    /// The new head is on a different branch.
    Reorg(ReorgEvent),
}

/// Per-chain reorg detector.
///
/// Owns the chain's last observed head; `check_head` is the only mutation
/// path during polling, and the manager advances the head explicitly after a
/// successful recovery.
pub struct ReorgDetector {
    chain: String,
    max_reorg_depth: u64,
    descent_scan_limit: u64,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn LedgerStore>,
    last_head: Option<BlockHead>,
}

impl ReorgDetector {
    pub fn new(
        config: &LedgerConfig,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            chain: config.chain.clone(),
            max_reorg_depth: config.max_reorg_depth,
            descent_scan_limit: config.descent_scan_limit,
            client,
            store,
            last_head: None,
        }
    }

    /// Seed the tracked head from the ledger's highest canonical block.
    ///
    /// With an empty ledger the detector has nothing to compare against, so
    /// the first polled head is adopted as the baseline instead.
    pub async fn init_from_ledger(&mut self) -> Result<(), ReorgError> {
        self.last_head = self
            .store
            .max_canonical_block(&self.chain)
            .await?
            .map(|b| b.head());
        if let Some(head) = &self.last_head {
            tracing::info!(chain = %self.chain, number = head.number, hash = %head.hash, "head seeded from ledger");
        }
        Ok(())
    }

    /// The last known head, if any.
    pub fn last_head(&self) -> Option<&BlockHead> {
        self.last_head.as_ref()
    }

    /// Move the tracked head forward (called after a recovery completes, so
    /// the next poll compares against the recovered branch).
    pub fn advance_to(&mut self, head: BlockHead) {
        self.last_head = Some(head);
    }

    /// Poll the provider head and classify it against the tracked head.
    pub async fn check_head(&mut self) -> Result<HeadCheck, ReorgError> {
        let new_head = self.client.head().await?;

        let last = match &self.last_head {
            Some(last) => last.clone(),
            None => {
                tracing::info!(
                    chain = %self.chain,
                    number = new_head.number,
                    hash = %new_head.hash,
                    "no prior head, adopting baseline"
                );
                self.last_head = Some(new_head);
                return Ok(HeadCheck::Advanced);
            }
        };

        if new_head.hash == last.hash {
            return Ok(HeadCheck::Unchanged);
        }
        if new_head.extends(&last) {
            self.last_head = Some(new_head);
            return Ok(HeadCheck::Advanced);
        }

        let ancestor = self.find_common_ancestor(&new_head, &last).await?;

        if ancestor.number == new_head.number && ancestor.hash == new_head.hash {
            // the polled head is itself canonical in our ledger: a lagging
            // provider serving an old head, not a fork
            tracing::debug!(chain = %self.chain, number = new_head.number, "delayed head, keeping current view");
            return Ok(HeadCheck::Unchanged);
        }

        if ancestor.number == last.number && ancestor.hash == last.hash {
            // the old head is an ancestor of the new one: a multi-block
            // advance, not a fork
            self.last_head = Some(new_head);
            return Ok(HeadCheck::Advanced);
        }

        let affected = self.old_branch_refs(&ancestor, &last).await?;
        let event = ReorgEvent {
            chain: self.chain.clone(),
            depth: last.number - ancestor.number,
            old_head: last.block_ref(),
            new_head: new_head.block_ref(),
            common_ancestor: ancestor,
            affected_blocks: affected,
            detected_at: chrono::Utc::now().timestamp(),
        };
        tracing::warn!(
            chain = %self.chain,
            depth = event.depth,
            old_head = %event.old_head,
            new_head = %event.new_head,
            ancestor = %event.common_ancestor,
            "reorg detected"
        );
        Ok(HeadCheck::Reorg(event))
    }

    /// Walk backward from `new_head` until a block matches the ledger's
    /// canonical row at the same height.
    ///
    /// Two bounds apply: `descent_scan_limit` caps the hops spent bringing
    /// the new head down to the old height, and `max_reorg_depth` caps the
    /// search below it. Exceeding either is `AncestorNotFound`.
    async fn find_common_ancestor(
        &self,
        new_head: &BlockHead,
        last: &BlockHead,
    ) -> Result<BlockRef, ReorgError> {
        let mut cursor = new_head.clone();

        // equalize heights first
        let mut scanned = 0u64;
        while cursor.number > last.number {
            if scanned >= self.descent_scan_limit {
                return Err(ReorgError::AncestorNotFound {
                    chain: self.chain.clone(),
                    max_depth: self.descent_scan_limit,
                });
            }
            cursor = self.parent_of(&cursor).await?;
            scanned += 1;
        }

        // then step both branches down together, comparing per height
        let mut depth = 0u64;
        loop {
            if depth > self.max_reorg_depth {
                return Err(ReorgError::AncestorNotFound {
                    chain: self.chain.clone(),
                    max_depth: self.max_reorg_depth,
                });
            }
            if let Some(stored) = self.store.canonical_block(&self.chain, cursor.number).await? {
                if stored.hash == cursor.hash {
                    return Ok(BlockRef {
                        number: cursor.number,
                        hash: cursor.hash,
                    });
                }
            }
            if cursor.number == 0 {
                return Err(ReorgError::AncestorNotFound {
                    chain: self.chain.clone(),
                    max_depth: self.max_reorg_depth,
                });
            }
            cursor = self.parent_of(&cursor).await?;
            depth += 1;
        }
    }

    /// The orphaned old-branch rows strictly above `ancestor`, oldest first.
    async fn old_branch_refs(
        &self,
        ancestor: &BlockRef,
        old_head: &BlockHead,
    ) -> Result<Vec<BlockRef>, ReorgError> {
        let mut refs = Vec::new();
        for number in (ancestor.number + 1)..=old_head.number {
            if let Some(block) = self.store.canonical_block(&self.chain, number).await? {
                refs.push(BlockRef {
                    number,
                    hash: block.hash,
                });
            }
        }
        Ok(refs)
    }

    async fn parent_of(&self, head: &BlockHead) -> Result<BlockHead, ReorgError> {
        self.client
            .block_by_hash(&head.parent_hash)
            .await?
            .ok_or_else(|| {
                ProviderError::BlockNotFound {
                    reference: head.parent_hash.clone(),
                }
                .into()
            })
    }
}
