//! In-memory ledger backend.
//!
//! Holds block rows, normalized records, and the reorg audit trail in RAM.
//! Useful for tests and short-lived pipelines that don't need persistence.

use async_trait::async_trait;
use std::sync::Mutex;

use chainledger_core::error::StoreError;
use chainledger_core::normalize::{NormalizedRecord, RecordType};
use chainledger_core::reorg::ReorgEvent;
use chainledger_core::store::{BlockRecord, LedgerStore, QueryView};

#[derive(Default)]
struct Inner {
    blocks: Vec<BlockRecord>,
    records: Vec<NormalizedRecord>,
    reorgs: Vec<ReorgEvent>,
}

/// In-memory ledger store. All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records, canonical or not.
    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    /// Total number of stored block rows, canonical or not.
    pub fn block_count(&self) -> usize {
        self.inner.lock().unwrap().blocks.len()
    }
}

fn sort_records(mut records: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
    records.sort_by_key(|r| (r.meta.block_number, r.meta.log_index));
    records
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn insert_block(&self, block: &BlockRecord) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let exists = inner.blocks.iter().any(|b| {
            b.chain == block.chain && b.number == block.number && b.hash == block.hash
        });
        if exists {
            return Ok(false);
        }
        inner.blocks.push(block.clone());
        Ok(true)
    }

    async fn insert_records(&self, records: &[NormalizedRecord]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut inserted = 0u64;
        for record in records {
            let exists = inner.records.iter().any(|r| {
                r.record_type() == record.record_type()
                    && r.meta.chain == record.meta.chain
                    && r.meta.tx_hash == record.meta.tx_hash
                    && r.meta.log_index == record.meta.log_index
            });
            if !exists {
                inner.records.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn set_canonical(
        &self,
        chain: &str,
        record_type: RecordType,
        block_number: u64,
        block_hash: &str,
        canonical: bool,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut changed = 0u64;

        if record_type == RecordType::Block {
            for block in inner.blocks.iter_mut().filter(|b| {
                b.chain == chain
                    && b.number == block_number
                    && b.hash == block_hash
                    && b.canonical != canonical
            }) {
                block.canonical = canonical;
                changed += 1;
            }
            return Ok(changed);
        }

        for record in inner.records.iter_mut().filter(|r| {
            r.record_type() == record_type
                && r.meta.chain == chain
                && r.meta.block_number == block_number
                && r.meta.block_hash == block_hash
                && r.meta.canonical != canonical
        }) {
            record.meta.canonical = canonical;
            changed += 1;
        }
        Ok(changed)
    }

    async fn canonical_block(
        &self,
        chain: &str,
        number: u64,
    ) -> Result<Option<BlockRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .blocks
            .iter()
            .find(|b| b.chain == chain && b.number == number && b.canonical)
            .cloned())
    }

    async fn max_canonical_block(&self, chain: &str) -> Result<Option<BlockRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .blocks
            .iter()
            .filter(|b| b.chain == chain && b.canonical)
            .max_by_key(|b| b.number)
            .cloned())
    }

    async fn block_seen(
        &self,
        chain: &str,
        number: u64,
        hash: &str,
    ) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .blocks
            .iter()
            .any(|b| b.chain == chain && b.number == number && b.hash == hash))
    }

    async fn records_by_type(
        &self,
        chain: &str,
        record_type: RecordType,
        view: QueryView,
    ) -> Result<Vec<NormalizedRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(sort_records(
            inner
                .records
                .iter()
                .filter(|r| {
                    r.record_type() == record_type
                        && r.meta.chain == chain
                        && view.admits(r.meta.canonical)
                })
                .cloned()
                .collect(),
        ))
    }

    async fn records_by_contract(
        &self,
        chain: &str,
        contract: &str,
        view: QueryView,
    ) -> Result<Vec<NormalizedRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(sort_records(
            inner
                .records
                .iter()
                .filter(|r| {
                    r.meta.chain == chain
                        && r.contract().eq_ignore_ascii_case(contract)
                        && view.admits(r.meta.canonical)
                })
                .cloned()
                .collect(),
        ))
    }

    async fn records_by_wallet(
        &self,
        chain: &str,
        wallet: &str,
        view: QueryView,
    ) -> Result<Vec<NormalizedRecord>, StoreError> {
        let wallet = wallet.to_ascii_lowercase();
        let inner = self.inner.lock().unwrap();
        Ok(sort_records(
            inner
                .records
                .iter()
                .filter(|r| {
                    r.meta.chain == chain
                        && r.touches_wallet(&wallet)
                        && view.admits(r.meta.canonical)
                })
                .cloned()
                .collect(),
        ))
    }

    async fn append_reorg_event(&self, event: &ReorgEvent) -> Result<(), StoreError> {
        self.inner.lock().unwrap().reorgs.push(event.clone());
        Ok(())
    }

    async fn reorg_events(
        &self,
        chain: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<ReorgEvent>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut events: Vec<ReorgEvent> = inner
            .reorgs
            .iter()
            .filter(|e| e.chain == chain && e.detected_at >= from_ts && e.detected_at <= to_ts)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.detected_at);
        Ok(events)
    }
}
