//! Ingestor — decode→normalize→store for one block of logs.
//!
//! Used on the normal ingest path and by recovery when a new-branch block has
//! to be re-fetched. Records are written optimistically canonical; the store
//! contract deduplicates on `(chain, record_type, tx_hash, log_index)`, so
//! replaying a block is harmless.

use std::sync::Arc;

use crate::{
    abi::AbiRegistry,
    decode::{DecodeOutcome, EventDecoder},
    error::StoreError,
    normalize::Normalizer,
    store::{BlockRecord, LedgerStore},
    types::{BlockHead, RawLog},
};

/// Counts from ingesting one block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    /// Logs decoded against a registered ABI.
    pub decoded: usize,
    /// Logs preserved as raw `"Unknown"` records.
    pub undecoded: usize,
    /// Decoded events rejected by the normalizer's shape check.
    pub rejected: usize,
    /// Records newly written to the ledger.
    pub stored: u64,
}

/// One chain's decode→normalize→store pipeline.
#[derive(Clone)]
pub struct Ingestor {
    chain: String,
    decoder: EventDecoder,
    normalizer: Normalizer,
    store: Arc<dyn LedgerStore>,
}

impl Ingestor {
    pub fn new(
        chain: impl Into<String>,
        registry: AbiRegistry,
        store: Arc<dyn LedgerStore>,
        ingest_version: u32,
    ) -> Self {
        let chain = chain.into();
        Self {
            decoder: EventDecoder::new(chain.clone(), registry),
            normalizer: Normalizer::new(ingest_version),
            store,
            chain,
        }
    }

    /// Ingest one block's logs as canonical rows.
    ///
    /// Decode and validation failures are local: failed logs become raw
    /// records, rejected events are logged and dropped, and the rest of the
    /// block is stored regardless.
    pub async fn ingest_block(
        &self,
        head: &BlockHead,
        logs: &[RawLog],
    ) -> Result<IngestSummary, StoreError> {
        self.store
            .insert_block(&BlockRecord::from_head(&self.chain, head, true))
            .await?;

        let (outcomes, batch) = self.decoder.decode_batch(logs);

        let mut records = Vec::with_capacity(outcomes.len());
        let mut rejected = 0usize;
        for outcome in outcomes {
            match outcome {
                DecodeOutcome::Decoded(event) => match self.normalizer.normalize(&event) {
                    Ok(record) => records.push(record),
                    Err(error) => {
                        tracing::warn!(
                            chain = %self.chain,
                            tx_hash = %event.tx_hash,
                            log_index = event.log_index,
                            error = %error,
                            "record rejected by shape check"
                        );
                        rejected += 1;
                    }
                },
                DecodeOutcome::Undecoded(unknown) => {
                    records.push(self.normalizer.raw_record(&unknown));
                }
            }
        }

        let stored = self.store.insert_records(&records).await?;
        let summary = IngestSummary {
            decoded: batch.decoded,
            undecoded: batch.failed,
            rejected,
            stored,
        };
        tracing::info!(
            chain = %self.chain,
            block = head.number,
            hash = %head.hash,
            decoded = summary.decoded,
            undecoded = summary.undecoded,
            rejected = summary.rejected,
            stored = summary.stored,
            "block ingested"
        );
        Ok(summary)
    }
}
