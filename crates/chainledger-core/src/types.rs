//! Shared types for the decode/canonicalize pipeline.

use serde::{Deserialize, Serialize};

use crate::provider::RetryConfig;

// ─── BlockHead ────────────────────────────────────────────────────────────────

/// A block header as observed from the ingestion provider — enough to track
/// chain heads and verify parent-hash descent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHead {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl BlockHead {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockHead) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }

    /// The `(number, hash)` reference of this header.
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            number: self.number,
            hash: self.hash.clone(),
        }
    }
}

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// A `(number, hash)` pair identifying one block on one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: String,
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.number, self.hash)
    }
}

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// A raw, undecoded contract log as delivered by the ingestion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    /// Contract address that emitted the log (`0x…`).
    pub address: String,
    /// EVM topics; `topics[0]` is the event signature hash, the rest are
    /// indexed parameters (each a 32-byte hex string).
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed parameters.
    pub data: Vec<u8>,
    /// Block number the log was emitted in.
    pub block_number: u64,
    /// Hash of that block.
    pub block_hash: String,
    /// Transaction hash.
    pub tx_hash: String,
    /// Log index within the block.
    pub log_index: u32,
}

impl RawLog {
    /// Returns `topics[0]` — the event signature hash — if present.
    pub fn signature_topic(&self) -> Option<&str> {
        self.topics.first().map(|s| s.as_str())
    }
}

// ─── LedgerConfig ─────────────────────────────────────────────────────────────

/// Configuration for one chain's ledger pipeline.
///
/// The reorg-depth and polling numbers are deployment policy (they depend on
/// the chain's block time); the defaults here suit Ethereum-like chains.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Chain slug (e.g. `"ethereum"`).
    pub chain: String,
    /// Head polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum reorg depth searched below the last known head before the
    /// ancestor walk gives up with `AncestorNotFound`.
    pub max_reorg_depth: u64,
    /// Maximum parent-hash hops when bringing a new head down to the last
    /// known height (bounds the descent check on large head jumps).
    pub descent_scan_limit: u64,
    /// Timeout for a single provider fetch during recovery, milliseconds.
    pub fetch_timeout_ms: u64,
    /// Retry policy for provider fetches during recovery.
    pub retry: RetryConfig,
    /// Version tag stamped on every record written by this process.
    pub ingest_version: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            chain: "ethereum".into(),
            poll_interval_ms: 2000,
            max_reorg_depth: 64,
            descent_scan_limit: 4096,
            fetch_timeout_ms: 10_000,
            retry: RetryConfig::default(),
            ingest_version: 1,
        }
    }
}

impl LedgerConfig {
    pub fn builder() -> LedgerConfigBuilder {
        LedgerConfigBuilder::default()
    }
}

/// Fluent builder for [`LedgerConfig`].
#[derive(Default)]
pub struct LedgerConfigBuilder {
    config: LedgerConfig,
}

impl LedgerConfigBuilder {
    /// Set the chain slug.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set the head polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the maximum tolerated reorg depth.
    pub fn max_reorg_depth(mut self, depth: u64) -> Self {
        self.config.max_reorg_depth = depth;
        self
    }

    /// Set the descent scan limit for large head jumps.
    pub fn descent_scan_limit(mut self, limit: u64) -> Self {
        self.config.descent_scan_limit = limit;
        self
    }

    /// Set the per-fetch timeout used during recovery.
    pub fn fetch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fetch_timeout_ms = ms;
        self
    }

    /// Set the provider retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the ingest version stamped on new records.
    pub fn ingest_version(mut self, version: u32) -> Self {
        self.config.ingest_version = version;
        self
    }

    pub fn build(self) -> LedgerConfig {
        self.config
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn head(number: u64, hash: &str, parent: &str) -> BlockHead {
        BlockHead {
            number,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: (number * 12) as i64,
        }
    }

    #[test]
    fn head_extends_parent() {
        let parent = head(100, "0xaaa", "0x000");
        let child = head(101, "0xbbb", "0xaaa");
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
    }

    #[test]
    fn head_extends_false_on_gap() {
        let a = head(100, "0xaaa", "0x000");
        let b = head(102, "0xccc", "0xaaa"); // gap
        assert!(!b.extends(&a));
    }

    #[test]
    fn config_builder() {
        let cfg = LedgerConfig::builder()
            .chain("polygon")
            .poll_interval_ms(500)
            .max_reorg_depth(128)
            .ingest_version(3)
            .build();

        assert_eq!(cfg.chain, "polygon");
        assert_eq!(cfg.poll_interval_ms, 500);
        assert_eq!(cfg.max_reorg_depth, 128);
        assert_eq!(cfg.ingest_version, 3);
        // untouched fields keep defaults
        assert_eq!(cfg.descent_scan_limit, 4096);
    }
}
