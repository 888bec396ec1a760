//! SQLite ledger backend.
//!
//! Persists block rows, normalized records, and the reorg audit trail to a
//! single SQLite file. Uses `sqlx` with WAL mode for concurrent read
//! performance.
//!
//! # Usage
//! ```rust,no_run
//! use chainledger_storage::sqlite::SqliteLedger;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteLedger::open("./ledger.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteLedger::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainledger_core::error::StoreError;
use chainledger_core::normalize::{NormalizedRecord, RecordMeta, RecordPayload, RecordType};
use chainledger_core::reorg::ReorgEvent;
use chainledger_core::store::{BlockRecord, LedgerStore, QueryView};

/// SQLite-backed ledger store.
pub struct SqliteLedger {
    pool: SqlitePool,
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteLedger {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./ledger.db"`) or a full SQLite
    /// URL (`"sqlite:./ledger.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(backend)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database. All data is lost when the pool is
    /// dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(backend)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                chain       TEXT    NOT NULL,
                number      INTEGER NOT NULL,
                hash        TEXT    NOT NULL,
                parent_hash TEXT    NOT NULL,
                timestamp   INTEGER NOT NULL,
                canonical   INTEGER NOT NULL,
                PRIMARY KEY (chain, number, hash)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                chain          TEXT    NOT NULL,
                record_type    TEXT    NOT NULL,
                tx_hash        TEXT    NOT NULL,
                log_index      INTEGER NOT NULL,
                block_number   INTEGER NOT NULL,
                block_hash     TEXT    NOT NULL,
                canonical      INTEGER NOT NULL,
                ingest_version INTEGER NOT NULL,
                contract       TEXT    NOT NULL,
                wallet_a       TEXT,
                wallet_b       TEXT,
                payload        TEXT    NOT NULL,
                PRIMARY KEY (chain, record_type, tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reorg_events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chain       TEXT    NOT NULL,
                depth       INTEGER NOT NULL,
                detected_at INTEGER NOT NULL,
                payload     TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        // indexes for the flag-flip key and the downstream read patterns
        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_records_block ON records (chain, block_number, block_hash);",
            "CREATE INDEX IF NOT EXISTS idx_records_contract ON records (chain, contract);",
            "CREATE INDEX IF NOT EXISTS idx_records_wallets ON records (chain, wallet_a, wallet_b);",
            "CREATE INDEX IF NOT EXISTS idx_reorgs_chain_time ON reorg_events (chain, detected_at);",
        ] {
            sqlx::query(ddl).execute(&self.pool).await.map_err(backend)?;
        }

        Ok(())
    }
}

/// The wallet columns indexed for `records_by_wallet`.
fn wallet_columns(payload: &RecordPayload) -> (Option<&str>, Option<&str>) {
    match payload {
        RecordPayload::Transfer { from, to, .. } => (Some(from), Some(to)),
        RecordPayload::Approval { owner, spender, .. } => (Some(owner), Some(spender)),
        RecordPayload::Generic { .. } => (None, None),
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<NormalizedRecord, StoreError> {
    let payload_json: String = row.get("payload");
    let payload: RecordPayload = serde_json::from_str(&payload_json)?;
    Ok(NormalizedRecord {
        meta: RecordMeta {
            chain: row.get("chain"),
            tx_hash: row.get("tx_hash"),
            log_index: row.get::<i64, _>("log_index") as u32,
            block_number: row.get::<i64, _>("block_number") as u64,
            block_hash: row.get("block_hash"),
            canonical: row.get("canonical"),
            ingest_version: row.get::<i64, _>("ingest_version") as u32,
        },
        payload,
    })
}

const SELECT_RECORD: &str =
    "SELECT chain, tx_hash, log_index, block_number, block_hash, canonical,
            ingest_version, payload
     FROM records";

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn insert_block(&self, block: &BlockRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO blocks (chain, number, hash, parent_hash, timestamp, canonical)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&block.chain)
        .bind(block.number as i64)
        .bind(&block.hash)
        .bind(&block.parent_hash)
        .bind(block.timestamp)
        .bind(block.canonical)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_records(&self, records: &[NormalizedRecord]) -> Result<u64, StoreError> {
        let mut inserted = 0u64;
        for record in records {
            let payload = serde_json::to_string(&record.payload)?;
            let (wallet_a, wallet_b) = wallet_columns(&record.payload);

            let result = sqlx::query(
                "INSERT OR IGNORE INTO records
                 (chain, record_type, tx_hash, log_index, block_number, block_hash,
                  canonical, ingest_version, contract, wallet_a, wallet_b, payload)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.meta.chain)
            .bind(record.record_type().to_string())
            .bind(&record.meta.tx_hash)
            .bind(record.meta.log_index as i64)
            .bind(record.meta.block_number as i64)
            .bind(&record.meta.block_hash)
            .bind(record.meta.canonical)
            .bind(record.meta.ingest_version as i64)
            .bind(record.contract())
            .bind(wallet_a)
            .bind(wallet_b)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

            inserted += result.rows_affected();
        }

        if inserted > 0 {
            debug!(inserted, "records stored");
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
        let result = if record_type == RecordType::Block {
            sqlx::query(
                "UPDATE blocks SET canonical = ?
                 WHERE chain = ? AND number = ? AND hash = ? AND canonical != ?",
            )
            .bind(canonical)
            .bind(chain)
            .bind(block_number as i64)
            .bind(block_hash)
            .bind(canonical)
            .execute(&self.pool)
            .await
            .map_err(backend)?
        } else {
            sqlx::query(
                "UPDATE records SET canonical = ?
                 WHERE chain = ? AND record_type = ? AND block_number = ? AND block_hash = ?
                   AND canonical != ?",
            )
            .bind(canonical)
            .bind(chain)
            .bind(record_type.to_string())
            .bind(block_number as i64)
            .bind(block_hash)
            .bind(canonical)
            .execute(&self.pool)
            .await
            .map_err(backend)?
        };

        Ok(result.rows_affected())
    }

    async fn canonical_block(
        &self,
        chain: &str,
        number: u64,
    ) -> Result<Option<BlockRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT chain, number, hash, parent_hash, timestamp, canonical
             FROM blocks WHERE chain = ? AND number = ? AND canonical = 1",
        )
        .bind(chain)
        .bind(number as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(|r| BlockRecord {
            chain: r.get("chain"),
            number: r.get::<i64, _>("number") as u64,
            hash: r.get("hash"),
            parent_hash: r.get("parent_hash"),
            timestamp: r.get("timestamp"),
            canonical: r.get("canonical"),
        }))
    }

    async fn max_canonical_block(&self, chain: &str) -> Result<Option<BlockRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT chain, number, hash, parent_hash, timestamp, canonical
             FROM blocks WHERE chain = ? AND canonical = 1
             ORDER BY number DESC LIMIT 1",
        )
        .bind(chain)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(|r| BlockRecord {
            chain: r.get("chain"),
            number: r.get::<i64, _>("number") as u64,
            hash: r.get("hash"),
            parent_hash: r.get("parent_hash"),
            timestamp: r.get("timestamp"),
            canonical: r.get("canonical"),
        }))
    }

    async fn block_seen(
        &self,
        chain: &str,
        number: u64,
        hash: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM blocks WHERE chain = ? AND number = ? AND hash = ?",
        )
        .bind(chain)
        .bind(number as i64)
        .bind(hash)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.get::<i64, _>("cnt") > 0)
    }

    async fn records_by_type(
        &self,
        chain: &str,
        record_type: RecordType,
        view: QueryView,
    ) -> Result<Vec<NormalizedRecord>, StoreError> {
        let include_all = view == QueryView::IncludeNonCanonical;
        let rows = sqlx::query(&format!(
            "{SELECT_RECORD}
             WHERE chain = ? AND record_type = ? AND (canonical = 1 OR ? = 1)
             ORDER BY block_number, log_index",
        ))
        .bind(chain)
        .bind(record_type.to_string())
        .bind(include_all)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn records_by_contract(
        &self,
        chain: &str,
        contract: &str,
        view: QueryView,
    ) -> Result<Vec<NormalizedRecord>, StoreError> {
        let include_all = view == QueryView::IncludeNonCanonical;
        let rows = sqlx::query(&format!(
            "{SELECT_RECORD}
             WHERE chain = ? AND contract = ? AND (canonical = 1 OR ? = 1)
             ORDER BY block_number, log_index",
        ))
        .bind(chain)
        .bind(contract.to_ascii_lowercase())
        .bind(include_all)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn records_by_wallet(
        &self,
        chain: &str,
        wallet: &str,
        view: QueryView,
    ) -> Result<Vec<NormalizedRecord>, StoreError> {
        let wallet = wallet.to_ascii_lowercase();
        let include_all = view == QueryView::IncludeNonCanonical;
        let rows = sqlx::query(&format!(
            "{SELECT_RECORD}
             WHERE chain = ? AND (wallet_a = ? OR wallet_b = ?) AND (canonical = 1 OR ? = 1)
             ORDER BY block_number, log_index",
        ))
        .bind(chain)
        .bind(&wallet)
        .bind(&wallet)
        .bind(include_all)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn append_reorg_event(&self, event: &ReorgEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(event)?;
        sqlx::query(
            "INSERT INTO reorg_events (chain, depth, detected_at, payload)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&event.chain)
        .bind(event.depth as i64)
        .bind(event.detected_at)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        debug!(chain = %event.chain, depth = event.depth, "reorg event appended");
        Ok(())
    }

    async fn reorg_events(
        &self,
        chain: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<ReorgEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT payload FROM reorg_events
             WHERE chain = ? AND detected_at >= ? AND detected_at <= ?
             ORDER BY detected_at, id",
        )
        .bind(chain)
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|r| {
                let payload: String = r.get("payload");
                serde_json::from_str(&payload).map_err(StoreError::from)
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chainledger_core::types::BlockRef;
    use serde_json::json;

    fn block(number: u64, hash: &str, canonical: bool) -> BlockRecord {
        BlockRecord {
            chain: "ethereum".into(),
            number,
            hash: hash.into(),
            parent_hash: format!("0x{}", number.saturating_sub(1)),
            timestamp: (number * 12) as i64,
            canonical,
        }
    }

    fn transfer(tx: &str, block_number: u64, block_hash: &str) -> NormalizedRecord {
        NormalizedRecord {
            meta: RecordMeta {
                chain: "ethereum".into(),
                tx_hash: tx.into(),
                log_index: 0,
                block_number,
                block_hash: block_hash.into(),
                canonical: true,
                ingest_version: 1,
            },
            payload: RecordPayload::Transfer {
                contract: "0xdac17f958d2ee523a2206206994597c13d831ec7".into(),
                from: "0x1111111111111111111111111111111111111111".into(),
                to: "0x2222222222222222222222222222222222222222".into(),
                amount: "1".into(),
            },
        }
    }

    #[tokio::test]
    async fn block_insert_and_dedupe() {
        let store = SqliteLedger::in_memory().await.unwrap();
        assert!(store.insert_block(&block(100, "0xa", true)).await.unwrap());
        assert!(!store.insert_block(&block(100, "0xa", true)).await.unwrap());

        let max = store.max_canonical_block("ethereum").await.unwrap().unwrap();
        assert_eq!(max.number, 100);
        assert!(store.block_seen("ethereum", 100, "0xa").await.unwrap());
        assert!(!store.block_seen("ethereum", 100, "0xz").await.unwrap());
    }

    #[tokio::test]
    async fn record_insert_dedupe_and_flag_flip() {
        let store = SqliteLedger::in_memory().await.unwrap();
        let record = transfer("0xt1", 100, "0xb100");

        assert_eq!(store.insert_records(&[record.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_records(&[record]).await.unwrap(), 0);

        let changed = store
            .set_canonical("ethereum", RecordType::Transfer, 100, "0xb100", false)
            .await
            .unwrap();
        assert_eq!(changed, 1);

        // idempotent
        let changed = store
            .set_canonical("ethereum", RecordType::Transfer, 100, "0xb100", false)
            .await
            .unwrap();
        assert_eq!(changed, 0);

        let canonical = store
            .records_by_type("ethereum", RecordType::Transfer, QueryView::CanonicalOnly)
            .await
            .unwrap();
        assert!(canonical.is_empty());

        let all = store
            .records_by_type("ethereum", RecordType::Transfer, QueryView::IncludeNonCanonical)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].meta.canonical);
    }

    #[tokio::test]
    async fn block_flag_flip_via_record_type() {
        let store = SqliteLedger::in_memory().await.unwrap();
        store.insert_block(&block(100, "0xa", true)).await.unwrap();

        let changed = store
            .set_canonical("ethereum", RecordType::Block, 100, "0xa", false)
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert!(store.canonical_block("ethereum", 100).await.unwrap().is_none());
        // the row itself is retained
        assert!(store.block_seen("ethereum", 100, "0xa").await.unwrap());
    }

    #[tokio::test]
    async fn wallet_and_contract_queries() {
        let store = SqliteLedger::in_memory().await.unwrap();
        store
            .insert_records(&[transfer("0xt1", 100, "0xb100")])
            .await
            .unwrap();

        let by_wallet = store
            .records_by_wallet(
                "ethereum",
                "0x2222222222222222222222222222222222222222",
                QueryView::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_wallet.len(), 1);

        let by_contract = store
            .records_by_contract(
                "ethereum",
                "0xDAC17F958D2EE523A2206206994597C13D831EC7",
                QueryView::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_contract.len(), 1);

        let none = store
            .records_by_wallet(
                "ethereum",
                "0x3333333333333333333333333333333333333333",
                QueryView::default(),
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn generic_payload_roundtrip() {
        let store = SqliteLedger::in_memory().await.unwrap();
        let record = NormalizedRecord {
            meta: RecordMeta {
                chain: "ethereum".into(),
                tx_hash: "0xt9".into(),
                log_index: 4,
                block_number: 100,
                block_hash: "0xb100".into(),
                canonical: true,
                ingest_version: 2,
            },
            payload: RecordPayload::Generic {
                contract: "0x9999999999999999999999999999999999999999".into(),
                event_name: "Unknown".into(),
                args: json!({"topics": ["0xfeed"], "data": "0xdead", "reason": "missing_abi"}),
            },
        };
        store.insert_records(&[record.clone()]).await.unwrap();

        let loaded = store
            .records_by_type("ethereum", RecordType::Generic, QueryView::default())
            .await
            .unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[tokio::test]
    async fn chains_are_isolated() {
        let store = SqliteLedger::in_memory().await.unwrap();
        store.insert_block(&block(100, "0xe", true)).await.unwrap();
        let mut polygon = block(100, "0xp", true);
        polygon.chain = "polygon".into();
        store.insert_block(&polygon).await.unwrap();

        store
            .set_canonical("ethereum", RecordType::Block, 100, "0xe", false)
            .await
            .unwrap();

        assert!(store.canonical_block("ethereum", 100).await.unwrap().is_none());
        assert!(store.canonical_block("polygon", 100).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn audit_trail_roundtrip() {
        let store = SqliteLedger::in_memory().await.unwrap();
        let event = ReorgEvent {
            chain: "ethereum".into(),
            depth: 3,
            old_head: BlockRef { number: 100, hash: "0xc".into() },
            new_head: BlockRef { number: 101, hash: "0xd".into() },
            common_ancestor: BlockRef { number: 97, hash: "0xa".into() },
            affected_blocks: vec![
                BlockRef { number: 98, hash: "0xb1".into() },
                BlockRef { number: 99, hash: "0xb2".into() },
                BlockRef { number: 100, hash: "0xc".into() },
            ],
            detected_at: 1_700_000_000,
        };
        store.append_reorg_event(&event).await.unwrap();

        let found = store
            .reorg_events("ethereum", 1_600_000_000, 1_800_000_000)
            .await
            .unwrap();
        assert_eq!(found, vec![event]);

        assert!(store.reorg_events("polygon", 0, i64::MAX).await.unwrap().is_empty());
    }
}
