//! chainledger-storage — pluggable ledger backends.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement `chainledger_core::store::LedgerStore`; the engines in
//! `chainledger-core` never see anything else.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryLedger;
