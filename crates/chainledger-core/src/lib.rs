//! chainledger-core — log decoding and the reorg-safe canonical ledger.
//!
//! # Architecture
//!
//! ```text
//! RawLog ─→ EventDecoder ─→ Normalizer ─→ LedgerStore (canonical = true)
//!               │
//!          AbiRegistry (versioned, cached)
//!
//! ReorgManager (one per chain)
//!     ├── ReorgDetector   (head tracking, bounded ancestor walk)
//!     ├── RollbackEngine  (demote orphaned rows, per record type)
//!     ├── RecoveryEngine  (replay the new branch, idempotent)
//!     └── CanonicalFlags  (sole authority for canonical flag flips)
//! ```

pub mod abi;
pub mod canonical;
pub mod decode;
pub mod error;
pub mod ingest;
pub mod manager;
pub mod normalize;
pub mod provider;
pub mod recovery;
pub mod reorg;
pub mod rollback;
pub mod store;
pub mod types;
pub mod value;

pub use abi::{AbiRegistry, ContractAbi};
pub use canonical::CanonicalFlags;
pub use decode::{BatchSummary, DecodeFailure, DecodeOutcome, DecodedEvent, EventDecoder, UnknownEvent};
pub use error::{
    ManagerError, ProviderError, RecoveryError, RegistryError, ReorgError, StoreError,
    ValidationError,
};
pub use ingest::{IngestSummary, Ingestor};
pub use manager::{ChainState, CycleOutcome, ReorgManager};
pub use normalize::{NormalizedRecord, Normalizer, RecordMeta, RecordPayload, RecordType};
pub use provider::{ChainClient, RetryConfig, RetryPolicy};
pub use recovery::{RecoveryEngine, RecoveryResult};
pub use reorg::{HeadCheck, ReorgDetector, ReorgEvent};
pub use rollback::{RollbackEngine, RollbackResult};
pub use store::{BlockRecord, LedgerStore, QueryView};
pub use types::{BlockHead, BlockRef, LedgerConfig, RawLog};
