//! Data normalizer — decoded events to canonical typed records.
//!
//! Known event names get a strict shape check (address format, non-negative
//! integer amounts, required fields). Unknown-but-decoded events pass through
//! as generic records, and undecodable logs are preserved as generic
//! `"Unknown"` records with their raw payload — the ledger never drops
//! information it managed to parse or fetch.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    decode::{DecodedEvent, UnknownEvent},
    error::ValidationError,
    value::ArgValue,
};

// ─── Record model ─────────────────────────────────────────────────────────────

/// The materialized record marts of the ledger.
///
/// Every type is demoted/promoted independently during reorg handling, so
/// adding a mart here automatically enrolls it in rollback and recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Block,
    Transfer,
    Approval,
    Generic,
}

impl RecordType {
    /// All record types, in rollback processing order.
    pub const ALL: [RecordType; 4] = [
        RecordType::Block,
        RecordType::Transfer,
        RecordType::Approval,
        RecordType::Generic,
    ];
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Block => "block",
            Self::Transfer => "transfer",
            Self::Approval => "approval",
            Self::Generic => "generic",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Self::Block),
            "transfer" => Ok(Self::Transfer),
            "approval" => Ok(Self::Approval),
            "generic" => Ok(Self::Generic),
            other => Err(format!("unknown record type: {other}")),
        }
    }
}

/// Fields shared by every log-derived record.
///
/// `canonical` and `block_hash` are mutated only through the canonical flag
/// manager; everything else is immutable once written. `(chain, tx_hash,
/// log_index)` is unique per record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub chain: String,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub block_hash: String,
    pub canonical: bool,
    pub ingest_version: u32,
}

/// Type-specific payload of a normalized record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Transfer {
        contract: String,
        from: String,
        to: String,
        amount: String,
    },
    Approval {
        contract: String,
        owner: String,
        spender: String,
        amount: String,
    },
    Generic {
        contract: String,
        event_name: String,
        args: Value,
    },
}

/// A schema-validated, canonically-flagged ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub meta: RecordMeta,
    pub payload: RecordPayload,
}

impl NormalizedRecord {
    pub fn record_type(&self) -> RecordType {
        match self.payload {
            RecordPayload::Transfer { .. } => RecordType::Transfer,
            RecordPayload::Approval { .. } => RecordType::Approval,
            RecordPayload::Generic { .. } => RecordType::Generic,
        }
    }

    /// The emitting contract address.
    pub fn contract(&self) -> &str {
        match &self.payload {
            RecordPayload::Transfer { contract, .. }
            | RecordPayload::Approval { contract, .. }
            | RecordPayload::Generic { contract, .. } => contract,
        }
    }

    /// Returns `true` if `wallet` participates in this record (sender,
    /// recipient, owner, or spender).
    pub fn touches_wallet(&self, wallet: &str) -> bool {
        match &self.payload {
            RecordPayload::Transfer { from, to, .. } => from == wallet || to == wallet,
            RecordPayload::Approval { owner, spender, .. } => {
                owner == wallet || spender == wallet
            }
            RecordPayload::Generic { .. } => false,
        }
    }
}

// ─── Normalizer ───────────────────────────────────────────────────────────────

/// Validates decoded events and shapes them into [`NormalizedRecord`]s.
#[derive(Debug, Clone)]
pub struct Normalizer {
    ingest_version: u32,
}

impl Normalizer {
    pub fn new(ingest_version: u32) -> Self {
        Self { ingest_version }
    }

    /// Normalize a decoded event.
    ///
    /// Records are created optimistically canonical; a later rollback may
    /// demote them.
    pub fn normalize(&self, event: &DecodedEvent) -> Result<NormalizedRecord, ValidationError> {
        let payload = match event.event_name.as_str() {
            "Transfer" => RecordPayload::Transfer {
                contract: event.contract.clone(),
                from: self.require_address(event, "from")?,
                to: self.require_address(event, "to")?,
                amount: self.require_amount(event, "value")?,
            },
            "Approval" => RecordPayload::Approval {
                contract: event.contract.clone(),
                owner: self.require_address(event, "owner")?,
                spender: self.require_address(event, "spender")?,
                amount: self.require_amount(event, "value")?,
            },
            // decoded but unschematized — keep everything we parsed
            _ => RecordPayload::Generic {
                contract: event.contract.clone(),
                event_name: event.event_name.clone(),
                args: args_to_json(&event.args),
            },
        };

        Ok(NormalizedRecord {
            meta: RecordMeta {
                chain: event.chain.clone(),
                tx_hash: event.tx_hash.clone(),
                log_index: event.log_index,
                block_number: event.block_number,
                block_hash: event.block_hash.clone(),
                canonical: true,
                ingest_version: self.ingest_version,
            },
            payload,
        })
    }

    /// Preserve an undecodable log as a generic `"Unknown"` record.
    pub fn raw_record(&self, event: &UnknownEvent) -> NormalizedRecord {
        NormalizedRecord {
            meta: RecordMeta {
                chain: event.chain.clone(),
                tx_hash: event.tx_hash.clone(),
                log_index: event.log_index,
                block_number: event.block_number,
                block_hash: event.block_hash.clone(),
                canonical: true,
                ingest_version: self.ingest_version,
            },
            payload: RecordPayload::Generic {
                contract: event.contract.clone(),
                event_name: "Unknown".into(),
                args: json!({
                    "topics": event.topics,
                    "data": format!("0x{}", hex::encode(&event.data)),
                    "reason": event.reason.to_string(),
                }),
            },
        }
    }

    fn require_address(
        &self,
        event: &DecodedEvent,
        field: &str,
    ) -> Result<String, ValidationError> {
        let value = event.arg(field).ok_or_else(|| ValidationError::MissingField {
            event: event.event_name.clone(),
            field: field.to_string(),
        })?;
        match value {
            ArgValue::Address(addr) if is_address(addr) => Ok(addr.clone()),
            other => Err(ValidationError::InvalidAddress {
                event: event.event_name.clone(),
                field: field.to_string(),
                value: format!("{other:?}"),
            }),
        }
    }

    fn require_amount(
        &self,
        event: &DecodedEvent,
        field: &str,
    ) -> Result<String, ValidationError> {
        let value = event.arg(field).ok_or_else(|| ValidationError::MissingField {
            event: event.event_name.clone(),
            field: field.to_string(),
        })?;
        match value {
            ArgValue::Uint(amount) if is_amount(amount) => Ok(amount.clone()),
            other => Err(ValidationError::InvalidAmount {
                event: event.event_name.clone(),
                field: field.to_string(),
                value: format!("{other:?}"),
            }),
        }
    }
}

fn args_to_json(args: &[(String, ArgValue)]) -> Value {
    let mut map = Map::with_capacity(args.len());
    for (name, value) in args {
        map.insert(name.clone(), value.to_json());
    }
    Value::Object(map)
}

/// `0x` + 40 lowercase hex chars.
fn is_address(s: &str) -> bool {
    let Some(hex_part) = s.strip_prefix("0x") else {
        return false;
    };
    hex_part.len() == 40
        && hex_part
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// A non-empty string of decimal digits (no sign, no decimal point).
fn is_amount(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
