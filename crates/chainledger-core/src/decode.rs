//! Event decoder — raw logs to typed events via the ABI registry.
//!
//! Decoding never aborts a batch: a log that cannot be decoded is returned as
//! an [`UnknownEvent`] with its topics and data preserved verbatim, tagged
//! with the failure reason. On-chain data is heterogeneous; the pipeline keeps
//! what it cannot interpret.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_json_abi::{EventParam, Param};
use alloy_primitives::B256;
use rayon::prelude::*;

use crate::{
    abi::AbiRegistry,
    types::RawLog,
    value::{from_sol_value, ArgValue},
};

// ─── Outcomes ─────────────────────────────────────────────────────────────────

/// Why a log could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeFailure {
    /// No registered ABI covers `(contract, block)`.
    MissingAbi,
    /// An ABI was resolved but the log does not parse against it.
    ParseError(String),
}

impl std::fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingAbi => write!(f, "missing_abi"),
            Self::ParseError(reason) => write!(f, "parse_error: {reason}"),
        }
    }
}

/// A successfully decoded event. Ephemeral — consumed by the normalizer.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub chain: String,
    /// Emitting contract, lowercase `0x…`.
    pub contract: String,
    /// Event name from the ABI (e.g. `"Transfer"`).
    pub event_name: String,
    /// Decoded arguments in ABI declaration order.
    pub args: Vec<(String, ArgValue)>,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub block_hash: String,
}

impl DecodedEvent {
    /// Look up an argument by name.
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A log the decoder could not interpret, preserved verbatim.
#[derive(Debug, Clone)]
pub struct UnknownEvent {
    pub chain: String,
    pub contract: String,
    pub topics: Vec<String>,
    pub data: Vec<u8>,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub block_hash: String,
    pub reason: DecodeFailure,
}

/// Result of decoding one log.
#[derive(Debug, Clone)]
pub enum DecodeOutcome {
    Decoded(DecodedEvent),
    Undecoded(UnknownEvent),
}

impl DecodeOutcome {
    pub fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded(_))
    }
}

/// Per-batch decode counts, logged for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub decoded: usize,
    pub failed: usize,
}

// ─── Decoder ──────────────────────────────────────────────────────────────────

/// Decodes raw logs for one chain using the shared [`AbiRegistry`].
///
/// Cheap to clone; safe to use from many worker threads concurrently — the
/// registry is read-mostly and internally locked.
#[derive(Clone)]
pub struct EventDecoder {
    chain: String,
    registry: AbiRegistry,
}

impl EventDecoder {
    pub fn new(chain: impl Into<String>, registry: AbiRegistry) -> Self {
        Self {
            chain: chain.into(),
            registry,
        }
    }

    /// Decode a single log.
    pub fn decode(&self, log: &RawLog) -> DecodeOutcome {
        let abi = match self
            .registry
            .resolve(&self.chain, &log.address, log.block_number)
        {
            Some(abi) => abi,
            None => return self.undecoded(log, DecodeFailure::MissingAbi),
        };

        match self.decode_with(&abi, log) {
            Ok(event) => DecodeOutcome::Decoded(event),
            Err(reason) => self.undecoded(log, DecodeFailure::ParseError(reason)),
        }
    }

    /// Decode a batch of logs on the rayon worker pool.
    ///
    /// Logs are independent, so one malformed entry never affects the others;
    /// output order matches input order.
    pub fn decode_batch(&self, logs: &[RawLog]) -> (Vec<DecodeOutcome>, BatchSummary) {
        let outcomes: Vec<DecodeOutcome> =
            logs.par_iter().map(|log| self.decode(log)).collect();

        let decoded = outcomes.iter().filter(|o| o.is_decoded()).count();
        let summary = BatchSummary {
            decoded,
            failed: outcomes.len() - decoded,
        };
        tracing::debug!(
            chain = %self.chain,
            decoded = summary.decoded,
            failed = summary.failed,
            "log batch decoded"
        );
        (outcomes, summary)
    }

    fn undecoded(&self, log: &RawLog, reason: DecodeFailure) -> DecodeOutcome {
        DecodeOutcome::Undecoded(UnknownEvent {
            chain: self.chain.clone(),
            contract: log.address.to_ascii_lowercase(),
            topics: log.topics.clone(),
            data: log.data.clone(),
            tx_hash: log.tx_hash.clone(),
            log_index: log.log_index,
            block_number: log.block_number,
            block_hash: log.block_hash.clone(),
            reason,
        })
    }

    fn decode_with(
        &self,
        abi: &crate::abi::ContractAbi,
        log: &RawLog,
    ) -> Result<DecodedEvent, String> {
        let topic0 = log
            .topics
            .first()
            .ok_or_else(|| "log has no topics".to_string())?;
        let selector = parse_topic_word(topic0)?;

        let event = abi
            .event_for(&selector)
            .ok_or_else(|| format!("no event matches topic0 {topic0}"))?;

        let indexed: Vec<&EventParam> = event.inputs.iter().filter(|p| p.indexed).collect();
        let body: Vec<&EventParam> = event.inputs.iter().filter(|p| !p.indexed).collect();

        if log.topics.len() != indexed.len() + 1 {
            return Err(format!(
                "event {} expects {} indexed params, log has {} topics",
                event.name,
                indexed.len(),
                log.topics.len().saturating_sub(1),
            ));
        }

        // topics[1..] — one word per indexed parameter
        let mut indexed_values = Vec::with_capacity(indexed.len());
        for (param, topic) in indexed.iter().zip(log.topics.iter().skip(1)) {
            indexed_values.push(decode_topic(topic, param)?);
        }

        // data payload — ABI-encoded tuple of the non-indexed parameters
        let mut body_values = decode_data(&log.data, &body)?;

        // reassemble in ABI declaration order
        let mut indexed_iter = indexed_values.into_iter();
        let mut body_iter = body_values.drain(..);
        let args = event
            .inputs
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let value = if param.indexed {
                    indexed_iter.next().expect("indexed count checked above")
                } else {
                    body_iter.next().expect("body count checked above")
                };
                (arg_name(param, i), value)
            })
            .collect();

        Ok(DecodedEvent {
            chain: self.chain.clone(),
            contract: log.address.to_ascii_lowercase(),
            event_name: event.name.clone(),
            args,
            tx_hash: log.tx_hash.clone(),
            log_index: log.log_index,
            block_number: log.block_number,
            block_hash: log.block_hash.clone(),
        })
    }
}

// ─── ABI plumbing ─────────────────────────────────────────────────────────────

fn arg_name(param: &EventParam, position: usize) -> String {
    if param.name.is_empty() {
        format!("arg{position}")
    } else {
        param.name.clone()
    }
}

fn parse_topic_word(topic: &str) -> Result<B256, String> {
    let hex_part = topic.strip_prefix("0x").unwrap_or(topic);
    let bytes = hex::decode(hex_part).map_err(|e| format!("invalid topic hex: {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("topic is {} bytes, expected 32", bytes.len()));
    }
    Ok(B256::from_slice(&bytes))
}

/// Build the `DynSolType` for an ABI type string, recursing into tuple
/// components the way the JSON ABI represents them.
fn resolve_type(ty: &str, components: &[Param]) -> Result<DynSolType, String> {
    if components.is_empty() {
        return ty
            .parse::<DynSolType>()
            .map_err(|e| format!("unsupported type {ty}: {e}"));
    }
    let fields = components
        .iter()
        .map(|p| resolve_type(&p.ty, &p.components))
        .collect::<Result<Vec<_>, _>>()?;
    wrap_array_suffix(DynSolType::Tuple(fields), ty.trim_start_matches("tuple"))
}

/// Apply `[]` / `[N]` suffixes left over after stripping the base type.
fn wrap_array_suffix(mut ty: DynSolType, mut suffix: &str) -> Result<DynSolType, String> {
    while let Some(rest) = suffix.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| format!("malformed array suffix {suffix}"))?;
        let len_part = &rest[..close];
        ty = if len_part.is_empty() {
            DynSolType::Array(Box::new(ty))
        } else {
            let len: usize = len_part
                .parse()
                .map_err(|_| format!("malformed array length {len_part}"))?;
            DynSolType::FixedArray(Box::new(ty), len)
        };
        suffix = &rest[close + 1..];
    }
    Ok(ty)
}

/// Decode one indexed topic (always a single 32-byte word).
///
/// Value types are ABI-encoded in place and recoverable. Reference types
/// (string, bytes, arrays, tuples) appear as the keccak256 of their encoding;
/// the original value is unrecoverable, so the raw hash word is kept.
fn decode_topic(topic: &str, param: &EventParam) -> Result<ArgValue, String> {
    let word = parse_topic_word(topic)?;
    let ty = resolve_type(&param.ty, &param.components)?;

    match ty {
        DynSolType::String
        | DynSolType::Bytes
        | DynSolType::Array(_)
        | DynSolType::FixedArray(_, _)
        | DynSolType::Tuple(_) => Ok(ArgValue::Bytes(format!("0x{}", hex::encode(word)))),
        _ => {
            let value = ty
                .abi_decode(word.as_slice())
                .map_err(|e| format!("topic decode ({}): {e}", param.ty))?;
            Ok(from_sol_value(value))
        }
    }
}

/// Decode the data payload as an ABI-encoded tuple of the non-indexed params.
fn decode_data(data: &[u8], body: &[&EventParam]) -> Result<Vec<ArgValue>, String> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let field_types = body
        .iter()
        .map(|p| resolve_type(&p.ty, &p.components))
        .collect::<Result<Vec<_>, _>>()?;
    let tuple = DynSolType::Tuple(field_types);

    let decoded = tuple
        .abi_decode_sequence(data)
        .map_err(|e| format!("data decode: {e}"))?;

    let values = match decoded {
        DynSolValue::Tuple(vals) => vals,
        other => vec![other],
    };
    if values.len() != body.len() {
        return Err(format!(
            "data decoded to {} values, expected {}",
            values.len(),
            body.len()
        ));
    }
    Ok(values.into_iter().map(from_sol_value).collect())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ERC20_ABI: &str = r#"[
        {"type":"event","name":"Transfer","anonymous":false,"inputs":[
            {"name":"from","type":"address","indexed":true},
            {"name":"to","type":"address","indexed":true},
            {"name":"value","type":"uint256","indexed":false}]}
    ]"#;

    const TRANSFER_SIG: &str =
        "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
    const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

    fn registry() -> AbiRegistry {
        let reg = AbiRegistry::new();
        reg.register("ethereum", USDT, ERC20_ABI, 1, 0, None).unwrap();
        reg
    }

    fn padded_address(addr: &str) -> String {
        format!("0x{:0>64}", addr.trim_start_matches("0x"))
    }

    fn transfer_log(value: u64) -> RawLog {
        let mut data = vec![0u8; 32];
        data[24..].copy_from_slice(&value.to_be_bytes());
        RawLog {
            address: USDT.into(),
            topics: vec![
                TRANSFER_SIG.into(),
                padded_address("0x1111111111111111111111111111111111111111"),
                padded_address("0x2222222222222222222222222222222222222222"),
            ],
            data,
            block_number: 100,
            block_hash: "0xb100".into(),
            tx_hash: "0xt1".into(),
            log_index: 0,
        }
    }

    #[test]
    fn decode_transfer() {
        let decoder = EventDecoder::new("ethereum", registry());
        let outcome = decoder.decode(&transfer_log(1));

        let event = match outcome {
            DecodeOutcome::Decoded(e) => e,
            DecodeOutcome::Undecoded(u) => panic!("decode failed: {}", u.reason),
        };
        assert_eq!(event.event_name, "Transfer");
        assert_eq!(
            event.arg("from").unwrap().as_address().unwrap(),
            "0x1111111111111111111111111111111111111111"
        );
        assert_eq!(
            event.arg("to").unwrap().as_address().unwrap(),
            "0x2222222222222222222222222222222222222222"
        );
        assert_eq!(event.arg("value").unwrap().as_uint().unwrap(), "1");
    }

    #[test]
    fn unregistered_contract_is_missing_abi() {
        let decoder = EventDecoder::new("ethereum", registry());
        let mut log = transfer_log(1);
        log.address = "0x9999999999999999999999999999999999999999".into();

        match decoder.decode(&log) {
            DecodeOutcome::Undecoded(u) => {
                assert_eq!(u.reason, DecodeFailure::MissingAbi);
                // raw payload preserved verbatim
                assert_eq!(u.topics.len(), 3);
                assert_eq!(u.data.len(), 32);
            }
            DecodeOutcome::Decoded(_) => panic!("expected missing ABI"),
        }
    }

    #[test]
    fn truncated_data_is_parse_error() {
        let decoder = EventDecoder::new("ethereum", registry());
        let mut log = transfer_log(1);
        log.data.truncate(10);

        match decoder.decode(&log) {
            DecodeOutcome::Undecoded(u) => {
                assert!(matches!(u.reason, DecodeFailure::ParseError(_)));
            }
            DecodeOutcome::Decoded(_) => panic!("expected parse error"),
        }
    }

    #[test]
    fn wrong_topic_count_is_parse_error() {
        let decoder = EventDecoder::new("ethereum", registry());
        let mut log = transfer_log(1);
        log.topics.pop();

        match decoder.decode(&log) {
            DecodeOutcome::Undecoded(u) => {
                assert!(matches!(u.reason, DecodeFailure::ParseError(_)));
            }
            DecodeOutcome::Decoded(_) => panic!("expected parse error"),
        }
    }

    #[test]
    fn batch_isolates_failures() {
        let decoder = EventDecoder::new("ethereum", registry());
        let good_a = transfer_log(1);
        let mut bad = transfer_log(2);
        bad.data.truncate(3); // malformed
        let good_b = transfer_log(3);

        let (outcomes, summary) = decoder.decode_batch(&[good_a, bad, good_b]);

        assert_eq!(summary, BatchSummary { decoded: 2, failed: 1 });
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_decoded());
        assert!(!outcomes[1].is_decoded());
        assert!(outcomes[2].is_decoded());
    }
}
