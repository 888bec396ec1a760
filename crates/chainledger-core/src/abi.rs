//! ABI registry — versioned contract ABIs with block-range resolution.
//!
//! ABIs are keyed by `(chain, contract address, block range)`. A contract may
//! carry several versions over its lifetime (proxy upgrades, redeployments);
//! the `[start_block, end_block)` ranges of the versions must not overlap, so
//! any `(contract, block)` pair resolves to at most one decoder. Registration
//! is driven by an external governance process; the registry never discovers
//! ABIs on its own.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::B256;

use crate::error::RegistryError;

/// One registered ABI version for a contract.
#[derive(Debug, Clone)]
pub struct ContractAbi {
    /// Chain slug (e.g. `"ethereum"`).
    pub chain: String,
    /// Contract address, lowercase `0x…`.
    pub address: String,
    /// Version number assigned by the registrar.
    pub version: u32,
    /// First block this version applies to (inclusive).
    pub start_block: u64,
    /// First block this version no longer applies to; `None` = open-ended.
    pub end_block: Option<u64>,
    /// Non-anonymous events indexed by signature hash (`topics[0]`).
    events: HashMap<B256, Event>,
}

impl ContractAbi {
    /// Returns `true` if `block_number` falls inside `[start_block, end_block)`.
    pub fn covers(&self, block_number: u64) -> bool {
        block_number >= self.start_block
            && self.end_block.map(|end| block_number < end).unwrap_or(true)
    }

    /// Look up the event whose signature hash equals `selector`.
    pub fn event_for(&self, selector: &B256) -> Option<&Event> {
        self.events.get(selector)
    }

    /// Number of decodable events in this version.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn overlaps(&self, start: u64, end: Option<u64>) -> bool {
        // [a, b) and [c, d) overlap iff a < d and c < b, with None = ∞
        let before_other_end = match end {
            Some(e) => self.start_block < e,
            None => true,
        };
        let other_before_end = match self.end_block {
            Some(e) => start < e,
            None => true,
        };
        before_other_end && other_before_end
    }
}

type ContractKey = (String, String);

struct Inner {
    /// Versions per contract, in registration order.
    versions: HashMap<ContractKey, Vec<Arc<ContractAbi>>>,
    /// Resolution cache per `(contract, block)`; negative results are cached
    /// too since unknown contracts dominate real log streams.
    cache: HashMap<(ContractKey, u64), Option<Arc<ContractAbi>>>,
}

/// Thread-safe versioned ABI registry.
///
/// Reads are cheap and concurrent; registering a new version takes the write
/// lock and drops every cached resolution for that contract.
#[derive(Clone)]
pub struct AbiRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl AbiRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                versions: HashMap::new(),
                cache: HashMap::new(),
            })),
        }
    }

    /// Register an ABI version for a contract.
    ///
    /// Fails with [`RegistryError::RangeConflict`] if the `[start_block,
    /// end_block)` range overlaps any version already registered for the same
    /// `(chain, address)`, and with [`RegistryError::InvalidAbi`] if the ABI
    /// JSON does not parse.
    pub fn register(
        &self,
        chain: &str,
        address: &str,
        abi_json: &str,
        version: u32,
        start_block: u64,
        end_block: Option<u64>,
    ) -> Result<(), RegistryError> {
        let address = address.to_ascii_lowercase();
        let abi: JsonAbi =
            serde_json::from_str(abi_json).map_err(|e| RegistryError::InvalidAbi {
                chain: chain.to_string(),
                address: address.clone(),
                reason: e.to_string(),
            })?;

        let mut events = HashMap::new();
        for event in abi.events() {
            if !event.anonymous {
                events.insert(event.selector(), event.clone());
            }
        }

        let key: ContractKey = (chain.to_string(), address.clone());
        let mut inner = self.inner.write().unwrap();

        if let Some(existing) = inner.versions.get(&key) {
            if let Some(conflict) = existing
                .iter()
                .find(|v| v.overlaps(start_block, end_block))
            {
                return Err(RegistryError::RangeConflict {
                    chain: chain.to_string(),
                    address,
                    version,
                    existing: conflict.version,
                });
            }
        }

        let entry = Arc::new(ContractAbi {
            chain: chain.to_string(),
            address,
            version,
            start_block,
            end_block,
            events,
        });

        tracing::info!(
            chain,
            address = %entry.address,
            version,
            start_block,
            end_block = ?end_block,
            events = entry.event_count(),
            "ABI version registered"
        );

        inner.versions.entry(key.clone()).or_default().push(entry);
        // single-writer invalidation: stale resolutions for this contract only
        inner.cache.retain(|(k, _), _| *k != key);
        Ok(())
    }

    /// Resolve the ABI version covering `(chain, address, block_number)`.
    ///
    /// On range ties (which only arise from equal ranges that the conflict
    /// check already rejects) the most recently registered version wins.
    pub fn resolve(
        &self,
        chain: &str,
        address: &str,
        block_number: u64,
    ) -> Option<Arc<ContractAbi>> {
        let key: ContractKey = (chain.to_string(), address.to_ascii_lowercase());

        {
            let inner = self.inner.read().unwrap();
            if let Some(cached) = inner.cache.get(&(key.clone(), block_number)) {
                return cached.clone();
            }
        }

        let mut inner = self.inner.write().unwrap();
        let resolved = inner
            .versions
            .get(&key)
            .and_then(|versions| {
                versions
                    .iter()
                    .rev()
                    .find(|v| v.covers(block_number))
                    .cloned()
            });
        inner
            .cache
            .insert((key, block_number), resolved.clone());
        resolved
    }

    /// Number of contracts with at least one registered version.
    pub fn contract_count(&self) -> usize {
        self.inner.read().unwrap().versions.len()
    }
}

impl Default for AbiRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERC20_ABI: &str = r#"[
        {"type":"event","name":"Transfer","anonymous":false,"inputs":[
            {"name":"from","type":"address","indexed":true},
            {"name":"to","type":"address","indexed":true},
            {"name":"value","type":"uint256","indexed":false}]},
        {"type":"event","name":"Approval","anonymous":false,"inputs":[
            {"name":"owner","type":"address","indexed":true},
            {"name":"spender","type":"address","indexed":true},
            {"name":"value","type":"uint256","indexed":false}]}
    ]"#;

    const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

    #[test]
    fn register_and_resolve() {
        let reg = AbiRegistry::new();
        reg.register("ethereum", USDT, ERC20_ABI, 1, 0, None).unwrap();

        let abi = reg.resolve("ethereum", USDT, 19_000_000).unwrap();
        assert_eq!(abi.version, 1);
        assert_eq!(abi.event_count(), 2);
    }

    #[test]
    fn resolve_respects_case_insensitive_address() {
        let reg = AbiRegistry::new();
        reg.register("ethereum", &USDT.to_uppercase().replace("0X", "0x"), ERC20_ABI, 1, 0, None)
            .unwrap();
        assert!(reg.resolve("ethereum", USDT, 100).is_some());
    }

    #[test]
    fn overlapping_range_rejected() {
        let reg = AbiRegistry::new();
        reg.register("ethereum", USDT, ERC20_ABI, 1, 0, Some(1000)).unwrap();

        // [500, 2000) overlaps [0, 1000)
        let err = reg
            .register("ethereum", USDT, ERC20_ABI, 2, 500, Some(2000))
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::RangeConflict { existing: 1, .. }
        ));

        // open-ended range also overlaps [0, 1000)
        let err = reg
            .register("ethereum", USDT, ERC20_ABI, 2, 500, None)
            .unwrap_err();
        assert!(matches!(err, RegistryError::RangeConflict { .. }));
    }

    #[test]
    fn adjacent_ranges_allowed() {
        let reg = AbiRegistry::new();
        reg.register("ethereum", USDT, ERC20_ABI, 1, 0, Some(1000)).unwrap();
        reg.register("ethereum", USDT, ERC20_ABI, 2, 1000, None).unwrap();

        assert_eq!(reg.resolve("ethereum", USDT, 999).unwrap().version, 1);
        assert_eq!(reg.resolve("ethereum", USDT, 1000).unwrap().version, 2);
    }

    #[test]
    fn resolve_outside_any_range() {
        let reg = AbiRegistry::new();
        reg.register("ethereum", USDT, ERC20_ABI, 1, 100, Some(200)).unwrap();
        assert!(reg.resolve("ethereum", USDT, 99).is_none());
        assert!(reg.resolve("ethereum", USDT, 200).is_none());
    }

    #[test]
    fn cache_invalidated_on_register() {
        let reg = AbiRegistry::new();
        reg.register("ethereum", USDT, ERC20_ABI, 1, 0, Some(1000)).unwrap();

        // prime the cache with a miss above the range
        assert!(reg.resolve("ethereum", USDT, 5000).is_none());

        // a new version covering that block must be visible immediately
        reg.register("ethereum", USDT, ERC20_ABI, 2, 1000, None).unwrap();
        assert_eq!(reg.resolve("ethereum", USDT, 5000).unwrap().version, 2);
    }

    #[test]
    fn invalid_abi_rejected() {
        let reg = AbiRegistry::new();
        let err = reg
            .register("ethereum", USDT, "not json", 1, 0, None)
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidAbi { .. }));
    }

    #[test]
    fn chains_are_isolated() {
        let reg = AbiRegistry::new();
        reg.register("ethereum", USDT, ERC20_ABI, 1, 0, None).unwrap();
        assert!(reg.resolve("polygon", USDT, 100).is_none());
    }
}
