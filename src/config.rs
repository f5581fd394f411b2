//! Engine configuration.
//!
//! `BorConfig` carries the consensus parameters the chain config exposes to
//! the engine. `block_alloc` holds the raw genesis-alloc blobs as they
//! appear in the chain config; the engine decodes them when it is
//! constructed and panics on a malformed blob, since that is a
//! configuration bug rather than a runtime condition.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};

/// Contract code override applied at a hard-fork block. Decoded form of a
/// `block_alloc` account entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccountOverride {
    /// New runtime bytecode for the account.
    pub code: Bytes,
}

/// Consensus parameters for a Bor chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorConfig {
    /// Minimum number of seconds between consecutive blocks.
    pub period: u64,
    /// Sprint length in blocks. Validator-list bytes appear in the last
    /// block of each sprint.
    pub sprint: u64,
    /// Base delay applied to the first block of a sprint.
    pub producer_delay: u64,
    /// Extra per-succession-slot delay for out-of-turn producers.
    pub backup_multiplier: u64,
    /// Validator-set contract queried for the authoritative set and span.
    pub validator_contract: Address,
    /// State-receiver contract fed by state-sync system messages.
    pub state_receiver_contract: Address,
    /// Chain id expected in Heimdall spans and event records.
    pub chain_id: String,
    /// Raw genesis-alloc blobs keyed by block number, as embedded in the
    /// chain config. Decoded into [`GenesisAccountOverride`] maps at engine
    /// construction.
    #[serde(default)]
    pub block_alloc: BTreeMap<u64, serde_json::Value>,
    /// Caps the number of state-sync records committed at a given block.
    #[serde(default)]
    pub override_state_sync_records: BTreeMap<u64, usize>,
}

impl Default for BorConfig {
    fn default() -> Self {
        Self {
            period: 2,
            sprint: 64,
            producer_delay: 6,
            backup_multiplier: 2,
            validator_contract: Address::ZERO,
            state_receiver_contract: Address::ZERO,
            chain_id: "137".to_string(),
            block_alloc: BTreeMap::new(),
            override_state_sync_records: BTreeMap::new(),
        }
    }
}
