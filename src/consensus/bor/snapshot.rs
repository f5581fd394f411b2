//! Per-block immutable view of the authority set.
//!
//! A snapshot is never mutated after it is handed to a cache or a caller;
//! `apply` clones and returns a fresh one.

use std::collections::BTreeMap;

use alloy_consensus::Header;
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use super::error::BorConsensusError;
use super::util::ecrecover;
use super::validation::sprint_end_validator_bytes;
use super::validator::{get_updated_validator_set, parse_validators, ValidatorSet};
use crate::config::BorConfig;

/// Number of blocks after which snapshots are persisted to the store.
pub const CHECKPOINT_INTERVAL: u64 = 1024;

/// Store blob layout version.
const SNAPSHOT_STORE_VERSION: u32 = 1;

/// Authority state as of block `number`/`hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub number: u64,
    pub hash: B256,
    pub validator_set: ValidatorSet,
    /// Who sealed each block of the trailing no-double-sign window.
    pub recent_signers: BTreeMap<u64, Address>,
}

#[derive(Serialize, Deserialize)]
struct StoredSnapshot {
    version: u32,
    snapshot: Snapshot,
}

impl Snapshot {
    pub fn new(number: u64, hash: B256, validator_set: ValidatorSet) -> Self {
        Self { number, hash, validator_set, recent_signers: BTreeMap::new() }
    }

    /// Store key for this snapshot's hash: `bor-{hex(hash)}`.
    pub fn store_key(hash: B256) -> Vec<u8> {
        format!("bor-{hash:x}").into_bytes()
    }

    pub fn to_store_bytes(&self) -> Result<Vec<u8>, BorConsensusError> {
        serde_json::to_vec(&StoredSnapshot { version: SNAPSHOT_STORE_VERSION, snapshot: self.clone() })
            .map_err(|e| BorConsensusError::SnapshotStore(e.to_string()))
    }

    pub fn from_store_bytes(bytes: &[u8]) -> Result<Self, BorConsensusError> {
        let stored: StoredSnapshot = serde_json::from_slice(bytes)
            .map_err(|e| BorConsensusError::SnapshotStore(e.to_string()))?;
        if stored.version != SNAPSHOT_STORE_VERSION {
            return Err(BorConsensusError::SnapshotStore(format!(
                "unsupported snapshot version {}",
                stored.version
            )));
        }
        Ok(stored.snapshot)
    }

    pub fn signed_recently(&self, signer: Address) -> bool {
        self.recent_signers.values().any(|&s| s == signer)
    }

    pub fn succession(&self, signer: Address) -> Option<u64> {
        self.validator_set.succession(signer)
    }

    pub fn difficulty(&self, signer: Address) -> Option<u64> {
        self.validator_set.difficulty(signer)
    }

    /// Roll the snapshot forward over `headers`.
    ///
    /// Headers must be contiguous and start right after `self.number`. Each
    /// header's signer is recovered, authorized against the current set and
    /// checked against the recent-signer window; at sprint ends the list in
    /// the header's extra-data is merged into the set, effective from the
    /// next block. An empty slice returns an equal snapshot.
    pub fn apply(&self, headers: &[Header], config: &BorConfig) -> Result<Self, BorConsensusError> {
        if headers.is_empty() {
            return Ok(self.clone());
        }

        for pair in headers.windows(2) {
            if pair[1].number != pair[0].number + 1 {
                return Err(BorConsensusError::OutOfRangeChain);
            }
        }
        if headers[0].number != self.number + 1 {
            return Err(BorConsensusError::OutOfRangeChain);
        }

        let mut snap = self.clone();
        for header in headers {
            let number = header.number;

            // Slide the window so the oldest signer may sign again.
            let limit = snap.validator_set.len() as u64 / 2 + 1;
            if number >= limit {
                snap.recent_signers.remove(&(number - limit));
            }

            let signer = ecrecover(header)?;
            if !snap.validator_set.has_address(signer) {
                return Err(BorConsensusError::UnauthorizedSigner { number, signer });
            }
            if snap.signed_recently(signer) {
                return Err(BorConsensusError::RecentlySigned { number, signer });
            }
            snap.recent_signers.insert(number, signer);

            // Sprint end: the header carries the authoritative list for the
            // blocks that follow.
            if number > 0 && (number + 1) % config.sprint == 0 {
                let validator_bytes = sprint_end_validator_bytes(header)?;
                let new_validators = parse_validators(validator_bytes)?;
                snap.validator_set =
                    get_updated_validator_set(&snap.validator_set, &new_validators)?;
            }

            snap.validator_set.increment_proposer_priority(1);
        }

        let last = &headers[headers.len() - 1];
        snap.number = last.number;
        snap.hash = last.hash_slow();
        Ok(snap)
    }
}
