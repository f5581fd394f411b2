//! Validator set with proposer-priority rotation.
//!
//! The rotation follows the priority-accumulation rule: at every height each
//! validator gains `voting_power` priority, the max-priority validator
//! becomes proposer and has the set's total power subtracted. Ties are
//! broken by ascending address. Sets are kept sorted by address; the
//! address-sorted ring starting at the proposer is the succession order.

use alloy_primitives::{Address, U256};
use alloy_rlp::RlpEncodable;
use serde::{Deserialize, Serialize};

use super::constants::VALIDATOR_BYTES_LEN;
use super::error::BorConsensusError;

/// Bounds the priority spread to `2 * total_power` before rescaling kicks in.
const PRIORITY_WINDOW_SIZE_FACTOR: i64 = 2;

/// A single authority. Wire names follow Heimdall's JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    #[serde(rename = "signer")]
    pub address: Address,
    #[serde(rename = "power")]
    pub voting_power: i64,
    #[serde(rename = "accum", default)]
    pub proposer_priority: i64,
}

/// Priority-free form RLP-encoded into contract payloads.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable)]
pub struct MinimalVal {
    pub signer: Address,
    pub voting_power: u64,
}

impl Validator {
    pub fn new(address: Address, voting_power: i64) -> Self {
        Self { address, voting_power, proposer_priority: 0 }
    }

    /// 40-byte header form: address followed by the big-endian voting power
    /// left-padded to 20 bytes.
    pub fn header_bytes(&self) -> [u8; VALIDATOR_BYTES_LEN] {
        let mut out = [0u8; VALIDATOR_BYTES_LEN];
        out[..20].copy_from_slice(self.address.as_slice());
        let power = U256::from(self.voting_power.max(0) as u64);
        out[20..].copy_from_slice(&power.to_be_bytes::<32>()[12..]);
        out
    }

    pub fn minimal(&self) -> MinimalVal {
        MinimalVal { signer: self.address, voting_power: self.voting_power.max(0) as u64 }
    }
}

/// Parse the concatenated 40-byte validator entries out of a sprint-end
/// header's extra-data region.
pub fn parse_validators(bytes: &[u8]) -> Result<Vec<Validator>, BorConsensusError> {
    if bytes.is_empty() || bytes.len() % VALIDATOR_BYTES_LEN != 0 {
        return Err(BorConsensusError::InvalidSpanValidators);
    }

    let mut validators = Vec::with_capacity(bytes.len() / VALIDATOR_BYTES_LEN);
    for chunk in bytes.chunks_exact(VALIDATOR_BYTES_LEN) {
        let address = Address::from_slice(&chunk[..20]);
        let power = U256::from_be_slice(&chunk[20..]);
        let power = u64::try_from(power)
            .ok()
            .and_then(|p| i64::try_from(p).ok())
            .ok_or(BorConsensusError::InvalidSpanValidators)?;
        validators.push(Validator::new(address, power));
    }
    Ok(validators)
}

/// Ordered validator set. Always sorted by address; `proposer` is the
/// validator elected by the last priority advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub validators: Vec<Validator>,
    pub proposer: Option<Validator>,
}

impl ValidatorSet {
    /// Build a sorted set and elect the initial proposer.
    pub fn new(mut validators: Vec<Validator>) -> Result<Self, BorConsensusError> {
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        for pair in validators.windows(2) {
            if pair[0].address == pair[1].address {
                return Err(BorConsensusError::InvalidValidatorSetUpdate(
                    "duplicate validator address",
                ));
            }
        }
        if validators.iter().any(|v| v.voting_power < 0) {
            return Err(BorConsensusError::InvalidValidatorSetUpdate("negative voting power"));
        }

        let mut set = Self { validators, proposer: None };
        if !set.validators.is_empty() {
            set.increment_proposer_priority(1);
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn total_voting_power(&self) -> i64 {
        self.validators.iter().fold(0i64, |acc, v| acc.saturating_add(v.voting_power))
    }

    pub fn has_address(&self, address: Address) -> bool {
        self.get_by_address(address).is_some()
    }

    pub fn get_by_address(&self, address: Address) -> Option<(usize, &Validator)> {
        self.validators
            .iter()
            .position(|v| v.address == address)
            .map(|i| (i, &self.validators[i]))
    }

    /// Advance the rotation by `times` heights and elect the new proposer.
    pub fn increment_proposer_priority(&mut self, times: u32) {
        if self.validators.is_empty() {
            return;
        }

        let diff_max = PRIORITY_WINDOW_SIZE_FACTOR.saturating_mul(self.total_voting_power());
        self.rescale_priorities(diff_max);
        self.shift_by_avg_proposer_priority();

        let mut elected = None;
        for _ in 0..times {
            elected = Some(self.increment_once());
        }
        self.proposer = elected.map(|i| self.validators[i].clone());
    }

    fn increment_once(&mut self) -> usize {
        for v in &mut self.validators {
            v.proposer_priority = v.proposer_priority.saturating_add(v.voting_power);
        }
        let idx = self.max_priority_index();
        let total = self.total_voting_power();
        self.validators[idx].proposer_priority =
            self.validators[idx].proposer_priority.saturating_sub(total);
        idx
    }

    // Highest priority wins, smaller address wins a tie.
    fn max_priority_index(&self) -> usize {
        let mut best = 0;
        for (i, v) in self.validators.iter().enumerate().skip(1) {
            let cur = &self.validators[best];
            if v.proposer_priority > cur.proposer_priority
                || (v.proposer_priority == cur.proposer_priority && v.address < cur.address)
            {
                best = i;
            }
        }
        best
    }

    fn rescale_priorities(&mut self, diff_max: i64) {
        if diff_max <= 0 {
            return;
        }
        let max = self.validators.iter().map(|v| v.proposer_priority).max().unwrap_or(0);
        let min = self.validators.iter().map(|v| v.proposer_priority).min().unwrap_or(0);
        let diff = max.saturating_sub(min);
        if diff > diff_max {
            let ratio = (diff + diff_max - 1) / diff_max;
            for v in &mut self.validators {
                v.proposer_priority /= ratio;
            }
        }
    }

    fn shift_by_avg_proposer_priority(&mut self) {
        if self.validators.is_empty() {
            return;
        }
        let sum: i128 = self.validators.iter().map(|v| v.proposer_priority as i128).sum();
        let avg = (sum / self.validators.len() as i128) as i64;
        for v in &mut self.validators {
            v.proposer_priority = v.proposer_priority.saturating_sub(avg);
        }
    }

    /// Zero-based distance of `signer` from the proposer in the
    /// address-sorted rotation ring. `None` when `signer` is not a member.
    pub fn succession(&self, signer: Address) -> Option<u64> {
        let proposer = self.proposer.as_ref()?;
        let (proposer_index, _) = self.get_by_address(proposer.address)?;
        let (signer_index, _) = self.get_by_address(signer)?;

        let n = self.validators.len();
        Some(((signer_index + n - proposer_index) % n) as u64)
    }

    /// Seal difficulty for `signer`: the proposer seals with `len`, each
    /// further succession slot one less.
    pub fn difficulty(&self, signer: Address) -> Option<u64> {
        self.succession(signer).map(|s| self.validators.len() as u64 - s)
    }

    /// Concatenated 40-byte header forms in set order.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.validators.len() * VALIDATOR_BYTES_LEN);
        for v in &self.validators {
            out.extend_from_slice(&v.header_bytes());
        }
        out
    }

    /// Merge a change set: zero-power entries are removals, unknown
    /// addresses are inserted at a deprioritized slot, known addresses get
    /// their power updated with priority preserved. Priorities are rescaled
    /// and re-centered afterwards.
    pub fn update_with_change_set(&mut self, changes: &[Validator]) -> Result<(), BorConsensusError> {
        let mut changes = changes.to_vec();
        changes.sort_by(|a, b| a.address.cmp(&b.address));
        for pair in changes.windows(2) {
            if pair[0].address == pair[1].address {
                return Err(BorConsensusError::InvalidValidatorSetUpdate(
                    "duplicate address in change set",
                ));
            }
        }
        if changes.iter().any(|c| c.voting_power < 0) {
            return Err(BorConsensusError::InvalidValidatorSetUpdate("negative voting power"));
        }

        // Project the post-merge total before touching the set; new entries
        // start at -(total + total/8) so they cannot immediately propose.
        let mut new_total: i64 = 0;
        for v in &self.validators {
            let power = changes
                .iter()
                .find(|c| c.address == v.address)
                .map(|c| c.voting_power)
                .unwrap_or(v.voting_power);
            new_total = new_total.saturating_add(power);
        }
        for c in &changes {
            if !self.has_address(c.address) {
                new_total = new_total.saturating_add(c.voting_power);
            }
        }
        if new_total == 0 {
            return Err(BorConsensusError::InvalidValidatorSetUpdate("total voting power is zero"));
        }

        let new_priority = new_total.saturating_add(new_total >> 3).saturating_neg();
        for change in &changes {
            match self.validators.iter_mut().find(|v| v.address == change.address) {
                Some(existing) if change.voting_power == 0 => {
                    existing.voting_power = 0; // marked, swept below
                }
                Some(existing) => {
                    existing.voting_power = change.voting_power;
                }
                None if change.voting_power == 0 => {
                    return Err(BorConsensusError::InvalidValidatorSetUpdate(
                        "removed validator not in set",
                    ));
                }
                None => {
                    self.validators.push(Validator {
                        address: change.address,
                        voting_power: change.voting_power,
                        proposer_priority: new_priority,
                    });
                }
            }
        }
        self.validators.retain(|v| v.voting_power > 0);
        self.validators.sort_by(|a, b| a.address.cmp(&b.address));

        if self.validators.is_empty() {
            return Err(BorConsensusError::InvalidValidatorSetUpdate("total voting power is zero"));
        }

        self.rescale_priorities(PRIORITY_WINDOW_SIZE_FACTOR.saturating_mul(self.total_voting_power()));
        self.shift_by_avg_proposer_priority();

        // Refresh the proposer pointer against the merged membership.
        self.proposer = self
            .proposer
            .take()
            .and_then(|p| self.get_by_address(p.address).map(|(_, v)| v.clone()));

        Ok(())
    }
}

/// Merge the sprint-end list into `old`: members absent from `new_vals` are
/// removed, members present get the fresh power, newcomers are inserted.
pub fn get_updated_validator_set(
    old: &ValidatorSet,
    new_vals: &[Validator],
) -> Result<ValidatorSet, BorConsensusError> {
    let mut merged = old.clone();

    let mut changes: Vec<Validator> = Vec::with_capacity(old.validators.len() + new_vals.len());
    for ov in &old.validators {
        let power = new_vals
            .iter()
            .find(|nv| nv.address == ov.address)
            .map(|nv| nv.voting_power)
            .unwrap_or(0);
        changes.push(Validator { address: ov.address, voting_power: power, proposer_priority: 0 });
    }
    for nv in new_vals {
        if !old.has_address(nv.address) {
            changes.push(nv.clone());
        }
    }

    merged.update_with_change_set(&changes)?;
    Ok(merged)
}
