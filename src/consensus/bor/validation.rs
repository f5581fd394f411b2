//! Header verification: standalone checks plus the cascading checks that
//! need the parent chain, the snapshot and the validator contract.

use std::sync::mpsc;
use std::sync::Arc;

use alloy_consensus::{Header, EMPTY_OMMER_ROOT_HASH};
use alloy_primitives::B256;

use super::bor::Bor;
use super::constants::{ALLOWED_FUTURE_BLOCK_TIME, EXTRA_SEAL, EXTRA_VANITY, VALIDATOR_BYTES_LEN};
use super::contracts::{BlockRef, EvmCaller};
use super::error::BorConsensusError;
use super::provider::{ChainReader, KvStore};
use super::seal::calc_producer_delay;
use super::snapshot::Snapshot;
use super::util;
use crate::heimdall::HeimdallClient;

/// Bytes between the vanity prefix and the seal suffix.
pub(crate) fn validator_region(header: &Header) -> Result<&[u8], BorConsensusError> {
    let extra = &header.extra_data;
    if extra.len() < EXTRA_VANITY {
        return Err(BorConsensusError::MissingVanity);
    }
    if extra.len() < EXTRA_VANITY + EXTRA_SEAL {
        return Err(BorConsensusError::MissingSignature);
    }
    Ok(&extra[EXTRA_VANITY..extra.len() - EXTRA_SEAL])
}

/// Validator region of a sprint-end header; must be a positive multiple of
/// the 40-byte entry size.
pub(crate) fn sprint_end_validator_bytes(header: &Header) -> Result<&[u8], BorConsensusError> {
    let region = validator_region(header)?;
    if region.is_empty() || region.len() % VALIDATOR_BYTES_LEN != 0 {
        return Err(BorConsensusError::InvalidSpanValidators);
    }
    Ok(region)
}

impl<E, K, H> Bor<E, K, H>
where
    E: EvmCaller,
    K: KvStore,
    H: HeimdallClient,
{
    /// Verify a single header against the chain.
    pub fn verify_header<C: ChainReader>(
        &self,
        chain: &C,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), BorConsensusError> {
        let number = header.number;

        if header.timestamp > util::present_timestamp() + ALLOWED_FUTURE_BLOCK_TIME {
            return Err(BorConsensusError::FutureBlock);
        }

        let region = validator_region(header)?;
        let is_sprint_end = (number + 1) % self.config.sprint == 0;
        if !is_sprint_end && !region.is_empty() {
            return Err(BorConsensusError::ExtraValidators);
        }
        if is_sprint_end && (region.is_empty() || region.len() % VALIDATOR_BYTES_LEN != 0) {
            return Err(BorConsensusError::InvalidSpanValidators);
        }

        if header.mix_hash != B256::ZERO {
            return Err(BorConsensusError::InvalidMixDigest);
        }
        if header.ommers_hash != EMPTY_OMMER_ROOT_HASH {
            return Err(BorConsensusError::InvalidUncleHash);
        }
        if number > 0 && header.difficulty.is_zero() {
            return Err(BorConsensusError::InvalidDifficulty);
        }

        self.verify_cascading_fields(chain, header, parents)
    }

    fn verify_cascading_fields<C: ChainReader>(
        &self,
        chain: &C,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), BorConsensusError> {
        let number = header.number;
        if number == 0 {
            return Ok(());
        }

        let parent = match parents.last() {
            Some(parent) => parent.clone(),
            None => chain
                .header(header.parent_hash, number - 1)
                .ok_or(BorConsensusError::UnknownAncestor)?,
        };
        if parent.number != number - 1 || parent.hash_slow() != header.parent_hash {
            return Err(BorConsensusError::UnknownAncestor);
        }

        if parent.timestamp + self.config.period > header.timestamp {
            return Err(BorConsensusError::InvalidTimestamp);
        }

        let snap = self.snapshot(chain, number - 1, header.parent_hash, parents)?;

        // Sprint end: the embedded list must match the contract byte for
        // byte, in address order.
        if (number + 1) % self.config.sprint == 0 {
            let mut expected = self
                .validator_contract
                .current_validators(BlockRef::Hash(header.parent_hash), number + 1)?;
            expected.sort_by(|a, b| a.address.cmp(&b.address));

            let mut expected_bytes = Vec::with_capacity(expected.len() * VALIDATOR_BYTES_LEN);
            for validator in &expected {
                expected_bytes.extend_from_slice(&validator.header_bytes());
            }
            if expected_bytes != validator_region(header)? {
                return Err(BorConsensusError::InvalidSpanValidators);
            }
        }

        // Sprint start: the parent's embedded list must equal the set the
        // snapshot derived for this block.
        if number % self.config.sprint == 0 {
            if snap.validator_set.header_bytes() != validator_region(&parent)? {
                return Err(BorConsensusError::MismatchingValidators { number });
            }
        }

        self.verify_seal_against(&snap, header, Some(&parent))
    }

    /// Verify the seal of `header` on its own, resolving the snapshot and
    /// parent from the chain.
    pub fn verify_seal<C: ChainReader>(
        &self,
        chain: &C,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), BorConsensusError> {
        let number = header.number;
        if number == 0 {
            return Err(BorConsensusError::UnknownBlock);
        }

        let snap = self.snapshot(chain, number - 1, header.parent_hash, parents)?;
        let parent = match parents.last() {
            Some(parent) => Some(parent.clone()),
            None => chain.header(header.parent_hash, number - 1),
        };
        self.verify_seal_against(&snap, header, parent.as_ref())
    }

    fn verify_seal_against(
        &self,
        snap: &Snapshot,
        header: &Header,
        parent: Option<&Header>,
    ) -> Result<(), BorConsensusError> {
        let number = header.number;
        if number == 0 {
            return Err(BorConsensusError::UnknownBlock);
        }

        let signer = util::ecrecover(header)?;
        let succession = snap
            .succession(signer)
            .ok_or(BorConsensusError::UnauthorizedSigner { number, signer })?;

        if let Some(parent) = parent {
            let earliest =
                parent.timestamp + calc_producer_delay(number, succession, &self.config);
            if header.timestamp < earliest {
                return Err(BorConsensusError::BlockTooSoon { number, succession });
            }
        }

        let expected = snap
            .difficulty(signer)
            .ok_or(BorConsensusError::UnauthorizedSigner { number, signer })?;
        if header.difficulty != alloy_primitives::U256::from(expected) {
            return Err(BorConsensusError::WrongDifficulty {
                number,
                expected,
                got: header.difficulty.try_into().unwrap_or(u64::MAX),
                signer,
            });
        }
        Ok(())
    }

    /// Verify a batch concurrently. Results are emitted on the returned
    /// channel in input order; sending `()` on the abort handle stops the
    /// worker before its next emission. Dropping the handle without
    /// signalling lets the batch run to completion.
    pub fn verify_headers<C>(
        &self,
        chain: Arc<C>,
        headers: Vec<Header>,
    ) -> (mpsc::Sender<()>, mpsc::Receiver<Result<(), BorConsensusError>>)
    where
        C: ChainReader + 'static,
        E: 'static,
        K: 'static,
        H: 'static,
    {
        let (abort_tx, abort_rx) = mpsc::channel::<()>();
        let (results_tx, results_rx) = mpsc::sync_channel(headers.len().max(1));

        let engine = self.clone();
        std::thread::spawn(move || {
            for i in 0..headers.len() {
                let result = engine.verify_header(&*chain, &headers[i], &headers[..i]);

                if abort_rx.try_recv().is_ok() {
                    tracing::trace!(target: "bor", index = i, "header batch verification aborted");
                    return;
                }
                if results_tx.send(result).is_err() {
                    return;
                }
            }
        });

        (abort_tx, results_rx)
    }

    /// Uncles are not supported; any ommer fails the block.
    pub fn verify_uncles(&self, ommers: &[Header]) -> Result<(), BorConsensusError> {
        if !ommers.is_empty() {
            return Err(BorConsensusError::UncleDetected);
        }
        Ok(())
    }
}
