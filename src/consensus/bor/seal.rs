//! Block preparation and sealing.
//!
//! `prepare` stamps the consensus fields onto a template header; `seal`
//! waits out the producer delay cooperatively and emits the signed block.

use std::time::Duration;

use alloy_consensus::{Block, Header};
use alloy_primitives::{Address, B256, B64, U256};

use super::bor::Bor;
use super::constants::{EXTRA_SEAL, EXTRA_VANITY, VALIDATOR_BYTES_LEN};
use super::contracts::{BlockRef, EvmCaller};
use super::error::BorConsensusError;
use super::provider::{ChainReader, KvStore};
use super::util;
use crate::config::BorConfig;
use crate::heimdall::HeimdallClient;

/// Seconds block `number` must trail its parent by when sealed from the
/// given succession slot. Sprint-opening blocks use the producer delay as
/// the base, everything else the period.
pub fn calc_producer_delay(number: u64, succession: u64, config: &BorConfig) -> u64 {
    let base = if number % config.sprint == 0 { config.producer_delay } else { config.period };
    base + succession * config.backup_multiplier
}

impl<E, K, H> Bor<E, K, H>
where
    E: EvmCaller,
    K: KvStore,
    H: HeimdallClient,
{
    /// Initialize the consensus fields of a header template built on the
    /// current chain head.
    pub fn prepare<C: ChainReader>(
        &self,
        chain: &C,
        header: &mut Header,
    ) -> Result<(), BorConsensusError> {
        let number = header.number;
        if number == 0 {
            return Err(BorConsensusError::UnknownBlock);
        }

        header.beneficiary = Address::ZERO;
        header.nonce = B64::ZERO;
        header.mix_hash = B256::ZERO;

        let snap = self.snapshot(chain, number - 1, header.parent_hash, &[])?;
        let signer = self.signer.read().signer;
        let succession = snap
            .succession(signer)
            .ok_or(BorConsensusError::UnauthorizedSigner { number, signer })?;
        header.difficulty = U256::from(snap.validator_set.len() as u64 - succession);

        // Vanity is fixed-width: pad or truncate whatever the miner set.
        let mut extra = header.extra_data.to_vec();
        extra.resize(EXTRA_VANITY, 0);

        if (number + 1) % self.config.sprint == 0 {
            let mut validators = self
                .validator_contract
                .current_validators(BlockRef::Hash(header.parent_hash), number + 1)?;
            validators.sort_by(|a, b| a.address.cmp(&b.address));

            extra.reserve(validators.len() * VALIDATOR_BYTES_LEN);
            for validator in &validators {
                extra.extend_from_slice(&validator.header_bytes());
            }
        }

        // Seal placeholder, overwritten by `seal`.
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        header.extra_data = extra.into();

        let parent = chain
            .header(header.parent_hash, number - 1)
            .ok_or(BorConsensusError::UnknownAncestor)?;
        let earliest = parent.timestamp + calc_producer_delay(number, succession, &self.config);
        header.timestamp = earliest.max(util::present_timestamp());

        Ok(())
    }

    /// Seal `block` once its producer slot opens.
    ///
    /// Spawns a task that waits on the slot timer or the stop signal,
    /// whichever fires first; on expiry the header RLP is signed with the
    /// authorized credentials and the sealed block is offered to `results`
    /// without blocking. A stopped task emits nothing.
    pub fn seal<C, T>(
        &self,
        chain: &C,
        block: Block<T>,
        results: tokio::sync::mpsc::Sender<Block<T>>,
        stop: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<(), BorConsensusError>
    where
        C: ChainReader,
        T: Send + 'static,
    {
        let number = block.header.number;
        if number == 0 {
            return Err(BorConsensusError::UnknownBlock);
        }

        // For 0-period chains, never spin sealing empty blocks.
        if self.config.period == 0 && block.body.transactions.is_empty() {
            tracing::info!(target: "bor::seal", "Sealing paused, waiting for transactions");
            return Ok(());
        }

        // Copy the credentials out so the lock is not held across the wait.
        let (signer, sign_fn) = {
            let guard = self.signer.read();
            (guard.signer, guard.sign_fn.clone())
        };

        let snap = self.snapshot(chain, number - 1, block.header.parent_hash, &[])?;
        if !snap.validator_set.has_address(signer) {
            tracing::info!(target: "bor::seal", %signer, "Sealing paused, signer not authorized");
            return Err(BorConsensusError::UnauthorizedSigner { number, signer });
        }
        let succession = snap
            .succession(signer)
            .ok_or(BorConsensusError::UnauthorizedSigner { number, signer })?;

        let delay =
            Duration::from_secs(block.header.timestamp.saturating_sub(util::present_timestamp()));
        tracing::info!(
            target: "bor::seal",
            number,
            succession,
            delay_secs = delay.as_secs(),
            "waiting for sealing slot"
        );

        let mut block = block;
        let mut stop = stop;
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut stop => {
                    tracing::trace!(target: "bor::seal", number, "sealing aborted");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let mut header = block.header;
            let payload = match util::seal_rlp(&header) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!(target: "bor::seal", number, %err, "cannot encode header for sealing");
                    return;
                }
            };
            match sign_fn(signer, &payload) {
                Ok(signature) => {
                    let mut extra = header.extra_data.to_vec();
                    let start = extra.len() - EXTRA_SEAL;
                    extra[start..].copy_from_slice(&signature);
                    header.extra_data = extra.into();
                }
                Err(err) => {
                    tracing::error!(target: "bor::seal", number, %err, "signing failed while sealing");
                    return;
                }
            }

            block.header = header;
            if results.try_send(block).is_err() {
                tracing::warn!(target: "bor::seal", number, "sealing result is not read by miner");
            }
        });

        Ok(())
    }
}
