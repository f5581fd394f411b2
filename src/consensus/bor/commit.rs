//! Sprint-boundary commits: span rotation and state-sync delivery.
//!
//! Executed while importing (`finalize`) and while producing
//! (`finalize_and_assemble`). Import swallows commit failures so a
//! coordinator outage never stalls the chain; the producer gets them back.

use alloy_consensus::{Block, BlockBody, Header};

use super::bor::Bor;
use super::contracts::{BlockRef, EvmCaller, StateWriter, SystemMessage};
use super::error::BorConsensusError;
use super::provider::{ChainReader, KvStore};
use super::span::{HeimdallSpan, Span};
use super::validator::MinimalVal;
use crate::heimdall::{EventRecordWithTime, HeimdallClient};

/// A record is committable only when it extends the sequence by exactly one,
/// belongs to this chain and was recorded before the window end.
pub(crate) fn validate_event_record(
    event: &EventRecordWithTime,
    number: u64,
    to_time: u64,
    last_state_id: u64,
    chain_id: &str,
) -> Result<(), BorConsensusError> {
    if last_state_id + 1 != event.id || event.chain_id != chain_id || event.time >= to_time {
        return Err(BorConsensusError::InvalidStateReceived {
            number,
            last_state_id,
            event_id: event.id,
        });
    }
    Ok(())
}

impl<E, K, H> Bor<E, K, H>
where
    E: EvmCaller,
    K: KvStore,
    H: HeimdallClient,
{
    /// Run the sprint-boundary work for an imported block. Commit failures
    /// are logged and dropped; import must survive a coordinator outage.
    pub fn finalize<C, S>(&self, chain: &C, header: &Header, state: &mut S)
    where
        C: ChainReader,
        S: StateWriter,
    {
        if header.number > 0 && header.number % self.config.sprint == 0 {
            if let Err(err) = self.check_and_commit_span(chain, header, state) {
                tracing::error!(target: "bor", number = header.number, %err, "error while committing span");
                return;
            }
            if let Err(err) = self.commit_states(chain, header, state) {
                tracing::error!(target: "bor", number = header.number, %err, "error while committing states");
                return;
            }
        }

        self.apply_block_alloc(header.number, state);
    }

    /// Same boundary work for a block being produced, then block assembly.
    /// The producer must learn about commit failures, so they propagate.
    pub fn finalize_and_assemble<C, S, T>(
        &self,
        chain: &C,
        header: Header,
        state: &mut S,
        transactions: Vec<T>,
    ) -> Result<Block<T>, BorConsensusError>
    where
        C: ChainReader,
        S: StateWriter,
    {
        if header.number > 0 && header.number % self.config.sprint == 0 {
            self.check_and_commit_span(chain, &header, state)?;
            self.commit_states(chain, &header, state)?;
        }

        self.apply_block_alloc(header.number, state);

        Ok(Block {
            header,
            body: BlockBody { transactions, ommers: Vec::new(), withdrawals: None },
        })
    }

    /// Whether block `number` is where the successor span must be committed.
    pub fn needs_span_commit(&self, span: &Span, number: u64) -> bool {
        // A span the contract has never seen has no end yet.
        if span.end_block == 0 {
            return true;
        }
        // First block of the span's final sprint.
        if span.end_block > self.config.sprint && span.end_block - self.config.sprint + 1 == number
        {
            return true;
        }
        false
    }

    fn check_and_commit_span<C, S>(
        &self,
        chain: &C,
        header: &Header,
        state: &mut S,
    ) -> Result<(), BorConsensusError>
    where
        C: ChainReader,
        S: StateWriter,
    {
        let span = self
            .validator_contract
            .current_span(BlockRef::Hash(header.parent_hash))?;
        if self.needs_span_commit(&span, header.number) {
            self.fetch_and_commit_span(&span, chain, header, state)?;
        }
        Ok(())
    }

    fn fetch_and_commit_span<C, S>(
        &self,
        current: &Span,
        chain: &C,
        header: &Header,
        state: &mut S,
    ) -> Result<(), BorConsensusError>
    where
        C: ChainReader,
        S: StateWriter,
    {
        let next_id = current.id + 1;
        let heimdall_span = match &self.heimdall {
            Some(client) => client.span(next_id)?,
            None => self.next_span_without_heimdall(chain, header, current)?,
        };

        if heimdall_span.chain_id != self.config.chain_id {
            return Err(BorConsensusError::ChainIdMismatch {
                expected: self.config.chain_id.clone(),
                got: heimdall_span.chain_id,
            });
        }

        let validators: Vec<MinimalVal> =
            heimdall_span.validator_set.validators.iter().map(|v| v.minimal()).collect();
        let producers: Vec<MinimalVal> =
            heimdall_span.selected_producers.iter().map(|v| v.minimal()).collect();

        let data = self.validator_contract.commit_span_input(
            &heimdall_span.span,
            alloy_rlp::encode(&validators),
            alloy_rlp::encode(&producers),
        );
        tracing::info!(
            target: "bor",
            span_id = heimdall_span.span.id,
            start_block = heimdall_span.span.start_block,
            end_block = heimdall_span.span.end_block,
            "committing span"
        );

        self.apply_system_message(state, SystemMessage::new(self.config.validator_contract, data));
        Ok(())
    }

    /// Deliver pending state-sync events up to the sprint window end.
    /// A gap, foreign record or late record stops the loop; everything
    /// committed before it stays committed.
    fn commit_states<C, S>(
        &self,
        chain: &C,
        header: &Header,
        state: &mut S,
    ) -> Result<(), BorConsensusError>
    where
        C: ChainReader,
        S: StateWriter,
    {
        let Some(client) = &self.heimdall else { return Ok(()) };

        let number = header.number;
        let mut last_state_id = self.state_receiver.last_state_id(number - 1)?;

        let window_header = chain
            .header_by_number(number - self.config.sprint)
            .ok_or(BorConsensusError::UnknownAncestor)?;
        let to_time = window_header.timestamp;

        let mut events = client.state_sync_events(last_state_id + 1, to_time)?;
        if let Some(&limit) = self.config.override_state_sync_records.get(&number) {
            events.truncate(limit);
        }
        tracing::info!(target: "bor", number, count = events.len(), "fetched state sync events");

        for event in &events {
            if event.id <= last_state_id {
                continue;
            }
            if let Err(err) =
                validate_event_record(event, number, to_time, last_state_id, &self.config.chain_id)
            {
                tracing::error!(target: "bor", %err, "invalid state-sync record, stopping");
                break;
            }

            let data = self
                .state_receiver
                .commit_state_input(event.time, event.record_bytes());
            self.apply_system_message(
                state,
                SystemMessage::new(self.config.state_receiver_contract, data),
            );
            last_state_id += 1;
        }

        Ok(())
    }

    // EVM failures of a system message are deliberately swallowed after a
    // finalise so writes made before the failure stick.
    fn apply_system_message<S: StateWriter>(&self, state: &mut S, msg: SystemMessage) {
        if let Err(err) = state.apply_system_message(&msg) {
            state.finalise();
            tracing::warn!(target: "bor", to = %msg.to, %err, "system message execution failed, state kept");
        }
    }

    /// Hard-fork mechanism: overwrite configured contract code in place.
    fn apply_block_alloc<S: StateWriter>(&self, number: u64, state: &mut S) {
        if let Some(allocs) = self.block_alloc.get(&number) {
            for (address, account) in allocs {
                tracing::info!(target: "bor", number, %address, "overriding contract code");
                state.set_code(*address, account.code.clone());
            }
        }
    }

    /// In-process span generation for coordinator-less runs. First span
    /// starts at block 256; each span covers a hundred sprints.
    fn next_span_without_heimdall<C: ChainReader>(
        &self,
        chain: &C,
        header: &Header,
        current: &Span,
    ) -> Result<HeimdallSpan, BorConsensusError> {
        let snap = self.snapshot(chain, header.number - 1, header.parent_hash, &[])?;

        let start_block = if current.end_block == 0 { 256 } else { current.end_block + 1 };
        let span = Span {
            id: current.id + 1,
            start_block,
            end_block: start_block + 100 * self.config.sprint - 1,
        };

        Ok(HeimdallSpan {
            span,
            selected_producers: snap.validator_set.validators.clone(),
            validator_set: snap.validator_set,
            chain_id: self.config.chain_id.clone(),
        })
    }
}
