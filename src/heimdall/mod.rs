//! Client for the Heimdall coordinator.
//!
//! Heimdall tracks the staking registry and the cross-chain event queue; the
//! engine fetches spans and state-sync event records from it at sprint
//! boundaries.

pub mod client;

use alloy_primitives::{Address, Bytes, B256};
use alloy_rlp::RlpEncodable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::bor::span::HeimdallSpan;

pub use client::HttpHeimdallClient;

/// A cross-chain event record as served by the clerk endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecordWithTime {
    pub id: u64,
    pub contract: Address,
    pub data: Bytes,
    pub tx_hash: B256,
    #[serde(rename = "bor_chain_id")]
    pub chain_id: String,
    /// Unix seconds the event was recorded at.
    #[serde(rename = "record_time")]
    pub time: u64,
}

/// Time-free form RLP-encoded into `commitState` payloads.
#[derive(RlpEncodable)]
struct EventRecord<'a> {
    id: u64,
    contract: Address,
    data: &'a Bytes,
    tx_hash: B256,
    chain_id: &'a str,
}

impl EventRecordWithTime {
    /// RLP bytes handed to the state-receiver contract.
    pub fn record_bytes(&self) -> Vec<u8> {
        alloy_rlp::encode(EventRecord {
            id: self.id,
            contract: self.contract,
            data: &self.data,
            tx_hash: self.tx_hash,
            chain_id: &self.chain_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeimdallError {
    /// Transport-level failures exhausted the retry budget.
    #[error("heimdall unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },
    /// Terminal HTTP status (4xx); retrying would not help.
    #[error("heimdall request failed with status {status}")]
    Status { status: u16 },
    #[error("heimdall response decode failed: {0}")]
    Decode(String),
    #[error("invalid heimdall url: {0}")]
    Url(String),
    /// The client was closed while a fetch was in flight.
    #[error("heimdall client is shut down")]
    ShutdownDetected,
}

/// Coordinator capability consumed by the engine. Implementations retry
/// transient failures internally and surface permanent errors.
pub trait HeimdallClient: Send + Sync {
    /// Span `id` with its validator set and producer selection.
    fn span(&self, id: u64) -> Result<HeimdallSpan, HeimdallError>;

    /// Event records with `id >= from_id` recorded strictly before
    /// `to_time`, ascending by id.
    fn state_sync_events(
        &self,
        from_id: u64,
        to_time: u64,
    ) -> Result<Vec<EventRecordWithTime>, HeimdallError>;

    /// Release pooled connections; subsequent fetches fail with
    /// [`HeimdallError::ShutdownDetected`]. Idempotent.
    fn close(&self);
}
