//! Storage and chain seams consumed by the engine.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_consensus::Header;
use alloy_primitives::B256;
use parking_lot::RwLock;

use super::error::BorConsensusError;
use super::snapshot::Snapshot;

/// Key-value store used for checkpoint snapshot persistence. Writes are
/// idempotent; the underlying store serializes its own access.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String>;
}

/// Header access into the canonical chain plus any side forks the caller
/// tracks. Passed into engine operations by the chain, never stored.
pub trait ChainReader: Send + Sync {
    /// Header with the given hash at the given height, if known.
    fn header(&self, hash: B256, number: u64) -> Option<Header>;
    /// Canonical header at the given height, if known.
    fn header_by_number(&self, number: u64) -> Option<Header>;
}

impl<T: ChainReader + ?Sized> ChainReader for Arc<T> {
    fn header(&self, hash: B256, number: u64) -> Option<Header> {
        (**self).header(hash, number)
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        (**self).header_by_number(number)
    }
}

pub(crate) fn load_snapshot<K: KvStore + ?Sized>(db: &K, hash: B256) -> Option<Snapshot> {
    let raw = db.get(&Snapshot::store_key(hash))?;
    match Snapshot::from_store_bytes(&raw) {
        Ok(snap) => {
            tracing::trace!(target: "bor", %hash, number = snap.number, "loaded snapshot from store");
            Some(snap)
        }
        Err(err) => {
            tracing::warn!(target: "bor", %hash, %err, "discarding undecodable stored snapshot");
            None
        }
    }
}

pub(crate) fn store_snapshot<K: KvStore + ?Sized>(
    db: &K,
    snap: &Snapshot,
) -> Result<(), BorConsensusError> {
    let blob = snap.to_store_bytes()?;
    db.put(&Snapshot::store_key(snap.hash), &blob)
        .map_err(BorConsensusError::SnapshotStore)?;
    tracing::debug!(target: "bor", number = snap.number, hash = %snap.hash, "persisted snapshot");
    Ok(())
}

/// Heap-backed [`KvStore`] for tests and light embedders.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), String> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}
