//! `bor` RPC namespace: snapshot and author exposure.
//!
//! The crate only defines the API type; hosting the server is the node's
//! job. The namespace is private (not part of the public eth surface).

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use jsonrpsee::{core::RpcResult, proc_macros::rpc, types::ErrorObject};
use serde::{Deserialize, Serialize};

use crate::consensus::bor::{Snapshot, Validator};

/// RPC namespace.
pub const BOR_NAMESPACE: &str = "bor";
/// RPC version.
pub const BOR_API_VERSION: &str = "1.0";
/// The namespace is not exposed publicly.
pub const BOR_API_PUBLIC: bool = false;

/// Snapshot access the RPC layer needs; the node wires this to the engine
/// together with its chain reader.
pub trait SnapshotRpcProvider: Send + Sync {
    fn snapshot_by_number(&self, number: u64) -> Option<Snapshot>;
    fn snapshot_by_hash(&self, hash: B256) -> Option<Snapshot>;
    /// Recovered sealer of the canonical block at `number`.
    fn author_of(&self, number: u64) -> Option<Address>;
}

/// Wire form of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub number: u64,
    pub hash: String,
    pub validators: Vec<Validator>,
    pub proposer: Option<Address>,
    /// block number -> signer of the recent-signer window
    pub recents: BTreeMap<String, String>,
}

impl From<Snapshot> for SnapshotResult {
    fn from(snapshot: Snapshot) -> Self {
        let recents = snapshot
            .recent_signers
            .iter()
            .map(|(number, signer)| (number.to_string(), format!("{signer:#x}")))
            .collect();

        Self {
            number: snapshot.number,
            hash: format!("{:#x}", snapshot.hash),
            proposer: snapshot.validator_set.proposer.as_ref().map(|p| p.address),
            validators: snapshot.validator_set.validators,
            recents,
        }
    }
}

#[rpc(server, namespace = "bor")]
pub trait BorApi {
    /// Snapshot at a block number, given as hex ("0x40") or decimal.
    #[method(name = "getSnapshot")]
    async fn get_snapshot(&self, block_number: String) -> RpcResult<Option<SnapshotResult>>;

    /// Snapshot at a specific block hash.
    #[method(name = "getSnapshotAtHash")]
    async fn get_snapshot_at_hash(&self, hash: B256) -> RpcResult<Option<SnapshotResult>>;

    /// Sealer of the canonical block at the given number.
    #[method(name = "getAuthor")]
    async fn get_author(&self, block_number: String) -> RpcResult<Option<Address>>;
}

pub struct BorApiImpl<P> {
    provider: Arc<P>,
}

impl<P> BorApiImpl<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

fn parse_block_number(block_number: &str) -> RpcResult<u64> {
    let parsed = if let Some(hex) = block_number.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        block_number.parse::<u64>()
    };

    parsed.map_err(|err| {
        tracing::debug!(target: "bor::rpc", %block_number, %err, "invalid block number parameter");
        ErrorObject::owned(-32602, "Invalid block number format", None::<()>)
    })
}

#[async_trait::async_trait]
impl<P: SnapshotRpcProvider + 'static> BorApiServer for BorApiImpl<P> {
    async fn get_snapshot(&self, block_number: String) -> RpcResult<Option<SnapshotResult>> {
        let number = parse_block_number(&block_number)?;
        Ok(self.provider.snapshot_by_number(number).map(Into::into))
    }

    async fn get_snapshot_at_hash(&self, hash: B256) -> RpcResult<Option<SnapshotResult>> {
        Ok(self.provider.snapshot_by_hash(hash).map(Into::into))
    }

    async fn get_author(&self, block_number: String) -> RpcResult<Option<Address>> {
        let number = parse_block_number(&block_number)?;
        Ok(self.provider.author_of(number))
    }
}
