//! The Bor engine: shared handles plus the snapshot lookup path.
//!
//! The engine is a value-typed bundle of configuration and handles; the
//! chain owns it and passes its own reader into every operation, so no
//! back-reference from the engine to the chain exists.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_consensus::Header;
use alloy_primitives::{Address, B256, U256};
use parking_lot::RwLock;
use schnellru::{ByLength, LruMap};

use super::constants::SNAPSHOT_CACHE_SIZE;
use super::contracts::{BlockRef, EvmCaller, StateReceiverContract, ValidatorContract};
use super::error::BorConsensusError;
use super::provider::{load_snapshot, store_snapshot, ChainReader, KvStore};
use super::snapshot::{Snapshot, CHECKPOINT_INTERVAL};
use super::util;
use super::validator::ValidatorSet;
use crate::config::{BorConfig, GenesisAccountOverride};
use crate::heimdall::HeimdallClient;

/// Produces the 65-byte seal over the pre-seal header RLP.
pub type SignerFn =
    Arc<dyn Fn(Address, &[u8]) -> Result<[u8; 65], BorConsensusError> + Send + Sync>;

pub(crate) struct AuthorizedSigner {
    pub signer: Address,
    pub sign_fn: SignerFn,
}

/// Proof-of-Authority consensus engine backed by Heimdall.
pub struct Bor<E, K, H> {
    pub(crate) config: Arc<BorConfig>,
    pub(crate) db: Arc<K>,
    /// Snapshots for recent blocks, keyed by block hash.
    pub(crate) recents: Arc<RwLock<LruMap<B256, Snapshot, ByLength>>>,
    pub(crate) validator_contract: Arc<ValidatorContract<E>>,
    pub(crate) state_receiver: Arc<StateReceiverContract<E>>,
    /// `None` runs the engine without a coordinator: spans are generated
    /// in-process and state sync is skipped.
    pub(crate) heimdall: Option<Arc<H>>,
    pub(crate) signer: Arc<RwLock<AuthorizedSigner>>,
    /// Hard-fork code overrides, decoded from the config at construction.
    pub(crate) block_alloc: Arc<BTreeMap<u64, BTreeMap<Address, GenesisAccountOverride>>>,
}

impl<E, K, H> Clone for Bor<E, K, H> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            db: self.db.clone(),
            recents: self.recents.clone(),
            validator_contract: self.validator_contract.clone(),
            state_receiver: self.state_receiver.clone(),
            heimdall: self.heimdall.clone(),
            signer: self.signer.clone(),
            block_alloc: self.block_alloc.clone(),
        }
    }
}

impl<E, K, H> Bor<E, K, H>
where
    E: EvmCaller,
    K: KvStore,
    H: HeimdallClient,
{
    /// Build an engine from the chain config and the external handles.
    ///
    /// Panics when a `block_alloc` blob does not decode. A malformed
    /// genesis alloc is a configuration bug and must never surface inside
    /// block finalization.
    pub fn new(config: BorConfig, db: Arc<K>, evm: Arc<E>, heimdall: Option<Arc<H>>) -> Self {
        let validator_contract =
            Arc::new(ValidatorContract::new(config.validator_contract, evm.clone()));
        let state_receiver =
            Arc::new(StateReceiverContract::new(config.state_receiver_contract, evm));

        let mut block_alloc = BTreeMap::new();
        for (number, raw) in &config.block_alloc {
            let decoded: BTreeMap<Address, GenesisAccountOverride> =
                serde_json::from_value(raw.clone()).unwrap_or_else(|err| {
                    panic!("malformed genesis alloc for block {number}: {err}")
                });
            block_alloc.insert(*number, decoded);
        }

        let unauthorized: SignerFn = Arc::new(|_, _| {
            Err(BorConsensusError::Sign("no signer authorized".to_string()))
        });

        Self {
            config: Arc::new(config),
            db,
            recents: Arc::new(RwLock::new(LruMap::new(ByLength::new(SNAPSHOT_CACHE_SIZE)))),
            validator_contract,
            state_receiver,
            heimdall,
            signer: Arc::new(RwLock::new(AuthorizedSigner {
                signer: Address::ZERO,
                sign_fn: unauthorized,
            })),
            block_alloc: Arc::new(block_alloc),
        }
    }

    pub fn config(&self) -> &BorConfig {
        &self.config
    }

    /// Inject the local sealing credentials. Exclusive with in-flight
    /// readers; `seal` copies the pair under a read lock.
    pub fn authorize(&self, signer: Address, sign_fn: SignerFn) {
        let mut guard = self.signer.write();
        guard.signer = signer;
        guard.sign_fn = sign_fn;
    }

    /// Address that sealed `header`.
    pub fn author(&self, header: &Header) -> Result<Address, BorConsensusError> {
        util::ecrecover(header)
    }

    /// Hash the sealer signs: header hash with the seal bytes excluded.
    pub fn seal_hash(&self, header: &Header) -> Result<B256, BorConsensusError> {
        util::seal_hash(header)
    }

    /// Difficulty a block built by the local signer on `parent` would carry.
    pub fn calc_difficulty<C: ChainReader>(
        &self,
        chain: &C,
        parent: &Header,
    ) -> Result<U256, BorConsensusError> {
        let snap = self.snapshot(chain, parent.number, parent.hash_slow(), &[])?;
        let signer = self.signer.read().signer;
        snap.difficulty(signer)
            .map(U256::from)
            .ok_or(BorConsensusError::UnauthorizedSigner { number: parent.number + 1, signer })
    }

    /// Release the Heimdall connection pool. Part of the shutdown path;
    /// safe to call more than once.
    pub fn stop_heimdall_client(&self) {
        if let Some(heimdall) = &self.heimdall {
            heimdall.close();
        }
    }

    /// Full engine shutdown.
    pub fn close(&self) {
        self.stop_heimdall_client();
    }

    /// Authority snapshot at `(number, hash)`.
    ///
    /// Walks back through the in-memory cache, the persistent store at
    /// checkpoint blocks, and finally header-by-header towards a known
    /// anchor, preferring headers from the `parents` batch over chain
    /// lookups. Collected headers are replayed forward onto the anchor.
    pub fn snapshot<C: ChainReader>(
        &self,
        chain: &C,
        number: u64,
        hash: B256,
        parents: &[Header],
    ) -> Result<Snapshot, BorConsensusError> {
        let mut number = number;
        let mut hash = hash;
        let mut parents = parents.to_vec();
        let mut headers: Vec<Header> = Vec::new();

        let anchor = loop {
            if let Some(snap) = self.recents.write().get(&hash) {
                break snap.clone();
            }

            if number % CHECKPOINT_INTERVAL == 0 {
                if let Some(snap) = load_snapshot(&*self.db, hash) {
                    break snap;
                }
            }

            if number == 0 {
                break self.materialize_genesis(chain)?;
            }

            let header = match parents.pop() {
                Some(header) => {
                    if header.hash_slow() != hash || header.number != number {
                        return Err(BorConsensusError::UnknownAncestor);
                    }
                    header
                }
                None => chain.header(hash, number).ok_or(BorConsensusError::UnknownAncestor)?,
            };

            hash = header.parent_hash;
            number -= 1;
            headers.push(header);
        };

        // Replay in chain order onto the anchor.
        headers.reverse();
        let snap = anchor.apply(&headers, &self.config)?;

        self.recents.write().insert(snap.hash, snap.clone());
        if snap.number % CHECKPOINT_INTERVAL == 0 && !headers.is_empty() {
            store_snapshot(&*self.db, &snap)?;
        }
        Ok(snap)
    }

    /// Build and persist the genesis snapshot from the validator contract.
    fn materialize_genesis<C: ChainReader>(
        &self,
        chain: &C,
    ) -> Result<Snapshot, BorConsensusError> {
        let genesis = chain.header_by_number(0).ok_or(BorConsensusError::UnknownAncestor)?;

        let validators = self.validator_contract.current_validators(BlockRef::Number(0), 1)?;
        let validator_set = ValidatorSet::new(validators)?;
        let snap = Snapshot::new(0, genesis.hash_slow(), validator_set);

        store_snapshot(&*self.db, &snap)?;
        tracing::info!(target: "bor", hash = %snap.hash, "stored genesis snapshot");
        Ok(snap)
    }
}
