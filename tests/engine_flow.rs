//! End-to-end flows against the public API: a two-validator chain is
//! produced with prepare/seal and re-verified block by block.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use alloy_consensus::{Block, BlockBody, Header, EMPTY_OMMER_ROOT_HASH};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolValue};
use parking_lot::RwLock;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use bor_consensus::consensus::bor::contracts::{
    getBorValidatorsCall, getCurrentSpanCall, lastStateIdCall,
};
use bor_consensus::consensus::bor::{
    BlockRef, Bor, BorConsensusError, ChainReader, ContractCallError, EvmCaller, InMemoryKvStore,
    SignerFn, Validator,
};
use bor_consensus::heimdall::HttpHeimdallClient;
use bor_consensus::BorConfig;

type Engine = Bor<FixedEvm, InMemoryKvStore, HttpHeimdallClient>;

#[derive(Clone)]
struct Keypair {
    secret: SecretKey,
    address: Address,
}

impl Keypair {
    fn new(seed: u8) -> Self {
        let secret = SecretKey::from_slice(&[seed; 32]).expect("32 non-zero bytes");
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        let address = Address::from_slice(&keccak256(&public.serialize_uncompressed()[1..])[12..]);
        Self { secret, address }
    }

    fn signer_fn(&self) -> SignerFn {
        let keypair = self.clone();
        Arc::new(move |_, payload: &[u8]| {
            let message = Message::from_digest(keccak256(payload).0);
            let signature = SECP256K1.sign_ecdsa_recoverable(&message, &keypair.secret);
            let (recovery_id, compact) = signature.serialize_compact();

            let mut out = [0u8; 65];
            out[..64].copy_from_slice(&compact);
            out[64] = recovery_id.to_i32() as u8;
            Ok(out)
        })
    }
}

#[derive(Default)]
struct MapChain {
    headers: RwLock<HashMap<B256, Header>>,
    canonical: RwLock<BTreeMap<u64, B256>>,
}

impl MapChain {
    fn insert(&self, header: Header) {
        let hash = header.hash_slow();
        self.canonical.write().insert(header.number, hash);
        self.headers.write().insert(hash, header);
    }
}

impl ChainReader for MapChain {
    fn header(&self, hash: B256, number: u64) -> Option<Header> {
        self.headers.read().get(&hash).filter(|h| h.number == number).cloned()
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        let hash = *self.canonical.read().get(&number)?;
        self.headers.read().get(&hash).cloned()
    }
}

/// Serves a fixed validator set for every contract read.
struct FixedEvm {
    validators: Vec<Validator>,
}

impl EvmCaller for FixedEvm {
    fn call(&self, to: Address, data: Bytes, _block: BlockRef) -> Result<Bytes, ContractCallError> {
        let selector: [u8; 4] =
            data.get(..4).and_then(|s| s.try_into().ok()).ok_or(ContractCallError {
                to,
                reason: "missing selector".to_string(),
            })?;

        if selector == getBorValidatorsCall::SELECTOR {
            let addresses: Vec<Address> = self.validators.iter().map(|v| v.address).collect();
            let powers: Vec<U256> =
                self.validators.iter().map(|v| U256::from(v.voting_power as u64)).collect();
            return Ok((addresses, powers).abi_encode_params().into());
        }
        if selector == getCurrentSpanCall::SELECTOR {
            return Ok((U256::ZERO, U256::ZERO, U256::ZERO).abi_encode_params().into());
        }
        if selector == lastStateIdCall::SELECTOR {
            return Ok(U256::ZERO.abi_encode().into());
        }
        Err(ContractCallError { to, reason: "unexpected selector".to_string() })
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .expect("sane clock")
        .as_secs()
}

fn setup(config: BorConfig, genesis_time: u64) -> (Engine, Arc<MapChain>, Vec<Keypair>, Header) {
    let mut keypairs = vec![Keypair::new(1), Keypair::new(2)];
    keypairs.sort_by_key(|k| k.address);

    let validators: Vec<Validator> =
        keypairs.iter().map(|k| Validator::new(k.address, 1)).collect();

    let engine = Bor::new(
        config,
        Arc::new(InMemoryKvStore::new()),
        Arc::new(FixedEvm { validators }),
        None,
    );

    let chain = Arc::new(MapChain::default());
    let genesis = Header {
        number: 0,
        timestamp: genesis_time,
        extra_data: vec![0u8; 97].into(),
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        ..Default::default()
    };
    chain.insert(genesis.clone());

    (engine, chain, keypairs, genesis)
}

fn empty_block(header: Header) -> Block<Bytes> {
    Block { header, body: BlockBody { transactions: vec![], ommers: vec![], withdrawals: None } }
}

async fn seal_and_wait(
    engine: &Engine,
    chain: &MapChain,
    block: Block<Bytes>,
) -> eyre::Result<Header> {
    let (results_tx, mut results_rx) = tokio::sync::mpsc::channel(1);
    let (_stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    engine.seal(chain, block, results_tx, stop_rx).map_err(|e| eyre::eyre!("seal: {e}"))?;

    let sealed = tokio::time::timeout(Duration::from_secs(5), results_rx.recv())
        .await?
        .ok_or_else(|| eyre::eyre!("sealing task dropped the block"))?;
    Ok(sealed.header)
}

/// Drive prepare -> seal for the snapshot's in-turn signer and hand the
/// sealed header back.
async fn produce(
    engine: &Engine,
    chain: &MapChain,
    keypairs: &[Keypair],
    parent: &Header,
) -> eyre::Result<Header> {
    let snap = engine
        .snapshot(chain, parent.number, parent.hash_slow(), &[])
        .map_err(|e| eyre::eyre!("snapshot: {e}"))?;
    let proposer = snap
        .validator_set
        .proposer
        .as_ref()
        .ok_or_else(|| eyre::eyre!("no proposer"))?
        .address;
    let keypair = keypairs
        .iter()
        .find(|k| k.address == proposer)
        .ok_or_else(|| eyre::eyre!("unknown proposer"))?;
    engine.authorize(keypair.address, keypair.signer_fn());

    let mut header = Header {
        number: parent.number + 1,
        parent_hash: parent.hash_slow(),
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        ..Default::default()
    };
    engine.prepare(chain, &mut header).map_err(|e| eyre::eyre!("prepare: {e}"))?;

    seal_and_wait(engine, chain, empty_block(header)).await
}

#[tokio::test]
async fn produced_chain_is_accepted_by_verification() -> eyre::Result<()> {
    // short slots keep the real-time sealing waits small
    let config = BorConfig {
        period: 1,
        sprint: 4,
        producer_delay: 2,
        backup_multiplier: 1,
        validator_contract: Address::with_last_byte(0x10),
        state_receiver_contract: Address::with_last_byte(0x11),
        chain_id: "137".to_string(),
        ..Default::default()
    };
    let (engine, chain, keypairs, genesis) = setup(config, now() - 2);

    let mut parent = genesis.clone();
    let mut headers = Vec::new();
    for _ in 0..5 {
        let header = produce(&engine, &chain, &keypairs, &parent).await?;
        chain.insert(header.clone());
        headers.push(header.clone());
        parent = header;
    }

    // block 1 belongs to the tie-break winner at full difficulty
    assert_eq!(
        engine.author(&headers[0]).map_err(|e| eyre::eyre!("{e}"))?,
        keypairs[0].address
    );
    for header in &headers {
        assert_eq!(header.difficulty, U256::from(2), "in-turn producer every block");
    }

    // period slots inside the sprint, producer delay on the sprint opener
    assert_eq!(headers[1].timestamp - headers[0].timestamp, 1);
    assert_eq!(headers[2].timestamp - headers[1].timestamp, 1);
    assert_eq!(headers[3].timestamp - headers[2].timestamp, 2, "block 4 opens a sprint");
    assert_eq!(headers[4].timestamp - headers[3].timestamp, 1);

    // block 3 closes the sprint and carries both validators (80 bytes)
    assert_eq!(headers[2].extra_data.len(), 32 + 80 + 65);

    for header in &headers {
        engine
            .verify_header(&*chain, header, &[])
            .map_err(|e| eyre::eyre!("verify {}: {e}", header.number))?;
    }

    // the whole range also verifies as a batch, in order
    let (_abort, results) = engine.verify_headers(chain.clone(), headers);
    let collected: Vec<_> = results.iter().collect();
    assert_eq!(collected.len(), 5);
    assert!(collected.iter().all(|r| r.is_ok()));
    Ok(())
}

#[tokio::test]
async fn out_of_turn_preparation_takes_the_backup_slot() -> eyre::Result<()> {
    let config = BorConfig {
        period: 2,
        sprint: 4,
        producer_delay: 6,
        backup_multiplier: 2,
        validator_contract: Address::with_last_byte(0x10),
        state_receiver_contract: Address::with_last_byte(0x11),
        chain_id: "137".to_string(),
        ..Default::default()
    };
    // genesis on the wall clock, so the prepared slot is not clamped
    let (engine, chain, keypairs, genesis) = setup(config, now());

    let backup = &keypairs[1];
    engine.authorize(backup.address, backup.signer_fn());

    let mut header = Header {
        number: 1,
        parent_hash: genesis.hash_slow(),
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        ..Default::default()
    };
    engine.prepare(&*chain, &mut header).map_err(|e| eyre::eyre!("prepare: {e}"))?;

    // succession 1 with backup_multiplier 2: parent time + 2 + 1*2
    assert_eq!(header.timestamp, genesis.timestamp + 4);
    assert_eq!(header.difficulty, U256::from(1));
    Ok(())
}

#[tokio::test]
async fn impatient_out_of_turn_blocks_are_too_soon() -> eyre::Result<()> {
    let config = BorConfig {
        period: 2,
        sprint: 4,
        producer_delay: 6,
        backup_multiplier: 2,
        validator_contract: Address::with_last_byte(0x10),
        state_receiver_contract: Address::with_last_byte(0x11),
        chain_id: "137".to_string(),
        ..Default::default()
    };
    // deep-past genesis: the impatient slot is already open, sealing is
    // instant, and only verification complains
    let (engine, chain, keypairs, genesis) = setup(config, now() - 10_000);

    let backup = &keypairs[1];
    engine.authorize(backup.address, backup.signer_fn());

    // one second short of the backup slot
    let header = Header {
        number: 1,
        parent_hash: genesis.hash_slow(),
        timestamp: genesis.timestamp + 3,
        difficulty: U256::from(1),
        extra_data: vec![0u8; 97].into(),
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        ..Default::default()
    };
    let sealed = seal_and_wait(&engine, &chain, empty_block(header)).await?;
    chain.insert(sealed.clone());

    assert_eq!(
        engine.verify_header(&*chain, &sealed, &[]),
        Err(BorConsensusError::BlockTooSoon { number: 1, succession: 1 })
    );

    // the same block one second later is acceptable
    let header = Header {
        number: 1,
        parent_hash: genesis.hash_slow(),
        timestamp: genesis.timestamp + 4,
        difficulty: U256::from(1),
        extra_data: vec![0u8; 97].into(),
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        ..Default::default()
    };
    let sealed = seal_and_wait(&engine, &chain, empty_block(header)).await?;
    chain.insert(sealed.clone());
    engine
        .verify_header(&*chain, &sealed, &[])
        .map_err(|e| eyre::eyre!("backup slot open: {e}"))?;
    Ok(())
}
