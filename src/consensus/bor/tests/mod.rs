//! Unit tests for the consensus core, plus the shared test harness.


use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_consensus::{Header, EMPTY_OMMER_ROOT_HASH};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolValue};
use parking_lot::RwLock;
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use super::bor::{Bor, SignerFn};
use super::constants::{EXTRA_SEAL, EXTRA_VANITY};
use super::contracts::{
    getBorValidatorsCall, getCurrentSpanCall, lastStateIdCall, BlockRef, EvmCaller, StateWriter,
    SystemMessage,
};
use super::error::ContractCallError;
use super::provider::{ChainReader, InMemoryKvStore};
use super::seal::calc_producer_delay;
use super::span::{HeimdallSpan, Span};
use super::util;
use super::validator::Validator;
use crate::config::BorConfig;
use crate::heimdall::{EventRecordWithTime, HeimdallClient, HeimdallError};

pub(crate) type TestEngine = Bor<MockEvm, InMemoryKvStore, MockHeimdall>;

/// Deterministic secp256k1 identity for sealing test headers.
#[derive(Clone)]
pub(crate) struct TestSigner {
    secret: SecretKey,
    pub address: Address,
}

impl TestSigner {
    pub fn new(seed: u8) -> Self {
        let secret = SecretKey::from_slice(&[seed; 32]).expect("32 non-zero bytes");
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        let address = Address::from_slice(&keccak256(&public.serialize_uncompressed()[1..])[12..]);
        Self { secret, address }
    }

    pub fn sign(&self, payload: &[u8]) -> [u8; 65] {
        let message = Message::from_digest(keccak256(payload).0);
        let signature = SECP256K1.sign_ecdsa_recoverable(&message, &self.secret);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&compact);
        out[64] = recovery_id.to_i32() as u8;
        out
    }

    pub fn signer_fn(&self) -> SignerFn {
        let signer = self.clone();
        Arc::new(move |_, payload| Ok(signer.sign(payload)))
    }

    /// Write the seal over the last 65 bytes of `extra_data`.
    pub fn seal_header(&self, header: &mut Header) {
        let payload = util::seal_rlp(header).expect("header long enough to seal");
        let signature = self.sign(&payload);

        let mut extra = header.extra_data.to_vec();
        let offset = extra.len() - EXTRA_SEAL;
        extra[offset..].copy_from_slice(&signature);
        header.extra_data = extra.into();
    }
}

/// Two identities ordered by address, so `.0` is always the tie-break
/// winner of a fresh equal-power set.
pub(crate) fn two_signers() -> (TestSigner, TestSigner) {
    let a = TestSigner::new(1);
    let b = TestSigner::new(2);
    if a.address < b.address {
        (a, b)
    } else {
        (b, a)
    }
}

/// Header-indexed chain stub.
#[derive(Default)]
pub(crate) struct TestChain {
    headers: RwLock<HashMap<B256, Header>>,
    canonical: RwLock<BTreeMap<u64, B256>>,
}

impl TestChain {
    pub fn insert(&self, header: Header) -> B256 {
        let hash = header.hash_slow();
        self.canonical.write().insert(header.number, hash);
        self.headers.write().insert(hash, header);
        hash
    }
}

impl ChainReader for TestChain {
    fn header(&self, hash: B256, number: u64) -> Option<Header> {
        self.headers.read().get(&hash).filter(|h| h.number == number).cloned()
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        let hash = *self.canonical.read().get(&number)?;
        self.headers.read().get(&hash).cloned()
    }
}

/// EVM stub serving the validator and state-receiver contract reads.
pub(crate) struct MockEvm {
    pub validators: RwLock<Vec<Validator>>,
    pub span: RwLock<Span>,
    pub last_state_id: RwLock<u64>,
    pub fail_calls: AtomicBool,
}

impl MockEvm {
    pub fn with_validators(validators: Vec<Validator>) -> Self {
        Self {
            validators: RwLock::new(validators),
            span: RwLock::new(Span::default()),
            last_state_id: RwLock::new(0),
            fail_calls: AtomicBool::new(false),
        }
    }
}

impl EvmCaller for MockEvm {
    fn call(&self, to: Address, data: Bytes, _block: BlockRef) -> Result<Bytes, ContractCallError> {
        if self.fail_calls.load(Ordering::Relaxed) || data.len() < 4 {
            return Err(ContractCallError { to, reason: "mock failure".to_string() });
        }

        let selector: [u8; 4] = data[..4].try_into().expect("4-byte selector");
        if selector == getBorValidatorsCall::SELECTOR {
            let validators = self.validators.read();
            let addresses: Vec<Address> = validators.iter().map(|v| v.address).collect();
            let powers: Vec<U256> =
                validators.iter().map(|v| U256::from(v.voting_power as u64)).collect();
            return Ok((addresses, powers).abi_encode_params().into());
        }
        if selector == getCurrentSpanCall::SELECTOR {
            let span = self.span.read();
            return Ok((
                U256::from(span.id),
                U256::from(span.start_block),
                U256::from(span.end_block),
            )
                .abi_encode_params()
                .into());
        }
        if selector == lastStateIdCall::SELECTOR {
            return Ok(U256::from(*self.last_state_id.read()).abi_encode().into());
        }

        Err(ContractCallError { to, reason: "unexpected selector".to_string() })
    }
}

/// Coordinator stub.
#[derive(Default)]
pub(crate) struct MockHeimdall {
    pub spans: RwLock<HashMap<u64, HeimdallSpan>>,
    pub events: RwLock<Vec<EventRecordWithTime>>,
    pub closed: AtomicBool,
}

impl HeimdallClient for MockHeimdall {
    fn span(&self, id: u64) -> Result<HeimdallSpan, HeimdallError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(HeimdallError::ShutdownDetected);
        }
        self.spans
            .read()
            .get(&id)
            .cloned()
            .ok_or(HeimdallError::Unavailable { attempts: 1, reason: "no such span".to_string() })
    }

    fn state_sync_events(
        &self,
        from_id: u64,
        to_time: u64,
    ) -> Result<Vec<EventRecordWithTime>, HeimdallError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(HeimdallError::ShutdownDetected);
        }
        let mut events: Vec<_> = self
            .events
            .read()
            .iter()
            .filter(|e| e.id >= from_id && e.time < to_time)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// State writer that records everything the committer does.
#[derive(Default)]
pub(crate) struct RecordingState {
    pub messages: Vec<SystemMessage>,
    pub code_overrides: Vec<(Address, Bytes)>,
    pub finalise_calls: usize,
    pub fail_messages: bool,
}

impl StateWriter for RecordingState {
    fn apply_system_message(&mut self, msg: &SystemMessage) -> Result<(), ContractCallError> {
        if self.fail_messages {
            return Err(ContractCallError { to: msg.to, reason: "reverted".to_string() });
        }
        self.messages.push(msg.clone());
        Ok(())
    }

    fn set_code(&mut self, address: Address, code: Bytes) {
        self.code_overrides.push((address, code));
    }

    fn finalise(&mut self) {
        self.finalise_calls += 1;
    }
}

pub(crate) fn test_config() -> BorConfig {
    BorConfig {
        period: 2,
        sprint: 4,
        producer_delay: 6,
        backup_multiplier: 2,
        validator_contract: Address::with_last_byte(0x10),
        state_receiver_contract: Address::with_last_byte(0x11),
        chain_id: "137".to_string(),
        ..Default::default()
    }
}

pub(crate) fn test_engine(
    config: BorConfig,
    validators: Vec<Validator>,
) -> (TestEngine, Arc<TestChain>, Arc<MockEvm>, Arc<MockHeimdall>) {
    let evm = Arc::new(MockEvm::with_validators(validators));
    let heimdall = Arc::new(MockHeimdall::default());
    let db = Arc::new(InMemoryKvStore::new());
    let engine = Bor::new(config, db, evm.clone(), Some(heimdall.clone()));
    (engine, Arc::new(TestChain::default()), evm, heimdall)
}

pub(crate) fn genesis_header(timestamp: u64) -> Header {
    Header {
        number: 0,
        timestamp,
        extra_data: vec![0u8; EXTRA_VANITY + EXTRA_SEAL].into(),
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        mix_hash: B256::ZERO,
        difficulty: U256::ZERO,
        ..Default::default()
    }
}

/// Unsealed child header with the given validator region and consensus
/// fields filled in.
pub(crate) fn unsealed_child(
    parent: &Header,
    validator_region: &[u8],
    timestamp: u64,
    difficulty: u64,
) -> Header {
    let mut extra = vec![0u8; EXTRA_VANITY];
    extra.extend_from_slice(validator_region);
    extra.extend_from_slice(&[0u8; EXTRA_SEAL]);

    Header {
        number: parent.number + 1,
        parent_hash: parent.hash_slow(),
        timestamp,
        difficulty: U256::from(difficulty),
        extra_data: extra.into(),
        ommers_hash: EMPTY_OMMER_ROOT_HASH,
        mix_hash: B256::ZERO,
        ..Default::default()
    }
}

/// Concatenated header bytes of `validators`, address-sorted.
pub(crate) fn region_bytes(validators: &[Validator]) -> Vec<u8> {
    let mut sorted = validators.to_vec();
    sorted.sort_by(|a, b| a.address.cmp(&b.address));
    sorted.iter().flat_map(|v| v.header_bytes()).collect()
}

/// Extend the chain by `count` in-turn blocks, sealing each with the
/// snapshot's proposer. Returns the new headers in chain order.
pub(crate) fn extend_chain(
    engine: &TestEngine,
    chain: &TestChain,
    signers: &[TestSigner],
    parent: &Header,
    count: usize,
) -> Vec<Header> {
    let config = engine.config().clone();
    let mut parent = parent.clone();
    let mut produced = Vec::with_capacity(count);

    for _ in 0..count {
        let number = parent.number + 1;
        let snap = engine
            .snapshot(chain, parent.number, parent.hash_slow(), &[])
            .expect("snapshot for parent");

        let proposer = snap.validator_set.proposer.as_ref().expect("proposer elected").address;
        let signer = signers
            .iter()
            .find(|s| s.address == proposer)
            .expect("proposer has a known key");

        let region = if (number + 1) % config.sprint == 0 {
            region_bytes(&snap.validator_set.validators)
        } else {
            Vec::new()
        };
        let timestamp = parent.timestamp + calc_producer_delay(number, 0, &config);
        let difficulty = snap.difficulty(proposer).expect("proposer difficulty");

        let mut header = unsealed_child(&parent, &region, timestamp, difficulty);
        signer.seal_header(&mut header);
        chain.insert(header.clone());

        produced.push(header.clone());
        parent = header;
    }

    produced
}
