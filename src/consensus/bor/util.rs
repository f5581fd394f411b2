use alloy_consensus::Header;
use alloy_primitives::{bytes::BytesMut, keccak256, Address, B256, U256};
use alloy_rlp::Encodable;
use bytes::BufMut;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use schnellru::{ByLength, LruMap};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, SECP256K1,
};

use super::constants::EXTRA_SEAL;
use super::error::BorConsensusError;

const RECOVERED_SIGNER_CACHE_NUM: u32 = 4096;

lazy_static! {
    // recovered signer cache keyed by header hash (stable across equal headers)
    static ref RECOVERED_SIGNER_CACHE: RwLock<LruMap<B256, Address, ByLength>> =
        RwLock::new(LruMap::new(ByLength::new(RECOVERED_SIGNER_CACHE_NUM)));
}

/// Hash signed by the sealer: keccak over the header RLP with the 65-byte
/// seal stripped from `extra_data`.
pub fn seal_hash(header: &Header) -> Result<B256, BorConsensusError> {
    Ok(keccak256(seal_rlp(header)?))
}

/// The exact byte string handed to the signer. Fails when `extra_data` is
/// too short to hold a seal.
pub fn seal_rlp(header: &Header) -> Result<Vec<u8>, BorConsensusError> {
    if header.extra_data.len() < EXTRA_SEAL {
        return Err(BorConsensusError::MissingSignature);
    }
    let mut out = BytesMut::new();
    encode_seal_header(header, &mut out);
    Ok(out.to_vec())
}

fn encode_seal_header(header: &Header, out: &mut dyn BufMut) {
    rlp_header(header).encode(out);
    Encodable::encode(&header.parent_hash, out);
    Encodable::encode(&header.ommers_hash, out);
    Encodable::encode(&header.beneficiary, out);
    Encodable::encode(&header.state_root, out);
    Encodable::encode(&header.transactions_root, out);
    Encodable::encode(&header.receipts_root, out);
    Encodable::encode(&header.logs_bloom, out);
    Encodable::encode(&header.difficulty, out);
    Encodable::encode(&U256::from(header.number), out);
    Encodable::encode(&header.gas_limit, out);
    Encodable::encode(&header.gas_used, out);
    Encodable::encode(&header.timestamp, out);
    Encodable::encode(&header.extra_data[..header.extra_data.len() - EXTRA_SEAL], out);
    Encodable::encode(&header.mix_hash, out);
    Encodable::encode(&header.nonce, out);
}

fn rlp_header(header: &Header) -> alloy_rlp::Header {
    let mut rlp_head = alloy_rlp::Header { list: true, payload_length: 0 };

    rlp_head.payload_length += header.parent_hash.length();
    rlp_head.payload_length += header.ommers_hash.length();
    rlp_head.payload_length += header.beneficiary.length();
    rlp_head.payload_length += header.state_root.length();
    rlp_head.payload_length += header.transactions_root.length();
    rlp_head.payload_length += header.receipts_root.length();
    rlp_head.payload_length += header.logs_bloom.length();
    rlp_head.payload_length += header.difficulty.length();
    rlp_head.payload_length += U256::from(header.number).length();
    rlp_head.payload_length += header.gas_limit.length();
    rlp_head.payload_length += header.gas_used.length();
    rlp_head.payload_length += header.timestamp.length();
    rlp_head.payload_length +=
        header.extra_data[..header.extra_data.len() - EXTRA_SEAL].length();
    rlp_head.payload_length += header.mix_hash.length();
    rlp_head.payload_length += header.nonce.length();

    rlp_head
}

/// Recover the sealing address from the seal in `extra_data`.
///
/// Results are memoized in a process-wide LRU keyed by the full header hash,
/// so repeated verification of the same header hits the cache.
pub fn ecrecover(header: &Header) -> Result<Address, BorConsensusError> {
    let hash = header.hash_slow();

    {
        let mut cache = RECOVERED_SIGNER_CACHE.write();
        if let Some(signer) = cache.get(&hash) {
            return Ok(*signer);
        }
    }

    let extra_data = &header.extra_data;
    if extra_data.len() < EXTRA_SEAL {
        return Err(BorConsensusError::MissingSignature);
    }

    let signature_offset = extra_data.len() - EXTRA_SEAL;
    let recovery_byte = extra_data[extra_data.len() - 1] as i32;
    let signature_bytes = &extra_data[signature_offset..extra_data.len() - 1];

    let recovery_id =
        RecoveryId::from_i32(recovery_byte).map_err(|_| BorConsensusError::InvalidSignature)?;
    let signature = RecoverableSignature::from_compact(signature_bytes, recovery_id)
        .map_err(|_| BorConsensusError::InvalidSignature)?;

    let message = Message::from_digest(seal_hash(header)?.0);
    let public = SECP256K1
        .recover_ecdsa(&message, &signature)
        .map_err(|_| BorConsensusError::InvalidSignature)?;

    let signer =
        Address::from_slice(&keccak256(&public.serialize_uncompressed()[1..])[12..]);

    {
        let mut cache = RECOVERED_SIGNER_CACHE.write();
        cache.insert(hash, signer);
    }

    Ok(signer)
}

/// Wall-clock seconds since the unix epoch.
pub fn present_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
