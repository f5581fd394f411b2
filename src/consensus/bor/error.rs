//! Consensus error taxonomy.
//!
//! Every rejection a verifier, sealer or committer can produce is a distinct
//! variant so the chain importer can decide quarantine per kind.

use alloy_primitives::Address;
use thiserror::Error;

use crate::heimdall::HeimdallError;

/// Failure of a read-only contract call through the EVM seam.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("contract call to {to} failed: {reason}")]
pub struct ContractCallError {
    /// Target contract.
    pub to: Address,
    /// Human-readable failure from the EVM backend or the ABI layer.
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BorConsensusError {
    // -- malformed input ---------------------------------------------------
    #[error("unknown block")]
    UnknownBlock,
    #[error("extra-data 32 byte vanity prefix missing")]
    MissingVanity,
    #[error("extra-data 65 byte signature suffix missing")]
    MissingSignature,
    #[error("non sprint-end block contains extra validator list")]
    ExtraValidators,
    #[error("invalid validator list in sprint-end extra-data")]
    InvalidSpanValidators,
    #[error("non-zero mix digest")]
    InvalidMixDigest,
    #[error("non empty uncle hash")]
    InvalidUncleHash,
    #[error("invalid difficulty")]
    InvalidDifficulty,
    #[error("uncles not allowed")]
    UncleDetected,

    // -- missing context ---------------------------------------------------
    #[error("unknown ancestor")]
    UnknownAncestor,
    #[error("block in the future")]
    FutureBlock,
    #[error("headers do not form a contiguous chain")]
    OutOfRangeChain,

    // -- chain rule violations ---------------------------------------------
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("block {number} sealed too soon by signer in succession slot {succession}")]
    BlockTooSoon { number: u64, succession: u64 },
    #[error("block {number} carries difficulty {got}, expected {expected} for signer {signer}")]
    WrongDifficulty {
        number: u64,
        expected: u64,
        got: u64,
        signer: Address,
    },
    #[error("unauthorized signer {signer} at block {number}")]
    UnauthorizedSigner { number: u64, signer: Address },
    #[error("signer {signer} recently signed, rejected at block {number}")]
    RecentlySigned { number: u64, signer: Address },
    #[error("validator list in sprint-end extra-data does not match snapshot at block {number}")]
    MismatchingValidators { number: u64 },
    #[error(
        "invalid state-sync record {event_id} at block {number}, last committed id {last_state_id}"
    )]
    InvalidStateReceived {
        number: u64,
        last_state_id: u64,
        event_id: u64,
    },
    #[error("validator set update rejected: {0}")]
    InvalidValidatorSetUpdate(&'static str),

    // -- external ----------------------------------------------------------
    #[error(transparent)]
    ContractCall(#[from] ContractCallError),
    #[error("span chain id {got} does not match engine chain id {expected}")]
    ChainIdMismatch { expected: String, got: String },
    #[error(transparent)]
    Heimdall(#[from] HeimdallError),

    // -- engine internal ---------------------------------------------------
    #[error("signature recovery failed")]
    InvalidSignature,
    #[error("signing failed: {0}")]
    Sign(String),
    #[error("snapshot store: {0}")]
    SnapshotStore(String),
    #[error("engine is shutting down")]
    ShutdownDetected,
}
