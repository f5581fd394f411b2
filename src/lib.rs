//! Bor (Proof-of-Authority) consensus engine.
//!
//! Validators are drawn from an external staking registry tracked by the
//! Heimdall coordinator and take turns sealing blocks in sprints and spans.
//! The crate provides the snapshot engine, the header verification pipeline,
//! block preparation/sealing and the sprint-boundary span/state-sync
//! committer. Chain storage, EVM execution and the RPC server are external
//! collaborators reached through the traits in [`consensus::bor`].

pub mod config;
pub mod consensus;
pub mod heimdall;
pub mod rpc;

pub use config::BorConfig;
pub use consensus::bor::{
    Bor, BorConsensusError, ChainReader, EvmCaller, KvStore, Snapshot, StateWriter, Validator,
    ValidatorSet,
};
