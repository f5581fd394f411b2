//! Bor Proof-of-Authority consensus core.
//!
//! Re-exports the pieces external crates need:
//! `use bor_consensus::consensus::bor::{Bor, Snapshot, ValidatorSet, ...};`

pub mod bor;
pub mod commit;
pub mod constants;
pub mod contracts;
pub mod error;
pub mod provider;
pub mod seal;
pub mod snapshot;
pub mod span;
pub mod util;
pub mod validation;
pub mod validator;

pub use bor::{Bor, SignerFn};
pub use constants::{EXTRA_SEAL, EXTRA_VANITY, SYSTEM_ADDRESS, VALIDATOR_BYTES_LEN};
pub use contracts::{BlockRef, EvmCaller, StateWriter, SystemMessage};
pub use error::{BorConsensusError, ContractCallError};
pub use provider::{ChainReader, InMemoryKvStore, KvStore};
pub use seal::calc_producer_delay;
pub use snapshot::{Snapshot, CHECKPOINT_INTERVAL};
pub use span::{HeimdallSpan, Span};
pub use util::{ecrecover, seal_hash};
pub use validator::{parse_validators, MinimalVal, Validator, ValidatorSet};

#[cfg(test)]
mod tests;
