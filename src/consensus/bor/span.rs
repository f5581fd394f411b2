//! Span types shared with the Heimdall coordinator.

use serde::{Deserialize, Serialize};

use super::validator::{Validator, ValidatorSet};

/// A range of blocks over which one validator set is authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    #[serde(rename = "span_id")]
    pub id: u64,
    pub start_block: u64,
    pub end_block: u64,
}

/// Span as served by Heimdall, extended with the validator set and the
/// producer selection for the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeimdallSpan {
    #[serde(flatten)]
    pub span: Span,
    pub validator_set: ValidatorSet,
    pub selected_producers: Vec<Validator>,
    #[serde(rename = "bor_chain_id")]
    pub chain_id: String,
}
