//! Typed calls against the on-chain consensus contracts.
//!
//! Contract-call encoding is first-class: every read and commit goes through
//! a `sol!`-generated call type, so a pack/unpack mismatch is a returned
//! error rather than a byte-level surprise.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall};

use super::constants::{SYSTEM_ADDRESS, SYSTEM_MESSAGE_GAS};
use super::error::ContractCallError;
use super::span::Span;
use super::validator::Validator;

sol! {
    function getBorValidators(uint256 number) external view returns (address[] memory addresses, uint256[] memory powers);
    function getCurrentSpan() external view returns (uint256 number, uint256 startBlock, uint256 endBlock);
    function commitSpan(uint256 newSpan, uint256 startBlock, uint256 endBlock, bytes calldata validatorBytes, bytes calldata producerBytes) external;
    function lastStateId() external view returns (uint256);
    function commitState(uint256 syncTime, bytes calldata recordBytes) external;
}

/// Block the EVM read executes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Hash(B256),
    Latest,
}

/// Read-only EVM call capability supplied by the node.
pub trait EvmCaller: Send + Sync {
    fn call(&self, to: Address, data: Bytes, block: BlockRef) -> Result<Bytes, ContractCallError>;
}

/// Mutable state capability handed into block finalization.
pub trait StateWriter {
    /// Execute a system message against the pending state.
    fn apply_system_message(&mut self, msg: &SystemMessage) -> Result<(), ContractCallError>;
    /// Overwrite an account's code (hard-fork block-alloc path).
    fn set_code(&mut self, address: Address, code: Bytes);
    /// Flush pending journal entries; called before a failed system
    /// message's error is dropped so prior writes survive.
    fn finalise(&mut self);
}

/// An EVM call from the reserved system sender. Nonce and gas-payment
/// checks do not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMessage {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub gas: u64,
    pub gas_price: U256,
    pub value: U256,
}

impl SystemMessage {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            from: SYSTEM_ADDRESS,
            to,
            data,
            gas: SYSTEM_MESSAGE_GAS,
            gas_price: U256::ZERO,
            value: U256::ZERO,
        }
    }
}

fn decode_error(to: Address, err: alloy_sol_types::Error) -> ContractCallError {
    ContractCallError { to, reason: format!("return data decode: {err}") }
}

/// Reads and commit payloads against the validator-set contract.
#[derive(Debug)]
pub struct ValidatorContract<E> {
    address: Address,
    evm: Arc<E>,
}

impl<E: EvmCaller> ValidatorContract<E> {
    pub fn new(address: Address, evm: Arc<E>) -> Self {
        Self { address, evm }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// The span the contract currently considers authoritative.
    pub fn current_span(&self, block: BlockRef) -> Result<Span, ContractCallError> {
        let data = getCurrentSpanCall {}.abi_encode();
        let ret = self.evm.call(self.address, data.into(), block)?;
        let decoded =
            getCurrentSpanCall::abi_decode_returns(&ret).map_err(|e| decode_error(self.address, e))?;

        Ok(Span {
            id: uint(self.address, decoded.number)?,
            start_block: uint(self.address, decoded.startBlock)?,
            end_block: uint(self.address, decoded.endBlock)?,
        })
    }

    /// Validators authoritative for block `number`, read from the state at
    /// `block`.
    pub fn current_validators(
        &self,
        block: BlockRef,
        number: u64,
    ) -> Result<Vec<Validator>, ContractCallError> {
        let data = getBorValidatorsCall { number: U256::from(number) }.abi_encode();
        let ret = self.evm.call(self.address, data.into(), block)?;
        let decoded = getBorValidatorsCall::abi_decode_returns(&ret)
            .map_err(|e| decode_error(self.address, e))?;

        if decoded.addresses.len() != decoded.powers.len() {
            return Err(ContractCallError {
                to: self.address,
                reason: "validator address/power arity mismatch".to_string(),
            });
        }

        let mut validators = Vec::with_capacity(decoded.addresses.len());
        for (address, power) in decoded.addresses.into_iter().zip(decoded.powers) {
            let power = uint(self.address, power)?;
            let power = i64::try_from(power).map_err(|_| ContractCallError {
                to: self.address,
                reason: "voting power exceeds i64".to_string(),
            })?;
            validators.push(Validator::new(address, power));
        }
        Ok(validators)
    }

    /// ABI payload for `commitSpan`.
    pub fn commit_span_input(
        &self,
        span: &Span,
        validator_bytes: Vec<u8>,
        producer_bytes: Vec<u8>,
    ) -> Bytes {
        commitSpanCall {
            newSpan: U256::from(span.id),
            startBlock: U256::from(span.start_block),
            endBlock: U256::from(span.end_block),
            validatorBytes: validator_bytes.into(),
            producerBytes: producer_bytes.into(),
        }
        .abi_encode()
        .into()
    }
}

/// Reads and commit payloads against the state-receiver contract.
#[derive(Debug)]
pub struct StateReceiverContract<E> {
    address: Address,
    evm: Arc<E>,
}

impl<E: EvmCaller> StateReceiverContract<E> {
    pub fn new(address: Address, evm: Arc<E>) -> Self {
        Self { address, evm }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Highest state-sync id committed as of block `number`.
    pub fn last_state_id(&self, number: u64) -> Result<u64, ContractCallError> {
        let data = lastStateIdCall {}.abi_encode();
        let ret = self.evm.call(self.address, data.into(), BlockRef::Number(number))?;
        let id =
            lastStateIdCall::abi_decode_returns(&ret).map_err(|e| decode_error(self.address, e))?;
        uint(self.address, id)
    }

    /// ABI payload for `commitState`.
    pub fn commit_state_input(&self, sync_time: u64, record_bytes: Vec<u8>) -> Bytes {
        commitStateCall { syncTime: U256::from(sync_time), recordBytes: record_bytes.into() }
            .abi_encode()
            .into()
    }
}

fn uint(to: Address, value: U256) -> Result<u64, ContractCallError> {
    u64::try_from(value)
        .map_err(|_| ContractCallError { to, reason: "uint256 exceeds u64".to_string() })
}
