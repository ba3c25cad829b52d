//! ABI bindings for the access-credential contract.
//!
//! Uses alloy's `sol!` macro to generate call and event types for the subset
//! of the contract the engine touches.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{sol, SolCall, SolEvent};
use timetoken_types::{AccessLevel, Subject};

use crate::error::ChainError;
use crate::receipt::LogEntry;
use crate::OracleRequestParams;

sol! {
    /// Soulbound KYC credential gated by a Chainlink Functions request.
    interface IAccessCredential {
        /// Whether `user` holds the credential.
        function hasAccess(address user) external view returns (bool);

        /// Credential tier held by `user`, 0 if none.
        function level(address user) external view returns (uint8);

        /// Ask the DON to verify `user`; the callback mints on success.
        function requestVerification(
            address user,
            uint8 secretsSlot,
            uint64 secretsVersion,
            uint64 subscriptionId
        ) external returns (bytes32 requestId);

        /// Emitted by the fulfillment path when the credential is minted.
        event Minted(address indexed recipient, uint256 indexed tokenId, uint8 level);

        /// Standard ERC-721 transfer; a mint is a transfer from the zero address.
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

        /// Chainlink FunctionsClient request bookkeeping.
        event RequestSent(bytes32 indexed id);
    }
}

pub fn to_address(subject: &Subject) -> Address {
    Address::from(subject.to_bytes())
}

pub fn to_subject(address: &Address) -> Subject {
    Subject::from_bytes(address.0 .0)
}

pub fn encode_has_access(subject: &Subject) -> Vec<u8> {
    IAccessCredential::hasAccessCall {
        user: to_address(subject),
    }
    .abi_encode()
}

pub fn encode_level(subject: &Subject) -> Vec<u8> {
    IAccessCredential::levelCall {
        user: to_address(subject),
    }
    .abi_encode()
}

pub fn encode_request_verification(subject: &Subject, params: &OracleRequestParams) -> Vec<u8> {
    IAccessCredential::requestVerificationCall {
        user: to_address(subject),
        secretsSlot: params.secrets_slot,
        secretsVersion: params.secrets_version,
        subscriptionId: params.subscription_id,
    }
    .abi_encode()
}

pub fn decode_has_access(data: &[u8]) -> Result<bool, ChainError> {
    IAccessCredential::hasAccessCall::abi_decode_returns(data, true)
        .map(|ret| ret._0)
        .map_err(|e| ChainError::InvalidResponse(format!("hasAccess return: {e}")))
}

pub fn decode_level(data: &[u8]) -> Result<AccessLevel, ChainError> {
    IAccessCredential::levelCall::abi_decode_returns(data, true)
        .map(|ret| AccessLevel::new(ret._0))
        .map_err(|e| ChainError::InvalidResponse(format!("level return: {e}")))
}

fn word_from_u256(value: U256) -> B256 {
    B256::from(value.to_be_bytes::<32>())
}

/// Build the log the fulfillment path emits on mint.
pub fn minted_log(contract: &Subject, recipient: &Subject, token_id: u64, level: AccessLevel) -> LogEntry {
    LogEntry {
        address: contract.clone(),
        topics: vec![
            IAccessCredential::Minted::SIGNATURE_HASH,
            to_address(recipient).into_word(),
            word_from_u256(U256::from(token_id)),
        ],
        data: U256::from(level.get()).to_be_bytes::<32>().to_vec(),
    }
}

/// Build an ERC-721 mint (transfer from the zero address).
pub fn transfer_mint_log(contract: &Subject, to: &Subject, token_id: u64) -> LogEntry {
    LogEntry {
        address: contract.clone(),
        topics: vec![
            IAccessCredential::Transfer::SIGNATURE_HASH,
            Address::ZERO.into_word(),
            to_address(to).into_word(),
            word_from_u256(U256::from(token_id)),
        ],
        data: Vec::new(),
    }
}

/// Build the FunctionsClient `RequestSent` log.
pub fn request_sent_log(contract: &Subject, request_id: [u8; 32]) -> LogEntry {
    LogEntry {
        address: contract.clone(),
        topics: vec![
            IAccessCredential::RequestSent::SIGNATURE_HASH,
            B256::from(request_id),
        ],
        data: Vec::new(),
    }
}
