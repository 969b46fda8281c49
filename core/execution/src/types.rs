// meridian/core/execution/src/types.rs

// Account, authorization and asset records plus the execution error types
use meridian_consensus::engine::EngineError;
use meridian_consensus::ledger::LedgerError;
use meridian_consensus::types::{Hash, Name, NameError, PublicKey};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Who may sign for an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorOwner {
    PubKey(PublicKey),
    /// Delegate account whose own policy must be satisfied
    Account(Name),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub owner: AuthorOwner,
    pub weight: u64,
}

impl Author {
    pub fn pub_key(key: PublicKey, weight: u64) -> Self {
        Self {
            owner: AuthorOwner::PubKey(key),
            weight,
        }
    }

    pub fn account(name: Name, weight: u64) -> Self {
        Self {
            owner: AuthorOwner::Account(name),
            weight,
        }
    }
}

/// Account record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: Name,
    pub founder: Name,
    pub nonce: u64,
    pub balances: BTreeMap<u64, U256>,
    pub code: Vec<u8>,
    pub code_hash: Hash,
    pub authors: Vec<Author>,
    pub threshold: u64,
    pub update_author_threshold: u64,
    /// Bumped on every change to the authorization policy
    pub author_version: u64,
    pub description: String,
    pub created_at: u64,
    pub suicided: bool,
    pub destroyed: bool,
}

impl Account {
    pub fn new(name: Name, founder: Name, key: PublicKey, number: u64) -> Self {
        Self {
            name,
            founder,
            nonce: 0,
            balances: BTreeMap::new(),
            code: Vec::new(),
            code_hash: Hash::default(),
            authors: vec![Author::pub_key(key, 1)],
            threshold: 1,
            update_author_threshold: 1,
            author_version: 0,
            description: String::new(),
            created_at: number,
            suicided: false,
            destroyed: false,
        }
    }

    pub fn balance(&self, asset_id: u64) -> U256 {
        self.balances.get(&asset_id).copied().unwrap_or_default()
    }

    pub fn set_code(&mut self, code: Vec<u8>) {
        self.code_hash = Hash::keccak(&code);
        self.code = code;
    }

    pub fn is_contract(&self) -> bool {
        !self.code.is_empty()
    }

    pub fn total_author_weight(&self) -> u64 {
        self.authors
            .iter()
            .fold(0u64, |acc, a| acc.saturating_add(a.weight))
    }
}

/// Registered asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub asset_id: u64,
    pub asset_name: Name,
    pub symbol: String,
    /// Circulating supply
    pub amount: U256,
    pub decimals: u64,
    pub founder: Name,
    pub owner: Name,
    /// Cap on total issuance; zero means uncapped
    pub upper_limit: U256,
    /// Issued so far, including destroyed amounts
    pub added_amount: U256,
    /// Contract account the asset is bound to
    pub contract: Option<Name>,
    pub description: String,
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// Action payloads (bincode)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountPayload {
    pub account_name: Name,
    pub founder: Option<Name>,
    pub public_key: PublicKey,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAccountPayload {
    pub founder: Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorChangeOp {
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorChange {
    pub op: AuthorChangeOp,
    pub author: Author,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAuthorPayload {
    /// Zero keeps the current value
    pub threshold: u64,
    /// Zero keeps the current value
    pub update_author_threshold: u64,
    pub changes: Vec<AuthorChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueAssetPayload {
    pub asset_name: Name,
    pub symbol: String,
    pub amount: U256,
    pub decimals: u64,
    pub founder: Option<Name>,
    pub owner: Name,
    pub upper_limit: U256,
    pub contract: Option<Name>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncreaseAssetPayload {
    pub asset_id: u64,
    pub amount: U256,
    pub to: Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAssetOwnerPayload {
    pub asset_id: u64,
    pub owner: Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAssetPayload {
    pub asset_id: u64,
    pub founder: Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAssetContractPayload {
    pub asset_id: u64,
    pub contract: Option<Name>,
}

/// Encode a payload for an action
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, AccountError> {
    bincode::serialize(payload).map_err(|e| AccountError::InvalidPayload(e.to_string()))
}

pub(crate) fn decode_payload<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, AccountError> {
    bincode::deserialize(bytes).map_err(|e| AccountError::InvalidPayload(e.to_string()))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Account model failures. Reported on the action result unless raised by a
/// lookup the transition depends on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error("account {0} not found")]
    AccountNotFound(Name),

    #[error("account {0} already exists")]
    AccountExists(Name),

    #[error("account {0} is destroyed")]
    AccountDestroyed(Name),

    #[error("asset {0} not found")]
    AssetNotFound(u64),

    #[error("asset name {0} already registered")]
    AssetNameExists(Name),

    #[error("{name} holds {have} of asset {asset_id}, needs {need}")]
    InsufficientBalance {
        name: Name,
        asset_id: u64,
        need: U256,
        have: U256,
    },

    #[error("{0} is not the owner of asset {1}")]
    NotAssetOwner(Name, u64),

    #[error("asset {asset_id} issuance would exceed upper limit {limit}")]
    UpperLimitExceeded { asset_id: u64, limit: U256 },

    #[error("asset {asset_id} is bound to contract {contract} which did not approve the transfer")]
    ContractAssetTransferDenied { asset_id: u64, contract: Name },

    #[error("action recipient must be {expected}, got {got}")]
    InvalidRecipient { expected: Name, got: Name },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),

    #[error("balance overflow")]
    Overflow,

    #[error("invalid signature from {0}")]
    InvalidSignature(Name),

    #[error("signatures for {name} carry weight {have}, threshold is {need}")]
    InsufficientSignatureWeight { name: Name, have: u64, need: u64 },

    #[error("author policy of {0} cannot reach its thresholds")]
    UnreachableThreshold(Name),

    #[error("author {0} not present")]
    AuthorNotFound(String),

    #[error("author {0} already present")]
    AuthorExists(String),

    #[error("{0} is handled by the consensus engine")]
    NotAccountAction(&'static str),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Errors raised by the execution capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: U256, have: U256 },

    #[error("Execution over time")]
    ExecutionOverTime,

    #[error("Out of gas")]
    OutOfGas,

    #[error("Gas computation overflow")]
    GasOverflow,

    #[error("Contract {0} not found")]
    ContractNotFound(Name),

    #[error("Contract execution is not available")]
    ContractUnsupported,

    #[error("Execution reverted: {0}")]
    Reverted(String),
}

impl ExecutionError {
    /// Errors meaning the action never meaningfully executed
    pub fn is_consensus_fatal(&self) -> bool {
        matches!(
            self,
            ExecutionError::InsufficientBalance { .. } | ExecutionError::ExecutionOverTime
        )
    }
}

/// Why an applied action is marked failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionFailure {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
