// meridian/core/consensus/src/types.rs

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Hash type for block, transaction and action identifiers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, PartialOrd, Ord,
)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn new(data: [u8; 32]) -> Self {
        Self(data)
    }

    /// Keccak-256 of arbitrary bytes
    pub fn keccak(data: &[u8]) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name length {0} outside 2..=32")]
    Length(usize),

    #[error("name must start with a lowercase letter")]
    Leading,

    #[error("invalid character {0:?} in name")]
    Character(char),

    #[error("empty segment in dotted name")]
    EmptySegment,
}

/// Account name. Accounts, assets and system objects are all addressed by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), NameError> {
        if !(2..=32).contains(&name.len()) {
            return Err(NameError::Length(name.len()));
        }
        if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err(NameError::Leading);
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.'))
        {
            return Err(NameError::Character(c));
        }
        if name.split('.').any(str::is_empty) {
            return Err(NameError::EmptySegment);
        }
        Ok(())
    }

    /// Name known to be valid at compile time
    pub fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::validate(name).is_ok(), "invalid static name {name}");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Name {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Name {
    type Error = NameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public key type (ed25519)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn new(data: [u8; 32]) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// Signature type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    pub fn new(data: [u8; 64]) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        if bytes.len() != 64 {
            return Err(serde::de::Error::custom("Invalid signature length"));
        }
        let mut data = [0u8; 64];
        data.copy_from_slice(&bytes);
        Ok(Signature(data))
    }
}

/// Account lifecycle operations handled by the account model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountOp {
    Create,
    Update,
    Delete,
    UpdateAuthor,
}

/// Asset lifecycle operations handled by the account model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetOp {
    Issue,
    Increase,
    Destroy,
    SetOwner,
    Update,
    UpdateContract,
}

/// Candidate, voting and governance operations handled by the consensus engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateOp {
    Register,
    Update,
    UpdatePubKey,
    Unregister,
    Vote,
    Refund,
    Kicked,
    RemoveKicked,
    ExitTakeOver,
}

/// Kind of an action. New kinds are added as variants here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Transfer,
    CreateContract,
    CallContract,
    Account(AccountOp),
    Asset(AssetOp),
    Candidate(CandidateOp),
}

impl ActionKind {
    pub fn is_contract(&self) -> bool {
        matches!(self, ActionKind::CreateContract | ActionKind::CallContract)
    }

    /// Label used in internal action traces and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Transfer => "transfer",
            ActionKind::CreateContract => "createcontract",
            ActionKind::CallContract => "callcontract",
            ActionKind::Account(op) => match op {
                AccountOp::Create => "createaccount",
                AccountOp::Update => "updateaccount",
                AccountOp::Delete => "deleteaccount",
                AccountOp::UpdateAuthor => "updateaccountauthor",
            },
            ActionKind::Asset(op) => match op {
                AssetOp::Issue => "issueasset",
                AssetOp::Increase => "increaseasset",
                AssetOp::Destroy => "destroyasset",
                AssetOp::SetOwner => "setassetowner",
                AssetOp::Update => "updateasset",
                AssetOp::UpdateContract => "updateassetcontract",
            },
            ActionKind::Candidate(op) => match op {
                CandidateOp::Register => "regcandidate",
                CandidateOp::Update => "updatecandidate",
                CandidateOp::UpdatePubKey => "updatecandidatepubkey",
                CandidateOp::Unregister => "unregcandidate",
                CandidateOp::Vote => "votecandidate",
                CandidateOp::Refund => "refundcandidate",
                CandidateOp::Kicked => "kickedcandidate",
                CandidateOp::RemoveKicked => "removekickedcandidate",
                CandidateOp::ExitTakeOver => "exittakeover",
            },
        }
    }
}

/// A signature over an action's signing hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSignature {
    pub signer: PublicKey,
    pub signature: Signature,
}

/// Fee-payer declaration carried by an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerInfo {
    pub payer: Name,
    pub gas_price: U256,
    pub signatures: Vec<ActionSignature>,
}

/// One unit of intent inside a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub sender: Name,
    pub recipient: Name,
    pub nonce: u64,
    pub asset_id: u64,
    pub gas_limit: u64,
    pub value: U256,
    pub payload: Vec<u8>,
    pub remark: Vec<u8>,
    pub payer: Option<PayerInfo>,
    pub signatures: Vec<ActionSignature>,

    /// Author versions of every account consulted when the signatures were
    /// last verified. Local cache, never hashed or transmitted.
    #[serde(skip)]
    pub author_versions: BTreeMap<Name, u64>,
}

/// Signed content of an action
#[derive(Serialize)]
struct SigningView<'a> {
    chain_id: u64,
    kind: &'a ActionKind,
    sender: &'a Name,
    recipient: &'a Name,
    nonce: u64,
    asset_id: u64,
    gas_limit: u64,
    value: &'a U256,
    payload: &'a [u8],
    remark: &'a [u8],
    payer: Option<(&'a Name, &'a U256)>,
}

impl Action {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: ActionKind,
        sender: Name,
        recipient: Name,
        nonce: u64,
        asset_id: u64,
        gas_limit: u64,
        value: U256,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            sender,
            recipient,
            nonce,
            asset_id,
            gas_limit,
            value,
            payload,
            remark: Vec::new(),
            payer: None,
            signatures: Vec::new(),
            author_versions: BTreeMap::new(),
        }
    }

    pub fn with_payer(mut self, payer: Name, gas_price: U256) -> Self {
        self.payer = Some(PayerInfo {
            payer,
            gas_price,
            signatures: Vec::new(),
        });
        self
    }

    pub fn with_remark(mut self, remark: Vec<u8>) -> Self {
        self.remark = remark;
        self
    }

    /// Hash signed by the sender (and the payer, if any)
    pub fn signing_hash(&self, chain_id: u64) -> Hash {
        let view = SigningView {
            chain_id,
            kind: &self.kind,
            sender: &self.sender,
            recipient: &self.recipient,
            nonce: self.nonce,
            asset_id: self.asset_id,
            gas_limit: self.gas_limit,
            value: &self.value,
            payload: &self.payload,
            remark: &self.remark,
            payer: self.payer.as_ref().map(|p| (&p.payer, &p.gas_price)),
        };
        // Serializing plain data into a Vec cannot fail
        let bytes = bincode::serialize(&view).unwrap_or_default();
        Hash::keccak(&bytes)
    }

    /// Identifier of the action including its signatures
    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(self).unwrap_or_default();
        Hash::keccak(&bytes)
    }
}

/// Ordered sequence of actions sharing one fee envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub actions: Vec<Action>,
    pub gas_asset_id: u64,
    pub gas_price: U256,
}

impl Transaction {
    pub fn new(actions: Vec<Action>, gas_asset_id: u64, gas_price: U256) -> Self {
        Self {
            actions,
            gas_asset_id,
            gas_price,
        }
    }

    /// A transaction declares a fee payer through its first action
    pub fn payer_exists(&self) -> bool {
        self.actions
            .first()
            .map(|a| a.payer.is_some())
            .unwrap_or(false)
    }

    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(self).unwrap_or_default();
        Hash::keccak(&bytes)
    }
}

/// Block header containing consensus-critical fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_hash: Hash,
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: Name,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub cur_fork_id: u64,
    pub next_fork_id: u64,
    pub state_root: Hash,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        let bytes = bincode::serialize(self).unwrap_or_default();
        Hash::keccak(&bytes)
    }

    pub fn with_fork_id(&mut self, cur_fork_id: u64, next_fork_id: u64) {
        self.cur_fork_id = cur_fork_id;
        self.next_fork_id = next_fork_id;
    }
}

/// Full block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }
}

/// Sub-action produced while executing an action (internal transfers,
/// asset issuance, engine bookkeeping)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalAction {
    pub kind: String,
    pub from: Name,
    pub to: Name,
    pub asset_id: u64,
    pub value: U256,
    pub payload: Vec<u8>,
    pub depth: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub error: Option<String>,
    /// Hash of the top-level action, stamped by the block processor
    pub action_hash: Hash,
}

impl InternalAction {
    pub fn transfer(from: Name, to: Name, asset_id: u64, value: U256) -> Self {
        Self::new("transfer", from, to, asset_id, value)
    }

    pub fn new(kind: &str, from: Name, to: Name, asset_id: u64, value: U256) -> Self {
        Self {
            kind: kind.to_string(),
            from,
            to,
            asset_id,
            value,
            payload: Vec::new(),
            depth: 0,
            gas_used: 0,
            gas_limit: 0,
            error: None,
            action_hash: Hash::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("gas limit reached: requested {requested}, remaining {remaining}")]
pub struct GasLimitReached {
    pub requested: u64,
    pub remaining: u64,
}

/// Gas still available in the block being processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GasPool(u64);

impl GasPool {
    pub fn new(gas: u64) -> Self {
        Self(gas)
    }

    pub fn sub_gas(&mut self, amount: u64) -> Result<(), GasLimitReached> {
        if self.0 < amount {
            return Err(GasLimitReached {
                requested: amount,
                remaining: self.0,
            });
        }
        self.0 -= amount;
        Ok(())
    }

    pub fn add_gas(&mut self, amount: u64) {
        self.0 = self.0.saturating_add(amount);
    }

    pub fn gas(&self) -> u64 {
        self.0
    }
}
