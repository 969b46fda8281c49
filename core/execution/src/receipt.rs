// meridian/core/execution/src/receipt.rs

use crate::fees::{FeeCategory, GasDistributionMap};
use meridian_consensus::types::{Hash, InternalAction, Name};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Failed,
    Successful,
}

/// One recipient's share of an action's gas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasAllotment {
    pub account: Name,
    pub gas: u64,
    pub category: FeeCategory,
}

impl GasAllotment {
    /// Allotments in (name, category) order
    pub fn from_distribution(map: &GasDistributionMap) -> Vec<Self> {
        map.iter()
            .map(|(key, gas)| Self {
                account: key.name.clone(),
                gas: gas.value.max(0) as u64,
                category: gas.category,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub index: u64,
    pub status: ReceiptStatus,
    pub gas_used: u64,
    pub gas_allot: Vec<GasAllotment>,
    pub error: Option<String>,
}

/// Internal actions of one top-level action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailAction {
    pub internal_actions: Vec<InternalAction>,
}

/// Internal action trace of a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailTx {
    pub tx_hash: Hash,
    pub actions: Vec<DetailAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    /// Gas used by the block up to and including this transaction
    pub cumulative_gas_used: u64,
    pub total_gas_used: u64,
    pub action_results: Vec<ActionResult>,
    pub detail: DetailTx,
}

impl Receipt {
    /// A transaction succeeded only if every one of its actions did
    pub fn succeeded(&self) -> bool {
        self.action_results
            .iter()
            .all(|r| r.status == ReceiptStatus::Successful)
    }
}
