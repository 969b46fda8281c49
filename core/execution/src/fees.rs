// meridian/core/execution/src/fees.rs

// Per-action gas distribution and the fee recording capability
use crate::types::AccountError;
use meridian_consensus::ledger::{Ledger, LedgerError};
use meridian_consensus::types::Name;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Kind of stakeholder receiving a share of the gas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeeCategory {
    AssetFounder,
    ContractFounder,
    Coinbase,
    SystemAccount,
}

impl FeeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeCategory::AssetFounder => "asset",
            FeeCategory::ContractFounder => "contract",
            FeeCategory::Coinbase => "coinbase",
            FeeCategory::SystemAccount => "system",
        }
    }
}

impl fmt::Display for FeeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered by name, then category
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DistributeKey {
    pub name: Name,
    pub category: FeeCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributeGas {
    pub value: i64,
    pub category: FeeCategory,
}

/// Gas shares accumulated while one action executes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GasDistributionMap {
    entries: BTreeMap<DistributeKey, DistributeGas>,
}

impl GasDistributionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &Name, category: FeeCategory) -> Option<i64> {
        self.entries
            .get(&DistributeKey {
                name: name.clone(),
                category,
            })
            .map(|g| g.value)
    }

    /// Overwrite a share
    pub fn set(&mut self, name: Name, category: FeeCategory, value: i64) {
        self.entries
            .insert(DistributeKey { name, category }, DistributeGas { value, category });
    }

    /// Accumulate onto a share
    pub fn add(&mut self, name: Name, category: FeeCategory, value: i64) {
        self.entries
            .entry(DistributeKey { name, category })
            .and_modify(|g| g.value = g.value.saturating_add(value))
            .or_insert(DistributeGas { value, category });
    }

    /// Assign everything not yet shared out to the coinbase, replacing any
    /// earlier coinbase entry.
    pub fn settle_coinbase(&mut self, coinbase: &Name, gas_used: u64) {
        let shared: i64 = self
            .entries
            .iter()
            .filter(|(k, _)| !(k.category == FeeCategory::Coinbase && &k.name == coinbase))
            .map(|(_, g)| g.value)
            .fold(0i64, i64::saturating_add);
        let residual = (gas_used as i64).saturating_sub(shared);
        self.set(coinbase.clone(), FeeCategory::Coinbase, residual);
    }

    pub fn total(&self) -> i64 {
        self.entries
            .values()
            .map(|g| g.value)
            .fold(0i64, i64::saturating_add)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in deterministic (name, category) order
    pub fn iter(&self) -> impl Iterator<Item = (&DistributeKey, &DistributeGas)> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    #[error("fee amount overflow for {0}")]
    Overflow(Name),

    #[error("no fees recorded for {category} {name}")]
    NothingToWithdraw { name: Name, category: FeeCategory },

    #[error("no beneficiary for {category} {name}")]
    UnknownObject { name: Name, category: FeeCategory },

    #[error("fee payout failed: {0}")]
    Payout(#[from] AccountError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Fee manager capability
pub trait FeeRecorder: Send + Sync {
    fn record_fee_in_system(
        &self,
        ledger: &mut dyn Ledger,
        name: &Name,
        category: FeeCategory,
        asset_id: u64,
        value: U256,
    ) -> Result<(), FeeError>;
}
