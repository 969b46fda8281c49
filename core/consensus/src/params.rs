// meridian/core/consensus/src/params.rs

use crate::types::Name;
use serde::{Deserialize, Serialize};

pub const FORK_ID_0: u64 = 0;
pub const FORK_ID_1: u64 = 1;
pub const FORK_ID_2: u64 = 2;
pub const FORK_ID_3: u64 = 3;
pub const FORK_ID_4: u64 = 4;

/// Highest consensus-rule version this binary can execute
pub const LATEST_FORK_ID: u64 = FORK_ID_4;

/// Fee split percentages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargeConfig {
    /// Share of gas paid to the founder of a transferred asset
    pub asset_ratio: u64,
    /// Share of intrinsic gas paid to contract and system accounts
    pub contract_ratio: u64,
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self {
            asset_ratio: 80,
            contract_ratio: 100,
        }
    }
}

/// Fork voting window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForkConfig {
    /// Number of most recent blocks taking part in the vote
    pub window: u64,
    /// Percentage of the window that must support the next fork id
    pub percentage: u64,
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self {
            window: 10_000,
            percentage: 80,
        }
    }
}

/// Immutable chain parameters threaded through block processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_name: Name,
    pub chain_id: u64,
    /// Account holding purchased gas until it is refunded or distributed
    pub fee_name: Name,
    /// System account owning the account registry
    pub account_name: Name,
    /// System account owning the asset registry
    pub asset_name: Name,
    /// System account of the DPoS engine
    pub dpos_name: Name,
    /// Asset id of the system token, the only accepted fee asset
    pub sys_token_id: u64,
    pub charge: ChargeConfig,
    pub fork: ForkConfig,
    /// First fork id accepting fee payers
    pub payer_fork_id: u64,
    /// First fork id enforcing contract-bound asset transfers
    pub contract_asset_fork_id: u64,
}

impl ChainConfig {
    /// Development defaults
    pub fn devnet() -> Self {
        Self {
            chain_name: Name::from_static("meridian"),
            chain_id: 1337,
            fee_name: Name::from_static("meridian.fee"),
            account_name: Name::from_static("meridian.account"),
            asset_name: Name::from_static("meridian.asset"),
            dpos_name: Name::from_static("meridian.dpos"),
            sys_token_id: 0,
            charge: ChargeConfig::default(),
            fork: ForkConfig::default(),
            payer_fork_id: FORK_ID_4,
            contract_asset_fork_id: FORK_ID_4,
        }
    }

    /// Whether `name` is one of the chain's system accounts
    pub fn is_system_account(&self, name: &Name) -> bool {
        [
            &self.chain_name,
            &self.fee_name,
            &self.account_name,
            &self.asset_name,
            &self.dpos_name,
        ]
        .contains(&name)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::devnet()
    }
}
