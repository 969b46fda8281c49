use anyhow::{bail, Context};
use ed25519_dalek::SigningKey;
use meridian_consensus::crypto::public_key;
use meridian_consensus::params::{ChainConfig, ChargeConfig, ForkConfig, LATEST_FORK_ID};
use meridian_consensus::types::{Name, PublicKey};
use meridian_execution::{ExecutionLimits, GasTable};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::logging::{LogConfig, LogFormat, LogLevel};

/// Node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Chain identity and system accounts
    pub chain: ChainSection,

    /// Fork voting window
    pub fork: ForkConfig,

    /// Gas fee split
    pub charge: ChargeConfig,

    /// Intrinsic gas costs
    pub gas: GasTable,

    /// Execution limits
    pub execution: ExecutionSection,

    /// Initial state
    pub genesis: GenesisSection,

    /// Log output
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    pub chain_name: Name,
    pub chain_id: u64,
    pub fee_name: Name,
    pub account_name: Name,
    pub asset_name: Name,
    pub dpos_name: Name,
    pub sys_token_id: u64,
    pub payer_fork_id: u64,
    pub contract_asset_fork_id: u64,
}

impl Default for ChainSection {
    fn default() -> Self {
        let chain = ChainConfig::devnet();
        Self {
            chain_name: chain.chain_name,
            chain_id: chain.chain_id,
            fee_name: chain.fee_name,
            account_name: chain.account_name,
            asset_name: chain.asset_name,
            dpos_name: chain.dpos_name,
            sys_token_id: chain.sys_token_id,
            payer_fork_id: chain.payer_fork_id,
            contract_asset_fork_id: chain.contract_asset_fork_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    /// Wall-clock budget per action in milliseconds; 0 disables the guard
    pub action_timeout_ms: u64,

    /// Gas limit of produced blocks
    pub block_gas_limit: u64,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            action_timeout_ms: 0,
            block_gas_limit: 30_000_000,
        }
    }
}

/// Account funded at genesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub name: Name,
    /// Hex-encoded ed25519 public key
    pub public_key: String,
    /// Initial system token balance
    #[serde(default)]
    pub balance: u64,
}

impl GenesisAccount {
    pub fn key(&self) -> anyhow::Result<PublicKey> {
        PublicKey::from_hex(&self.public_key)
            .with_context(|| format!("invalid public key for genesis account {}", self.name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisSection {
    pub timestamp: u64,

    /// Block producer; must be one of `accounts`
    pub producer: Name,

    /// Fork id the chain starts on
    pub start_fork_id: u64,

    pub token_name: Name,
    pub token_symbol: String,
    pub token_decimals: u64,
    /// Issued to the chain account; funded balances are paid from it
    pub token_supply: u64,

    pub accounts: Vec<GenesisAccount>,
}

impl Default for GenesisSection {
    fn default() -> Self {
        Self {
            timestamp: 0,
            producer: Name::from_static("producer"),
            start_fork_id: LATEST_FORK_ID,
            token_name: Name::from_static("meridian.token"),
            token_symbol: "MRD".to_string(),
            token_decimals: 18,
            token_supply: 1_000_000_000_000,
            accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// pretty, compact or json
    pub format: String,
    pub ansi: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            ansi: true,
        }
    }
}

impl LoggingSection {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            level: LogLevel::from_str(&self.level),
            format: LogFormat::from_str(&self.format),
            ansi_colors: self.ansi,
            ..LogConfig::default()
        }
    }
}

/// Deterministic development key; never use outside devnets
pub fn dev_signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Development accounts and the seeds of their keys
pub const DEV_ACCOUNTS: [(&str, u8); 3] = [("producer", 7), ("alice", 1), ("bob", 2)];

impl NodeConfig {
    /// Development chain funded with the [`DEV_ACCOUNTS`]
    pub fn devnet() -> Self {
        let mut config = Self::default();
        config.execution.action_timeout_ms = 1_000;
        config.genesis.accounts = DEV_ACCOUNTS
            .iter()
            .map(|&(name, seed)| GenesisAccount {
                name: Name::from_static(name),
                public_key: hex::encode(public_key(&dev_signing_key(seed)).as_bytes()),
                balance: 1_000_000_000,
            })
            .collect();
        config
    }

    pub fn chain_config(&self) -> ChainConfig {
        let chain = &self.chain;
        ChainConfig {
            chain_name: chain.chain_name.clone(),
            chain_id: chain.chain_id,
            fee_name: chain.fee_name.clone(),
            account_name: chain.account_name.clone(),
            asset_name: chain.asset_name.clone(),
            dpos_name: chain.dpos_name.clone(),
            sys_token_id: chain.sys_token_id,
            charge: self.charge.clone(),
            fork: self.fork.clone(),
            payer_fork_id: chain.payer_fork_id,
            contract_asset_fork_id: chain.contract_asset_fork_id,
        }
    }

    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            action_timeout: match self.execution.action_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let genesis = &self.genesis;
        if genesis.start_fork_id > LATEST_FORK_ID {
            bail!(
                "start fork id {} is newer than the latest supported {}",
                genesis.start_fork_id,
                LATEST_FORK_ID
            );
        }
        // The system token is the first asset issued at genesis
        if self.chain.sys_token_id != 0 {
            bail!("sys_token_id must be 0, got {}", self.chain.sys_token_id);
        }
        if !genesis.accounts.iter().any(|a| a.name == genesis.producer) {
            bail!("producer {} is not a genesis account", genesis.producer);
        }
        let chain = self.chain_config();
        for account in &genesis.accounts {
            if chain.is_system_account(&account.name) {
                bail!("genesis account {} shadows a system account", account.name);
            }
            account.key()?;
        }
        let funded: u128 = genesis.accounts.iter().map(|a| a.balance as u128).sum();
        if funded > genesis.token_supply as u128 {
            bail!(
                "genesis balances ({funded}) exceed the token supply ({})",
                genesis.token_supply
            );
        }
        Ok(())
    }

    /// Load from file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devnet_config_is_valid() {
        let config = NodeConfig::devnet();
        config.validate().unwrap();
        assert_eq!(config.genesis.accounts.len(), DEV_ACCOUNTS.len());
        assert_eq!(
            config.limits().action_timeout,
            Some(Duration::from_millis(1_000))
        );
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            [chain]
            chain_id = 7

            [fork]
            window = 100

            [gas]
            action = 21000
            "#,
        )
        .unwrap();
        assert_eq!(config.chain.chain_id, 7);
        assert_eq!(config.chain.fee_name, Name::from_static("meridian.fee"));
        assert_eq!(config.fork.window, 100);
        assert_eq!(config.fork.percentage, 80);
        assert_eq!(config.gas.action, 21_000);
        assert_eq!(config.gas.action_create, GasTable::default().action_create);
        assert_eq!(config.limits().action_timeout, None);
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let parsed: Result<NodeConfig, _> = toml::from_str(
            r#"
            [chain]
            fee_name = "Fee"
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_catches_bad_genesis() {
        let mut config = NodeConfig::devnet();
        config.genesis.producer = Name::from_static("nobody");
        assert!(config.validate().is_err());

        let mut config = NodeConfig::devnet();
        config.genesis.start_fork_id = LATEST_FORK_ID + 1;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::devnet();
        config.genesis.accounts[1].public_key = "zz".to_string();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::devnet();
        config.genesis.token_supply = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("meridian.toml");
        let config = NodeConfig::devnet();
        config.save(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.genesis.accounts, config.genesis.accounts);
        assert_eq!(loaded.chain_config(), config.chain_config());
    }
}
