// meridian/core/economics/src/fee_manager.rs

// Fee bookkeeping for gas shares recorded by the state transition engine.
// Records live under the fee-holding account, which also holds the funds
// until a beneficiary withdraws them.
use meridian_consensus::ledger::{Ledger, LedgerExt};
use meridian_consensus::params::ChainConfig;
use meridian_consensus::types::Name;
use meridian_execution::accounts::AccountManager;
use meridian_execution::fees::{FeeCategory, FeeError, FeeRecorder};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

fn record_key(category: FeeCategory, name: &Name) -> String {
    format!("record/{category}/{name}")
}

fn total_key(asset_id: u64) -> String {
    format!("total/{asset_id}")
}

/// Fees accumulated by one object, per asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRecord {
    pub name: Name,
    pub category: FeeCategory,
    pub fees: BTreeMap<u64, U256>,
}

impl FeeRecord {
    fn new(name: Name, category: FeeCategory) -> Self {
        Self {
            name,
            category,
            fees: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fees.values().all(U256::is_zero)
    }
}

/// Result of a fee withdrawal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub beneficiary: Name,
    pub amounts: BTreeMap<u64, U256>,
}

/// Fee manager backed by ledger records under the fee-holding account
#[derive(Debug, Clone)]
pub struct SystemFeeManager {
    fee_name: Name,
}

impl SystemFeeManager {
    pub fn new(config: &ChainConfig) -> Self {
        Self {
            fee_name: config.fee_name.clone(),
        }
    }

    pub fn fee_record(
        &self,
        ledger: &dyn Ledger,
        category: FeeCategory,
        name: &Name,
    ) -> Result<Option<FeeRecord>, FeeError> {
        Ok(ledger.get_record(self.fee_name.as_str(), &record_key(category, name))?)
    }

    /// Fees ever recorded in `asset_id`, withdrawn or not
    pub fn total_fees(&self, ledger: &dyn Ledger, asset_id: u64) -> Result<U256, FeeError> {
        Ok(ledger
            .get_record(self.fee_name.as_str(), &total_key(asset_id))?
            .unwrap_or_default())
    }

    /// Account paid when fees of `name` are withdrawn
    fn beneficiary(
        &self,
        accounts: &AccountManager<'_>,
        category: FeeCategory,
        name: &Name,
    ) -> Result<Name, FeeError> {
        let unknown = || FeeError::UnknownObject {
            name: name.clone(),
            category,
        };
        match category {
            FeeCategory::AssetFounder => Ok(accounts
                .get_asset_by_name(name)?
                .ok_or_else(unknown)?
                .founder),
            FeeCategory::ContractFounder | FeeCategory::SystemAccount => Ok(accounts
                .get_account(name)?
                .ok_or_else(unknown)?
                .founder),
            FeeCategory::Coinbase => {
                if !accounts.account_exists(name)? {
                    return Err(unknown());
                }
                Ok(name.clone())
            }
        }
    }

    /// Pay every accumulated fee of (`category`, `name`) out of the
    /// fee-holding account and clear the record.
    ///
    /// Library helper for embedders settling fees on a state they own: no
    /// action kind triggers it and block import never calls it, so a
    /// withdrawal applied outside block execution changes the state root.
    pub fn withdraw_fee(
        &self,
        accounts: &mut AccountManager<'_>,
        category: FeeCategory,
        name: &Name,
    ) -> Result<Withdrawal, FeeError> {
        let record = self
            .fee_record(accounts.ledger(), category, name)?
            .filter(|r| !r.is_empty())
            .ok_or_else(|| FeeError::NothingToWithdraw {
                name: name.clone(),
                category,
            })?;
        let beneficiary = self.beneficiary(accounts, category, name)?;

        let amounts: BTreeMap<u64, U256> = record
            .fees
            .into_iter()
            .filter(|(_, value)| !value.is_zero())
            .collect();
        for (asset_id, value) in &amounts {
            accounts.transfer_asset(&self.fee_name, &beneficiary, *asset_id, *value)?;
        }
        accounts
            .ledger()
            .delete(self.fee_name.as_str(), &record_key(category, name));

        info!(
            object = %name,
            category = %category,
            beneficiary = %beneficiary,
            assets = amounts.len(),
            "Withdrew fees"
        );
        Ok(Withdrawal {
            beneficiary,
            amounts,
        })
    }
}

impl FeeRecorder for SystemFeeManager {
    fn record_fee_in_system(
        &self,
        ledger: &mut dyn Ledger,
        name: &Name,
        category: FeeCategory,
        asset_id: u64,
        value: U256,
    ) -> Result<(), FeeError> {
        let owner = self.fee_name.as_str();
        let key = record_key(category, name);
        let mut record = ledger
            .get_record::<FeeRecord>(owner, &key)?
            .unwrap_or_else(|| FeeRecord::new(name.clone(), category));
        let entry = record.fees.entry(asset_id).or_default();
        *entry = entry
            .checked_add(value)
            .ok_or_else(|| FeeError::Overflow(name.clone()))?;
        ledger.put_record(owner, &key, &record)?;

        let total: U256 = ledger
            .get_record(owner, &total_key(asset_id))?
            .unwrap_or_default();
        let total = total
            .checked_add(value)
            .ok_or_else(|| FeeError::Overflow(self.fee_name.clone()))?;
        ledger.put_record(owner, &total_key(asset_id), &total)?;

        debug!(object = %name, category = %category, asset_id, value = %value, "Recorded fee");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use meridian_consensus::crypto::public_key;
    use meridian_execution::accounts::AccountManager;
    use meridian_execution::types::{AccountError, IssueAssetPayload};
    use meridian_execution::StateDB;

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    /// Fee account holding 1000 of the system token, the asset registry,
    /// alice as founder of "coin" and "vault" founded by alice
    fn setup(config: &ChainConfig) -> StateDB {
        let mut state = StateDB::new();
        let mut accounts = AccountManager::new(&mut state);
        for (seed, account) in [
            (1, config.fee_name.clone()),
            (2, config.asset_name.clone()),
            (3, name("alice")),
            (4, name("producer")),
        ] {
            accounts
                .create_account(account.clone(), account, public_key(&key(seed)), 0)
                .unwrap();
        }
        accounts
            .create_account(name("vault"), name("alice"), public_key(&key(5)), 0)
            .unwrap();
        accounts
            .issue_asset(
                &name("alice"),
                IssueAssetPayload {
                    asset_name: name("coin"),
                    symbol: "COIN".to_string(),
                    amount: U256::from(1_000),
                    decimals: 18,
                    founder: None,
                    owner: config.fee_name.clone(),
                    upper_limit: U256::zero(),
                    contract: None,
                    description: String::new(),
                },
                0,
            )
            .unwrap();
        state
    }

    #[test]
    fn test_records_accumulate_per_object_and_asset() {
        let config = ChainConfig::devnet();
        let manager = SystemFeeManager::new(&config);
        let mut state = setup(&config);

        for value in [10u64, 15] {
            manager
                .record_fee_in_system(&mut state, &name("coin"), FeeCategory::AssetFounder, 0, U256::from(value))
                .unwrap();
        }
        manager
            .record_fee_in_system(&mut state, &name("producer"), FeeCategory::Coinbase, 0, U256::from(5))
            .unwrap();

        let record = manager
            .fee_record(&state, FeeCategory::AssetFounder, &name("coin"))
            .unwrap()
            .unwrap();
        assert_eq!(record.fees.get(&0), Some(&U256::from(25)));
        assert!(manager
            .fee_record(&state, FeeCategory::ContractFounder, &name("coin"))
            .unwrap()
            .is_none());
        assert_eq!(manager.total_fees(&state, 0).unwrap(), U256::from(30));
        assert_eq!(manager.total_fees(&state, 1).unwrap(), U256::zero());
    }

    #[test]
    fn test_withdraw_pays_beneficiary_and_clears_record() {
        let config = ChainConfig::devnet();
        let manager = SystemFeeManager::new(&config);
        let mut state = setup(&config);
        manager
            .record_fee_in_system(&mut state, &name("coin"), FeeCategory::AssetFounder, 0, U256::from(40))
            .unwrap();
        manager
            .record_fee_in_system(&mut state, &name("vault"), FeeCategory::ContractFounder, 0, U256::from(7))
            .unwrap();
        manager
            .record_fee_in_system(&mut state, &name("producer"), FeeCategory::Coinbase, 0, U256::from(3))
            .unwrap();

        let mut accounts = AccountManager::new(&mut state);
        let paid = manager
            .withdraw_fee(&mut accounts, FeeCategory::AssetFounder, &name("coin"))
            .unwrap();
        assert_eq!(paid.beneficiary, name("alice"));
        assert_eq!(paid.amounts.get(&0), Some(&U256::from(40)));

        let paid = manager
            .withdraw_fee(&mut accounts, FeeCategory::ContractFounder, &name("vault"))
            .unwrap();
        assert_eq!(paid.beneficiary, name("alice"));

        let paid = manager
            .withdraw_fee(&mut accounts, FeeCategory::Coinbase, &name("producer"))
            .unwrap();
        assert_eq!(paid.beneficiary, name("producer"));

        assert_eq!(accounts.get_balance(&name("alice"), 0).unwrap(), U256::from(47));
        assert_eq!(accounts.get_balance(&name("producer"), 0).unwrap(), U256::from(3));
        assert_eq!(accounts.get_balance(&config.fee_name, 0).unwrap(), U256::from(950));

        assert!(matches!(
            manager.withdraw_fee(&mut accounts, FeeCategory::AssetFounder, &name("coin")),
            Err(FeeError::NothingToWithdraw { .. })
        ));
        drop(accounts);
        // Totals keep counting withdrawn fees
        assert_eq!(manager.total_fees(&state, 0).unwrap(), U256::from(50));
    }

    #[test]
    fn test_withdraw_for_unknown_object() {
        let config = ChainConfig::devnet();
        let manager = SystemFeeManager::new(&config);
        let mut state = setup(&config);
        manager
            .record_fee_in_system(&mut state, &name("ghost"), FeeCategory::SystemAccount, 0, U256::from(1))
            .unwrap();

        let mut accounts = AccountManager::new(&mut state);
        assert!(matches!(
            manager.withdraw_fee(&mut accounts, FeeCategory::SystemAccount, &name("ghost")),
            Err(FeeError::UnknownObject { .. })
        ));
        // The record survives a failed withdrawal
        assert!(manager
            .fee_record(accounts.ledger(), FeeCategory::SystemAccount, &name("ghost"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_withdraw_beyond_holdings_fails() {
        let config = ChainConfig::devnet();
        let manager = SystemFeeManager::new(&config);
        let mut state = setup(&config);
        manager
            .record_fee_in_system(&mut state, &name("producer"), FeeCategory::Coinbase, 0, U256::from(5_000))
            .unwrap();

        let mut accounts = AccountManager::new(&mut state);
        assert!(matches!(
            manager.withdraw_fee(&mut accounts, FeeCategory::Coinbase, &name("producer")),
            Err(FeeError::Payout(AccountError::InsufficientBalance { .. }))
        ));
    }

    #[test]
    fn test_overflow_is_rejected() {
        let config = ChainConfig::devnet();
        let manager = SystemFeeManager::new(&config);
        let mut state = setup(&config);
        manager
            .record_fee_in_system(&mut state, &name("producer"), FeeCategory::Coinbase, 0, U256::MAX)
            .unwrap();
        assert!(matches!(
            manager.record_fee_in_system(&mut state, &name("producer"), FeeCategory::Coinbase, 0, U256::one()),
            Err(FeeError::Overflow(_))
        ));
    }
}
