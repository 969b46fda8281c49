use anyhow::{ensure, Context};
use meridian_consensus::fork::ForkController;
use meridian_consensus::types::{Block, BlockHeader, Hash, PublicKey};
use meridian_execution::types::IssueAssetPayload;
use meridian_execution::{AccountManager, StateDB};
use primitive_types::U256;
use tracing::info;

use crate::config::NodeConfig;

/// Write the genesis state into `state` and return the genesis block.
///
/// System accounts get an all-zero key, so nothing can sign for them. The
/// whole token supply is issued to the chain account and funded balances are
/// transferred out of it.
pub fn initialize(config: &NodeConfig, state: &mut StateDB) -> anyhow::Result<Block> {
    config.validate()?;
    let chain = config.chain_config();
    let genesis = &config.genesis;

    {
        let mut accounts = AccountManager::new(&mut *state);
        for system in [
            &chain.chain_name,
            &chain.fee_name,
            &chain.account_name,
            &chain.asset_name,
            &chain.dpos_name,
        ] {
            accounts
                .create_account(system.clone(), chain.chain_name.clone(), PublicKey::new([0; 32]), 0)
                .with_context(|| format!("creating system account {system}"))?;
        }

        for account in &genesis.accounts {
            accounts.create_account(account.name.clone(), account.name.clone(), account.key()?, 0)?;
        }

        let token = accounts.issue_asset(
            &chain.asset_name,
            IssueAssetPayload {
                asset_name: genesis.token_name.clone(),
                symbol: genesis.token_symbol.clone(),
                amount: U256::from(genesis.token_supply),
                decimals: genesis.token_decimals,
                founder: Some(chain.chain_name.clone()),
                owner: chain.chain_name.clone(),
                upper_limit: U256::zero(),
                contract: None,
                description: "system token".to_string(),
            },
            0,
        )?;
        ensure!(
            token.asset_id == chain.sys_token_id,
            "system token issued as asset {}, expected {}",
            token.asset_id,
            chain.sys_token_id
        );

        for account in genesis.accounts.iter().filter(|a| a.balance > 0) {
            accounts.transfer_asset(
                &chain.chain_name,
                &account.name,
                chain.sys_token_id,
                U256::from(account.balance),
            )?;
        }
    }

    ForkController::new(chain.fork.clone(), chain.chain_name.clone())?
        .init(&mut *state, genesis.start_fork_id)?;

    let state_root = state.commit();
    let header = BlockHeader {
        parent_hash: Hash::default(),
        number: 0,
        timestamp: genesis.timestamp,
        coinbase: genesis.producer.clone(),
        gas_limit: config.execution.block_gas_limit,
        gas_used: 0,
        cur_fork_id: genesis.start_fork_id,
        next_fork_id: genesis.start_fork_id,
        state_root,
    };

    info!(
        chain = %chain.chain_name,
        hash = %header.hash(),
        root = %state_root,
        accounts = genesis.accounts.len(),
        fork_id = genesis.start_fork_id,
        "Created genesis block"
    );
    Ok(Block {
        header,
        transactions: Vec::new(),
    })
}
