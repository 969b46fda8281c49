// meridian/core/execution/src/processor.rs

// Applies every transaction of a block on top of a ledger
use crate::fees::FeeRecorder;
use crate::gas::GasTable;
use crate::receipt::{ActionResult, DetailAction, DetailTx, GasAllotment, Receipt, ReceiptStatus};
use crate::transition::{StateTransition, TransitionEnv, TransitionError};
use crate::vm::{AbortSignal, OvertimeGuard, VirtualMachine};
use meridian_consensus::engine::ConsensusEngine;
use meridian_consensus::ledger::Ledger;
use meridian_consensus::params::ChainConfig;
use meridian_consensus::types::{Block, GasPool, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Bounds applied while executing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall-clock budget of a single action; `None` disables the guard
    pub action_timeout: Option<Duration>,
}

/// Receipts and gas of a processed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutcome {
    pub receipts: Vec<Receipt>,
    pub gas_used: u64,
}

pub struct BlockProcessor {
    config: ChainConfig,
    gas_table: GasTable,
    vm: Arc<dyn VirtualMachine>,
    engine: Arc<dyn ConsensusEngine>,
    fees: Arc<dyn FeeRecorder>,
}

impl BlockProcessor {
    pub fn new(
        config: ChainConfig,
        gas_table: GasTable,
        vm: Arc<dyn VirtualMachine>,
        engine: Arc<dyn ConsensusEngine>,
        fees: Arc<dyn FeeRecorder>,
    ) -> Self {
        Self {
            config,
            gas_table,
            vm,
            engine,
            fees,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn gas_table(&self) -> &GasTable {
        &self.gas_table
    }

    pub fn engine(&self) -> &Arc<dyn ConsensusEngine> {
        &self.engine
    }

    fn env(&self, block: &Block) -> TransitionEnv<'_> {
        TransitionEnv {
            config: &self.config,
            gas_table: &self.gas_table,
            fork_id: block.header.cur_fork_id,
            number: block.header.number,
            coinbase: self.engine.author(&block.header),
            vm: self.vm.as_ref(),
            engine: self.engine.as_ref(),
            fees: self.fees.as_ref(),
        }
    }

    /// Apply every transaction of `block`. Any error invalidates the block
    /// and leaves `ledger` partially written; callers discard or revert it.
    pub fn process(
        &self,
        block: &Block,
        ledger: &mut dyn Ledger,
        limits: &ExecutionLimits,
    ) -> Result<BlockOutcome, TransitionError> {
        self.engine.prepare(&block.header, ledger)?;

        let env = self.env(block);
        let mut gas_pool = GasPool::new(block.header.gas_limit);
        let mut gas_used = 0u64;
        let mut receipts = Vec::with_capacity(block.transactions.len());

        for tx in &block.transactions {
            let receipt = apply_transaction(&env, &mut gas_pool, ledger, tx, &mut gas_used, limits)?;
            receipts.push(receipt);
        }

        self.engine.finalize(&block.header, ledger)?;

        info!(
            number = block.header.number,
            txs = receipts.len(),
            gas_used,
            "Block processed"
        );
        Ok(BlockOutcome { receipts, gas_used })
    }

    /// Apply a single transaction in the context of `block`
    pub fn apply_transaction(
        &self,
        block: &Block,
        gas_pool: &mut GasPool,
        ledger: &mut dyn Ledger,
        tx: &Transaction,
        used_gas: &mut u64,
        limits: &ExecutionLimits,
    ) -> Result<Receipt, TransitionError> {
        let env = self.env(block);
        apply_transaction(&env, gas_pool, ledger, tx, used_gas, limits)
    }
}

/// Apply the actions of `tx` in order, accumulating into `used_gas`
pub fn apply_transaction(
    env: &TransitionEnv<'_>,
    gas_pool: &mut GasPool,
    ledger: &mut dyn Ledger,
    tx: &Transaction,
    used_gas: &mut u64,
    limits: &ExecutionLimits,
) -> Result<Receipt, TransitionError> {
    if tx.gas_asset_id != env.config.sys_token_id {
        return Err(TransitionError::UnsupportedFeeAsset {
            expected: env.config.sys_token_id,
            got: tx.gas_asset_id,
        });
    }

    let tx_hash = tx.hash();
    let mut total_gas = 0u64;
    let mut action_results = Vec::with_capacity(tx.actions.len());
    let mut detail = DetailTx {
        tx_hash,
        actions: Vec::with_capacity(tx.actions.len()),
    };

    for (index, action) in tx.actions.iter().enumerate() {
        let abort = AbortSignal::new();
        let guard = limits
            .action_timeout
            .map(|timeout| OvertimeGuard::arm(abort.clone(), timeout));
        let result = StateTransition::new(env, tx, action, gas_pool, abort).apply(ledger);
        drop(guard);
        let outcome = result?;

        *used_gas = used_gas.saturating_add(outcome.gas_used);
        total_gas = total_gas.saturating_add(outcome.gas_used);

        let action_hash = action.hash();
        let internal_actions = outcome
            .internal_actions
            .into_iter()
            .map(|mut internal| {
                internal.action_hash = action_hash;
                internal
            })
            .collect();
        detail.actions.push(DetailAction { internal_actions });

        let (status, error) = match &outcome.failure {
            Some(failure) => (ReceiptStatus::Failed, Some(failure.to_string())),
            None => (ReceiptStatus::Successful, None),
        };
        action_results.push(ActionResult {
            index: index as u64,
            status,
            gas_used: outcome.gas_used,
            gas_allot: GasAllotment::from_distribution(&outcome.distribution),
            error,
        });
    }

    debug!(tx = %tx_hash, gas_used = total_gas, "Transaction applied");
    Ok(Receipt {
        tx_hash,
        cumulative_gas_used: *used_gas,
        total_gas_used: total_gas,
        action_results,
        detail,
    })
}
