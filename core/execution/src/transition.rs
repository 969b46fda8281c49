// meridian/core/execution/src/transition.rs

// State transition of a single action: gas purchase, intrinsic gas, dispatch
// by action kind, nonce increment, refund and fee distribution.
use crate::accounts::{AccountContext, AccountManager};
use crate::fees::{FeeCategory, FeeError, FeeRecorder, GasDistributionMap};
use crate::gas::GasTable;
use crate::metrics::{
    ACTIONS_APPLIED_TOTAL, ACTION_GAS_USED, FEE_RECORDS_TOTAL, SIGNATURE_CHECKS_TOTAL,
};
use crate::types::{AccountError, ActionFailure, ExecutionError};
use crate::vm::{AbortSignal, ExecutionFrame, VirtualMachine, VmContext, VmOutcome};
use meridian_consensus::engine::{ConsensusEngine, EngineError};
use meridian_consensus::ledger::{Ledger, LedgerError};
use meridian_consensus::params::ChainConfig;
use meridian_consensus::types::{
    Action, ActionKind, GasLimitReached, GasPool, InternalAction, Name, Transaction,
};
use primitive_types::U256;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that invalidate the block containing the action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("insufficient balance for gas: {payer} holds {have}, needs {need}")]
    InsufficientBalanceForGas { payer: Name, need: U256, have: U256 },

    #[error(transparent)]
    GasLimitReached(#[from] GasLimitReached),

    #[error("nonce too low for {name}: state {state}, action {action}")]
    NonceTooLow { name: Name, state: u64, action: u64 },

    #[error("nonce too high for {name}: state {state}, action {action}")]
    NonceTooHigh { name: Name, state: u64, action: u64 },

    #[error("payer not supported: {0}")]
    PayerNotSupported(&'static str),

    #[error("only the system asset {expected} pays fees, got {got}")]
    UnsupportedFeeAsset { expected: u64, got: u64 },

    #[error("signature check failed: {0}")]
    Signature(#[source] AccountError),

    #[error("execution error: {0}")]
    Execution(ExecutionError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Fee(#[from] FeeError),

    #[error("consensus engine: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Block-level environment shared by every action of a block
pub struct TransitionEnv<'a> {
    pub config: &'a ChainConfig,
    pub gas_table: &'a GasTable,
    pub fork_id: u64,
    pub number: u64,
    pub coinbase: Name,
    pub vm: &'a dyn VirtualMachine,
    pub engine: &'a dyn ConsensusEngine,
    pub fees: &'a dyn FeeRecorder,
}

/// Result of an applied action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub output: Vec<u8>,
    pub gas_used: u64,
    /// Set when the action was applied but failed
    pub failure: Option<ActionFailure>,
    pub internal_actions: Vec<InternalAction>,
    pub distribution: GasDistributionMap,
    /// Whether signatures were verified rather than trusted from the cache
    pub signature_checked: bool,
}

impl TransitionOutcome {
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Full signature verification is skipped only when the cached author
/// versions are present and all still match. Lookup failures count as a
/// mismatch.
pub fn needs_signature_check(accounts: &AccountManager<'_>, action: &Action) -> bool {
    if action.author_versions.is_empty() {
        return true;
    }
    action
        .author_versions
        .iter()
        .any(|(name, version)| match accounts.get_author_version(name) {
            Ok(live) => live != *version,
            Err(_) => true,
        })
}

/// Share of `gas` at `ratio` percent, truncating
fn ratio_of(gas: u64, ratio: u64) -> i64 {
    let share = (gas as u128) * (ratio as u128) / 100;
    i64::try_from(share).unwrap_or(i64::MAX)
}

/// Ledger faults invalidate the block; other account errors fail the action
fn account_failure(e: AccountError) -> Result<ActionFailure, TransitionError> {
    match e {
        AccountError::Ledger(e) => Err(TransitionError::Ledger(e)),
        e => Ok(e.into()),
    }
}

fn engine_failure(e: EngineError) -> Result<ActionFailure, TransitionError> {
    match e {
        EngineError::Ledger(e) => Err(TransitionError::Ledger(e)),
        e => Ok(e.into()),
    }
}

/// Applies one action of a transaction
pub struct StateTransition<'e, 'a> {
    env: &'e TransitionEnv<'a>,
    tx: &'e Transaction,
    action: &'e Action,
    gas_pool: &'e mut GasPool,
    abort: AbortSignal,
    gas: u64,
    initial_gas: u64,
}

impl<'e, 'a> StateTransition<'e, 'a> {
    pub fn new(
        env: &'e TransitionEnv<'a>,
        tx: &'e Transaction,
        action: &'e Action,
        gas_pool: &'e mut GasPool,
        abort: AbortSignal,
    ) -> Self {
        Self {
            env,
            tx,
            action,
            gas_pool,
            abort,
            gas: 0,
            initial_gas: 0,
        }
    }

    fn gas_used(&self) -> u64 {
        self.initial_gas - self.gas
    }

    fn use_gas(&mut self, amount: u64) -> Result<(), ExecutionError> {
        if self.gas < amount {
            return Err(ExecutionError::OutOfGas);
        }
        self.gas -= amount;
        Ok(())
    }

    fn check_nonce(&self, accounts: &AccountManager<'_>) -> Result<(), TransitionError> {
        let name = &self.action.sender;
        let state = accounts.get_nonce(name)?;
        let action = self.action.nonce;
        if state < action {
            return Err(TransitionError::NonceTooHigh {
                name: name.clone(),
                state,
                action,
            });
        }
        if state > action {
            return Err(TransitionError::NonceTooLow {
                name: name.clone(),
                state,
                action,
            });
        }
        Ok(())
    }

    /// Account paying for gas and the price it pays
    fn resolve_payer(&self) -> Result<(Name, U256), TransitionError> {
        if self.tx.payer_exists() {
            if self.env.fork_id < self.env.config.payer_fork_id {
                return Err(TransitionError::PayerNotSupported(
                    "fee payers are not enabled at the current fork",
                ));
            }
            let payer = self.action.payer.as_ref().ok_or(
                TransitionError::PayerNotSupported("action lacks the transaction's payer"),
            )?;
            return Ok((payer.payer.clone(), payer.gas_price));
        }
        if self.action.payer.is_some() {
            return Err(TransitionError::PayerNotSupported(
                "action declares a payer the transaction does not",
            ));
        }
        Ok((self.action.sender.clone(), self.tx.gas_price))
    }

    fn buy_gas(
        &mut self,
        accounts: &mut AccountManager<'_>,
        payer: &Name,
        gas_price: U256,
    ) -> Result<(), TransitionError> {
        let asset_id = self.tx.gas_asset_id;
        let cost = U256::from(self.action.gas_limit)
            .checked_mul(gas_price)
            .ok_or_else(|| TransitionError::InsufficientBalanceForGas {
                payer: payer.clone(),
                need: U256::MAX,
                have: U256::zero(),
            })?;
        let have = accounts.get_balance(payer, asset_id)?;
        if have < cost {
            return Err(TransitionError::InsufficientBalanceForGas {
                payer: payer.clone(),
                need: cost,
                have,
            });
        }

        self.gas_pool.sub_gas(self.action.gas_limit)?;
        self.gas += self.action.gas_limit;
        self.initial_gas = self.action.gas_limit;
        accounts.transfer_asset(payer, &self.env.config.fee_name, asset_id, cost)?;
        Ok(())
    }

    fn refund_gas(
        &mut self,
        accounts: &mut AccountManager<'_>,
        payer: &Name,
        gas_price: U256,
    ) -> Result<(), TransitionError> {
        let remaining = U256::from(self.gas).saturating_mul(gas_price);
        accounts.transfer_asset(
            &self.env.config.fee_name,
            payer,
            self.tx.gas_asset_id,
            remaining,
        )?;
        self.gas_pool.add_gas(self.gas);
        Ok(())
    }

    fn vm_context(&self, gas_price: U256) -> VmContext<'a> {
        VmContext {
            config: self.env.config,
            fork_id: self.env.fork_id,
            number: self.env.number,
            coinbase: self.env.coinbase.clone(),
            gas_price,
            fee_asset_id: self.tx.gas_asset_id,
            abort: self.abort.clone(),
        }
    }

    fn account_context(&self, from_extra: Vec<Name>) -> AccountContext<'e> {
        AccountContext {
            action: self.action,
            number: self.env.number,
            fork_id: self.env.fork_id,
            config: self.env.config,
            from_extra,
        }
    }

    /// Contract bound to the action's asset when it is neither sender nor
    /// recipient and the fork enforces contract-bound transfers
    fn third_party_contract(
        &self,
        accounts: &AccountManager<'_>,
    ) -> Result<Option<Name>, TransitionError> {
        if self.env.fork_id < self.env.config.contract_asset_fork_id {
            return Ok(None);
        }
        let contract = accounts
            .get_asset_info(self.action.asset_id)?
            .and_then(|asset| asset.contract)
            .filter(|c| c != &self.action.sender && c != &self.action.recipient);
        Ok(contract)
    }

    fn apply_vm(&mut self, outcome: VmOutcome) -> (Vec<u8>, Option<ActionFailure>) {
        self.gas = outcome.gas_left.min(self.gas);
        (outcome.output, outcome.error.map(ActionFailure::from))
    }

    fn dispatch(
        &mut self,
        accounts: &mut AccountManager<'_>,
        frame: &mut ExecutionFrame,
        gas_price: U256,
    ) -> Result<(Vec<u8>, Option<ActionFailure>), TransitionError> {
        let action = self.action;
        let env = self.env;

        let result = match action.kind {
            ActionKind::CreateContract => {
                let ctx = self.vm_context(gas_price);
                let outcome = env.vm.create(&ctx, accounts, frame, action, self.gas);
                self.apply_vm(outcome)
            }
            ActionKind::CallContract => {
                let ctx = self.vm_context(gas_price);
                let outcome = env.vm.call(&ctx, accounts, frame, action, self.gas);
                self.apply_vm(outcome)
            }
            ActionKind::Transfer => {
                let mut from_extra = Vec::new();
                if let Some(contract) = self.third_party_contract(accounts)? {
                    let ctx = self.vm_context(gas_price);
                    let (gas_left, allowed) = env.vm.can_transfer_contract_asset(
                        &ctx,
                        accounts,
                        frame,
                        &action.sender,
                        self.gas,
                        action.asset_id,
                        &contract,
                    );
                    self.gas = gas_left.min(self.gas);
                    if allowed {
                        from_extra.push(contract);
                    }
                }
                let ctx = self.account_context(from_extra);
                match accounts.process(&ctx) {
                    Ok(internal) => {
                        frame.internal_actions.extend(internal);
                        (Vec::new(), None)
                    }
                    Err(e) => (Vec::new(), Some(account_failure(e)?)),
                }
            }
            ActionKind::Candidate(_) => {
                match env.engine.process_action(
                    env.fork_id,
                    env.number,
                    env.config,
                    accounts.ledger(),
                    action,
                ) {
                    Ok(internal) => {
                        frame.internal_actions.extend(internal);
                        (Vec::new(), None)
                    }
                    Err(e) => (Vec::new(), Some(engine_failure(e)?)),
                }
            }
            ActionKind::Account(_) | ActionKind::Asset(_) => {
                let ctx = self.account_context(Vec::new());
                match accounts.process(&ctx) {
                    Ok(internal) => {
                        frame.internal_actions.extend(internal);
                        (Vec::new(), None)
                    }
                    Err(e) => (Vec::new(), Some(account_failure(e)?)),
                }
            }
        };
        Ok(result)
    }

    fn distribute_to_contract(&self, map: &mut GasDistributionMap, name: Name, intrinsic: u64) {
        let share = ratio_of(intrinsic, self.env.config.charge.contract_ratio);
        map.add(name, FeeCategory::ContractFounder, share);
        map.settle_coinbase(&self.env.coinbase, self.gas_used());
    }

    fn distribute_to_system_account(&self, map: &mut GasDistributionMap, name: Name) {
        let share = ratio_of(self.gas_used(), self.env.config.charge.contract_ratio);
        map.set(name, FeeCategory::SystemAccount, share);
        map.settle_coinbase(&self.env.coinbase, self.gas_used());
    }

    fn distribute_gas(
        &self,
        accounts: &AccountManager<'_>,
        map: &mut GasDistributionMap,
        intrinsic: u64,
    ) -> Result<(), TransitionError> {
        let config = self.env.config;
        match self.action.kind {
            ActionKind::Transfer => {
                if let Some(contract) = self.third_party_contract(accounts)? {
                    self.distribute_to_contract(map, contract, intrinsic);
                    return Ok(());
                }
                if let Some(asset) = accounts.get_asset_info(self.action.asset_id)? {
                    let share = ratio_of(self.gas_used(), config.charge.asset_ratio);
                    map.set(asset.asset_name, FeeCategory::AssetFounder, share);
                }
                map.settle_coinbase(&self.env.coinbase, self.gas_used());
            }
            ActionKind::CreateContract | ActionKind::CallContract => {
                self.distribute_to_contract(map, self.action.recipient.clone(), intrinsic);
            }
            ActionKind::Account(_) => {
                self.distribute_to_system_account(map, config.account_name.clone());
            }
            ActionKind::Asset(_) => {
                self.distribute_to_system_account(map, config.asset_name.clone());
            }
            ActionKind::Candidate(_) => {
                self.distribute_to_system_account(map, config.dpos_name.clone());
            }
        }
        Ok(())
    }

    /// Record positive shares with the fee manager in (name, category) order
    fn distribute_fee(
        &self,
        accounts: &mut AccountManager<'_>,
        map: &GasDistributionMap,
        gas_price: U256,
    ) -> Result<(), TransitionError> {
        for (key, gas) in map.iter() {
            if gas.value <= 0 {
                continue;
            }
            let value = gas_price
                .checked_mul(U256::from(gas.value as u64))
                .ok_or_else(|| FeeError::Overflow(key.name.clone()))?;
            self.env.fees.record_fee_in_system(
                accounts.ledger(),
                &key.name,
                gas.category,
                self.tx.gas_asset_id,
                value,
            )?;
            FEE_RECORDS_TOTAL
                .with_label_values(&[gas.category.as_str()])
                .inc();
        }
        Ok(())
    }

    /// Apply the action. `Err` means the block is invalid; the caller owns
    /// rolling the ledger back.
    pub fn apply(mut self, ledger: &mut dyn Ledger) -> Result<TransitionOutcome, TransitionError> {
        let mut accounts = AccountManager::new(ledger);
        let action = self.action;

        // Checks that never touch state come first
        let signature_checked = needs_signature_check(&accounts, action);
        if signature_checked {
            accounts
                .verify_action_signatures(action, self.env.config.chain_id)
                .map_err(|e| match e {
                    AccountError::Ledger(e) => TransitionError::Ledger(e),
                    e => TransitionError::Signature(e),
                })?;
            SIGNATURE_CHECKS_TOTAL.with_label_values(&["verified"]).inc();
        } else {
            SIGNATURE_CHECKS_TOTAL.with_label_values(&["skipped"]).inc();
        }
        self.check_nonce(&accounts)?;
        let (payer, gas_price) = self.resolve_payer()?;

        self.buy_gas(&mut accounts, &payer, gas_price)?;

        let mut frame = ExecutionFrame::default();
        let mut output = Vec::new();
        let charged = self
            .env
            .gas_table
            .intrinsic_gas(action)
            .and_then(|g| self.use_gas(g).map(|_| g));

        let (intrinsic, failure) = match charged {
            Err(e) => {
                // The whole limit is forfeited and nothing is dispatched
                self.gas = 0;
                (None, Some(ActionFailure::Execution(e)))
            }
            Ok(intrinsic) => {
                let snapshot = accounts.ledger().snapshot();
                let (ret, failure) = self.dispatch(&mut accounts, &mut frame, gas_price)?;
                output = ret;
                if let Some(failure) = &failure {
                    debug!(
                        sender = %action.sender,
                        kind = action.kind.label(),
                        error = %failure,
                        "Action failed"
                    );
                    if let ActionFailure::Execution(e) = failure {
                        if e.is_consensus_fatal() {
                            warn!(sender = %action.sender, error = %e, "Escalating execution error");
                            return Err(TransitionError::Execution(e.clone()));
                        }
                    }
                    accounts.ledger().revert_to_snapshot(snapshot);
                }
                (Some(intrinsic), failure)
            }
        };

        let nonce = accounts.get_nonce(&action.sender)?;
        accounts.set_nonce(&action.sender, nonce + 1)?;
        self.refund_gas(&mut accounts, &payer, gas_price)?;

        let mut distribution = std::mem::take(&mut frame.founder_gas);
        match intrinsic {
            Some(intrinsic) => self.distribute_gas(&accounts, &mut distribution, intrinsic)?,
            None => distribution.settle_coinbase(&self.env.coinbase, self.gas_used()),
        }
        self.distribute_fee(&mut accounts, &distribution, gas_price)?;

        let gas_used = self.gas_used();
        let status = if failure.is_some() { "failed" } else { "success" };
        ACTIONS_APPLIED_TOTAL
            .with_label_values(&[action.kind.label(), status])
            .inc();
        ACTION_GAS_USED.observe(gas_used as f64);

        Ok(TransitionOutcome {
            output,
            gas_used,
            failure,
            internal_actions: frame.internal_actions,
            distribution,
            signature_checked,
        })
    }
}
