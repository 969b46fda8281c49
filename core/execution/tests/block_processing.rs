// Block-level execution: receipts, gas accounting, fee distribution and the
// action timeout
use ed25519_dalek::SigningKey;
use meridian_consensus::crypto::{public_key, sign_action};
use meridian_consensus::engine::SoloEngine;
use meridian_consensus::ledger::Ledger;
use meridian_consensus::params::ChainConfig;
use meridian_consensus::types::{
    AccountOp, Action, ActionKind, AssetOp, Block, BlockHeader, CandidateOp, Hash, Name,
    Transaction,
};
use meridian_execution::types::{
    encode_payload, IssueAssetPayload, UpdateAccountPayload, UpdateAssetPayload,
};
use meridian_execution::{
    AccountManager, BlockProcessor, ExecutionError, ExecutionFrame, ExecutionLimits, FeeCategory,
    FeeError, FeeRecorder, GasTable, NullVm, ReceiptStatus, StateDB, TransitionError,
    VirtualMachine, VmContext, VmOutcome,
};
use parking_lot::Mutex;
use primitive_types::U256;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn name(s: &str) -> Name {
    Name::new(s).unwrap()
}

fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

#[derive(Default)]
struct RecordingFees {
    records: Mutex<Vec<(Name, FeeCategory, U256)>>,
}

impl FeeRecorder for RecordingFees {
    fn record_fee_in_system(
        &self,
        _ledger: &mut dyn Ledger,
        name: &Name,
        category: FeeCategory,
        _asset_id: u64,
        value: U256,
    ) -> Result<(), FeeError> {
        self.records.lock().push((name.clone(), category, value));
        Ok(())
    }
}

/// Spins until the abort signal fires, then reports the overrun
struct SlowVm;

impl VirtualMachine for SlowVm {
    fn create(
        &self,
        ctx: &VmContext<'_>,
        accounts: &mut AccountManager<'_>,
        frame: &mut ExecutionFrame,
        action: &Action,
        gas: u64,
    ) -> VmOutcome {
        self.call(ctx, accounts, frame, action, gas)
    }

    fn call(
        &self,
        ctx: &VmContext<'_>,
        _accounts: &mut AccountManager<'_>,
        _frame: &mut ExecutionFrame,
        _action: &Action,
        gas: u64,
    ) -> VmOutcome {
        for _ in 0..5_000 {
            if ctx.abort.is_aborted() {
                return VmOutcome::failed(gas, ExecutionError::ExecutionOverTime);
            }
            thread::sleep(Duration::from_millis(1));
        }
        VmOutcome {
            output: Vec::new(),
            gas_left: gas,
            error: None,
        }
    }

    fn can_transfer_contract_asset(
        &self,
        _ctx: &VmContext<'_>,
        _accounts: &mut AccountManager<'_>,
        _frame: &mut ExecutionFrame,
        _sender: &Name,
        gas: u64,
        _asset_id: u64,
        _contract: &Name,
    ) -> (u64, bool) {
        (gas, false)
    }
}

/// Charges up to `share` gas on behalf of a nested contract founder
struct NestedFounderVm(u64);

impl VirtualMachine for NestedFounderVm {
    fn create(
        &self,
        ctx: &VmContext<'_>,
        accounts: &mut AccountManager<'_>,
        frame: &mut ExecutionFrame,
        action: &Action,
        gas: u64,
    ) -> VmOutcome {
        self.call(ctx, accounts, frame, action, gas)
    }

    fn call(
        &self,
        _ctx: &VmContext<'_>,
        _accounts: &mut AccountManager<'_>,
        frame: &mut ExecutionFrame,
        _action: &Action,
        gas: u64,
    ) -> VmOutcome {
        let share = self.0.min(gas);
        frame
            .founder_gas
            .add(name("nested"), FeeCategory::ContractFounder, share as i64);
        VmOutcome {
            output: Vec::new(),
            gas_left: gas - share,
            error: None,
        }
    }

    fn can_transfer_contract_asset(
        &self,
        _ctx: &VmContext<'_>,
        _accounts: &mut AccountManager<'_>,
        _frame: &mut ExecutionFrame,
        _sender: &Name,
        gas: u64,
        _asset_id: u64,
        _contract: &Name,
    ) -> (u64, bool) {
        (gas, false)
    }
}

fn genesis_state(config: &ChainConfig) -> StateDB {
    let mut state = StateDB::new();
    let mut accounts = AccountManager::new(&mut state);
    let mut seed = 100u8;
    for account in [
        &config.fee_name,
        &config.account_name,
        &config.asset_name,
        &config.dpos_name,
    ] {
        accounts
            .create_account(account.clone(), config.chain_name.clone(), public_key(&key(seed)), 0)
            .unwrap();
        seed += 1;
    }
    for (seed, account) in [(1, "alice"), (2, "bob"), (4, "producer"), (5, "token")] {
        accounts
            .create_account(name(account), name(account), public_key(&key(seed)), 0)
            .unwrap();
    }
    accounts
        .issue_asset(
            &config.asset_name,
            IssueAssetPayload {
                asset_name: name("coin"),
                symbol: "COIN".to_string(),
                amount: U256::from(10_000_000u64),
                decimals: 18,
                founder: None,
                owner: name("alice"),
                upper_limit: U256::zero(),
                contract: None,
                description: String::new(),
            },
            0,
        )
        .unwrap();
    state.commit();
    state
}

fn processor(config: &ChainConfig, vm: Arc<dyn VirtualMachine>, fees: Arc<RecordingFees>) -> BlockProcessor {
    BlockProcessor::new(
        config.clone(),
        GasTable::default(),
        vm,
        Arc::new(SoloEngine::new(name("producer"))),
        fees,
    )
}

fn transfer(config: &ChainConfig, nonce: u64, value: u64, gas_limit: u64) -> Action {
    let mut action = Action::new(
        ActionKind::Transfer,
        name("alice"),
        name("bob"),
        nonce,
        0,
        gas_limit,
        U256::from(value),
        Vec::new(),
    );
    sign_action(&mut action, &key(1), config.chain_id);
    action
}

fn block(transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            parent_hash: Hash::default(),
            number: 1,
            timestamp: 0,
            coinbase: name("producer"),
            gas_limit: 10_000_000,
            gas_used: 0,
            cur_fork_id: 4,
            next_fork_id: 4,
            state_root: Hash::default(),
        },
        transactions,
    }
}

#[test]
fn test_block_receipts_accumulate_gas() {
    let config = ChainConfig::devnet();
    let mut state = genesis_state(&config);
    let fees = Arc::new(RecordingFees::default());
    let processor = processor(&config, Arc::new(NullVm), fees.clone());

    let txs = vec![
        Transaction::new(vec![transfer(&config, 0, 10, 200_000)], 0, U256::one()),
        Transaction::new(
            vec![transfer(&config, 1, 5, 200_000), transfer(&config, 2, 5, 200_000)],
            0,
            U256::one(),
        ),
    ];
    let outcome = processor
        .process(&block(txs), &mut state, &ExecutionLimits::default())
        .unwrap();

    assert_eq!(outcome.receipts.len(), 2);
    assert_eq!(outcome.gas_used, 300_000);
    assert_eq!(outcome.receipts[0].cumulative_gas_used, 100_000);
    assert_eq!(outcome.receipts[1].cumulative_gas_used, 300_000);
    assert_eq!(outcome.receipts[1].total_gas_used, 200_000);
    assert!(outcome.receipts.iter().all(|r| r.succeeded()));

    let result = &outcome.receipts[0].action_results[0];
    let shares: Vec<_> = result
        .gas_allot
        .iter()
        .map(|a| (a.account.to_string(), a.category, a.gas))
        .collect();
    assert_eq!(
        shares,
        vec![
            ("coin".to_string(), FeeCategory::AssetFounder, 80_000),
            ("producer".to_string(), FeeCategory::Coinbase, 20_000),
        ]
    );
    assert_eq!(fees.records.lock().len(), 6);

    let accounts = AccountManager::new(&mut state);
    assert_eq!(accounts.get_balance(&name("bob"), 0).unwrap(), U256::from(20));
    assert_eq!(accounts.get_nonce(&name("alice")).unwrap(), 3);
    let engine = SoloEngine::new(name("producer"));
    assert_eq!(engine.produced_blocks(&state, &name("producer")).unwrap(), 1);
}

#[test]
fn test_failed_action_is_reported_not_fatal() {
    let config = ChainConfig::devnet();
    let mut state = genesis_state(&config);
    let processor = processor(&config, Arc::new(NullVm), Arc::new(RecordingFees::default()));

    let mut call = Action::new(
        ActionKind::CallContract,
        name("alice"),
        name("token"),
        0,
        0,
        600_000,
        U256::zero(),
        Vec::new(),
    );
    sign_action(&mut call, &key(1), config.chain_id);
    let outcome = processor
        .process(
            &block(vec![Transaction::new(vec![call], 0, U256::one())]),
            &mut state,
            &ExecutionLimits::default(),
        )
        .unwrap();

    let result = &outcome.receipts[0].action_results[0];
    assert_eq!(result.status, ReceiptStatus::Failed);
    assert!(result.error.is_some());
    assert_eq!(result.gas_used, 100_000);
}

#[test]
fn test_foreign_fee_asset_invalidates_block() {
    let config = ChainConfig::devnet();
    let mut state = genesis_state(&config);
    let processor = processor(&config, Arc::new(NullVm), Arc::new(RecordingFees::default()));
    let tx = Transaction::new(vec![transfer(&config, 0, 1, 200_000)], 7, U256::one());

    assert!(matches!(
        processor.process(&block(vec![tx]), &mut state, &ExecutionLimits::default()),
        Err(TransitionError::UnsupportedFeeAsset { expected: 0, got: 7 })
    ));
}

#[test]
fn test_overtime_action_invalidates_block() {
    let config = ChainConfig::devnet();
    let mut state = genesis_state(&config);
    let processor = processor(&config, Arc::new(SlowVm), Arc::new(RecordingFees::default()));

    let mut call = Action::new(
        ActionKind::CallContract,
        name("alice"),
        name("token"),
        0,
        0,
        600_000,
        U256::zero(),
        Vec::new(),
    );
    sign_action(&mut call, &key(1), config.chain_id);
    let limits = ExecutionLimits {
        action_timeout: Some(Duration::from_millis(20)),
    };

    assert!(matches!(
        processor.process(
            &block(vec![Transaction::new(vec![call], 0, U256::one())]),
            &mut state,
            &limits
        ),
        Err(TransitionError::Execution(ExecutionError::ExecutionOverTime))
    ));
}

#[test]
fn test_foreign_producer_rejected() {
    let config = ChainConfig::devnet();
    let mut state = genesis_state(&config);
    let processor = processor(&config, Arc::new(NullVm), Arc::new(RecordingFees::default()));
    let mut block = block(Vec::new());
    block.header.coinbase = name("bob");

    assert!(matches!(
        processor.process(&block, &mut state, &ExecutionLimits::default()),
        Err(TransitionError::Engine(_))
    ));
}

/// One action of each dispatch branch, sent by alice
fn action_of_kind(config: &ChainConfig, kind: usize, gas_limit: u64, value: u64, data: Vec<u8>) -> Action {
    let (kind, recipient, value, payload) = match kind {
        0 => (ActionKind::Transfer, name("bob"), value, data),
        1 => (ActionKind::CallContract, name("token"), value, data),
        2 => (
            ActionKind::Account(AccountOp::Update),
            config.account_name.clone(),
            0,
            encode_payload(&UpdateAccountPayload { founder: name("bob") }).unwrap(),
        ),
        3 => (
            ActionKind::Asset(AssetOp::Update),
            config.asset_name.clone(),
            0,
            encode_payload(&UpdateAssetPayload {
                asset_id: 0,
                founder: name("bob"),
            })
            .unwrap(),
        ),
        _ => (
            ActionKind::Candidate(CandidateOp::Register),
            config.dpos_name.clone(),
            0,
            data,
        ),
    };
    let mut action = Action::new(
        kind,
        name("alice"),
        recipient,
        0,
        0,
        gas_limit,
        U256::from(value),
        payload,
    );
    sign_action(&mut action, &key(1), config.chain_id);
    action
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_distribution_sums_to_gas_used(
        kind in 0usize..5,
        gas_limit in 50_000u64..400_000,
        value in 0u64..1_000,
        nested_share in 0u64..200_000,
        data in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let config = ChainConfig::devnet();
        let mut state = genesis_state(&config);
        let processor = processor(
            &config,
            Arc::new(NestedFounderVm(nested_share)),
            Arc::new(RecordingFees::default()),
        );

        let action = action_of_kind(&config, kind, gas_limit, value, data);
        let outcome = processor
            .process(
                &block(vec![Transaction::new(vec![action], 0, U256::one())]),
                &mut state,
                &ExecutionLimits::default(),
            )
            .unwrap();

        let result = &outcome.receipts[0].action_results[0];
        let total: u64 = result.gas_allot.iter().map(|a| a.gas).sum();
        prop_assert_eq!(total, result.gas_used);
        prop_assert!(result.gas_used <= gas_limit);

        // Past intrinsic gas, every kind routes a share away from the coinbase
        let intrinsic_paid = result.gas_allot.iter().any(|a| a.category != FeeCategory::Coinbase);
        let expected = match kind {
            0 => FeeCategory::AssetFounder,
            1 => FeeCategory::ContractFounder,
            _ => FeeCategory::SystemAccount,
        };
        if intrinsic_paid {
            prop_assert!(result.gas_allot.iter().any(|a| a.category == expected));
        }
    }
}
