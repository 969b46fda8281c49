use meridian_consensus::engine::{ConsensusEngine, EngineError, SoloEngine};
use meridian_consensus::fork::{ForkController, ForkError, ForkInfo, HeaderReader};
use meridian_consensus::ledger::Ledger;
use meridian_consensus::types::{Block, BlockHeader, GasPool, Hash, Name, Transaction};
use meridian_economics::SystemFeeManager;
use meridian_execution::{
    AccountError, AccountManager, BlockProcessor, ExecutionLimits, NullVm, Receipt, StateDB,
    TransitionError, VirtualMachine,
};
use primitive_types::U256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::genesis;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block {got} does not follow head {head}")]
    UnexpectedNumber { head: u64, got: u64 },

    #[error("block {number} has parent {got}, expected {expected}")]
    UnknownParent { number: u64, expected: Hash, got: Hash },

    #[error("block {number} timestamp {got} precedes parent timestamp {parent}")]
    TimestampRegression { number: u64, parent: u64, got: u64 },

    #[error("block {number} reports {header} gas used, execution used {computed}")]
    GasUsedMismatch { number: u64, header: u64, computed: u64 },

    #[error("block {number} state root {header} does not match computed {computed}")]
    StateRootMismatch {
        number: u64,
        header: Hash,
        computed: Hash,
    },

    #[error(transparent)]
    Fork(#[from] ForkError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Account(#[from] AccountError),
}

/// Canonical headers plus the header currently being applied, which the fork
/// window may need to evict when it is one block long.
struct PendingHeaders<'a> {
    blocks: &'a [Block],
    pending: &'a BlockHeader,
}

impl HeaderReader for PendingHeaders<'_> {
    fn header_by_number(&self, number: u64) -> Option<BlockHeader> {
        if number == self.pending.number {
            return Some(self.pending.clone());
        }
        self.blocks
            .get(usize::try_from(number).ok()?)
            .map(|block| block.header.clone())
    }
}

/// In-memory canonical chain.
///
/// Blocks are executed on a copy of the head state, which replaces the head
/// only once the block has fully validated.
pub struct Chain {
    processor: BlockProcessor,
    forks: ForkController,
    fees: Arc<SystemFeeManager>,
    limits: ExecutionLimits,
    block_gas_limit: u64,
    state: StateDB,
    blocks: Vec<Block>,
    receipts: Vec<Vec<Receipt>>,
}

impl Chain {
    /// Build the genesis state from `config` with the default capabilities
    pub fn new(config: &NodeConfig) -> anyhow::Result<Self> {
        Self::with_vm(config, Arc::new(NullVm))
    }

    pub fn with_vm(config: &NodeConfig, vm: Arc<dyn VirtualMachine>) -> anyhow::Result<Self> {
        let mut state = StateDB::new();
        let genesis = genesis::initialize(config, &mut state)?;

        let chain_config = config.chain_config();
        let engine = Arc::new(SoloEngine::new(config.genesis.producer.clone()));
        let fees = Arc::new(SystemFeeManager::new(&chain_config));
        let forks = ForkController::new(chain_config.fork.clone(), chain_config.chain_name.clone())?;
        let processor = BlockProcessor::new(
            chain_config,
            config.gas.clone(),
            vm,
            engine,
            fees.clone(),
        );

        Ok(Self {
            processor,
            forks,
            fees,
            limits: config.limits(),
            block_gas_limit: config.execution.block_gas_limit,
            state,
            blocks: vec![genesis],
            receipts: vec![Vec::new()],
        })
    }

    pub fn head(&self) -> &BlockHeader {
        // Genesis is always present
        &self.blocks[self.blocks.len() - 1].header
    }

    pub fn height(&self) -> u64 {
        self.head().number
    }

    pub fn block(&self, number: u64) -> Option<&Block> {
        self.blocks.get(usize::try_from(number).ok()?)
    }

    pub fn receipts(&self, number: u64) -> Option<&[Receipt]> {
        self.receipts
            .get(usize::try_from(number).ok()?)
            .map(Vec::as_slice)
    }

    pub fn state(&self) -> &StateDB {
        &self.state
    }

    pub fn processor(&self) -> &BlockProcessor {
        &self.processor
    }

    pub fn fee_manager(&self) -> &SystemFeeManager {
        &self.fees
    }

    pub fn fork_status(&self) -> Result<ForkInfo, ChainError> {
        Ok(self.forks.fork_info(&self.state)?)
    }

    pub fn balance(&self, name: &Name, asset_id: u64) -> Result<U256, ChainError> {
        let mut view = self.state.clone();
        Ok(AccountManager::new(&mut view).get_balance(name, asset_id)?)
    }

    pub fn nonce(&self, name: &Name) -> Result<u64, ChainError> {
        let mut view = self.state.clone();
        Ok(AccountManager::new(&mut view).get_nonce(name)?)
    }

    fn check_linkage(&self, header: &BlockHeader) -> Result<(), ChainError> {
        let head = self.head();
        if header.number != head.number + 1 {
            return Err(ChainError::UnexpectedNumber {
                head: head.number,
                got: header.number,
            });
        }
        let expected = head.hash();
        if header.parent_hash != expected {
            return Err(ChainError::UnknownParent {
                number: header.number,
                expected,
                got: header.parent_hash,
            });
        }
        if header.timestamp < head.timestamp {
            return Err(ChainError::TimestampRegression {
                number: header.number,
                parent: head.timestamp,
                got: header.timestamp,
            });
        }
        Ok(())
    }

    /// Validate and execute `block` on top of the head
    pub fn import_block(&mut self, block: Block) -> Result<&[Receipt], ChainError> {
        let header = &block.header;
        self.check_linkage(header)?;
        self.forks.check_fork_id(header, &self.state)?;

        let mut state = self.state.clone();
        let outcome = self.processor.process(&block, &mut state, &self.limits)?;
        if outcome.gas_used != header.gas_used {
            return Err(ChainError::GasUsedMismatch {
                number: header.number,
                header: header.gas_used,
                computed: outcome.gas_used,
            });
        }

        let headers = PendingHeaders {
            blocks: &self.blocks,
            pending: header,
        };
        let info = self.forks.update(header, &mut state, &headers)?;

        let root = state.commit();
        if root != header.state_root {
            return Err(ChainError::StateRootMismatch {
                number: header.number,
                header: header.state_root,
                computed: root,
            });
        }

        info!(
            number = header.number,
            hash = %header.hash(),
            txs = block.transactions.len(),
            gas_used = outcome.gas_used,
            fork_id = info.cur_fork_id,
            "Imported block"
        );
        self.state = state;
        self.blocks.push(block);
        self.receipts.push(outcome.receipts);
        Ok(self.receipts.last().map(Vec::as_slice).unwrap_or_default())
    }

    /// Assemble a block on top of the head from `txs`.
    ///
    /// Transactions whose signatures do not verify, or whose execution fails
    /// with a consensus error, are left out. The head is not modified.
    pub fn build_block(&self, txs: Vec<Transaction>, timestamp: u64) -> Result<Block, ChainError> {
        let head = self.head();
        let engine = self.processor.engine();
        let chain_id = self.processor.config().chain_id;

        let mut header = BlockHeader {
            parent_hash: head.hash(),
            number: head.number + 1,
            timestamp: timestamp.max(head.timestamp),
            coinbase: head.coinbase.clone(),
            gas_limit: self.block_gas_limit,
            gas_used: 0,
            cur_fork_id: 0,
            next_fork_id: 0,
            state_root: Hash::default(),
        };
        engine.init_header(&mut header);
        self.forks.fill_fork_id(&mut header, &self.state)?;

        let mut state = self.state.clone();
        engine.prepare(&header, &mut state)?;

        let context = Block {
            header: header.clone(),
            transactions: Vec::new(),
        };
        let mut gas_pool = GasPool::new(header.gas_limit);
        let mut gas_used = 0u64;
        let mut included = Vec::with_capacity(txs.len());

        for mut tx in txs {
            let tx_hash = tx.hash();
            let recovered = {
                let accounts = AccountManager::new(&mut state);
                tx.actions
                    .iter_mut()
                    .try_for_each(|action| accounts.recover_action(action, chain_id))
            };
            if let Err(e) = recovered {
                warn!(tx = %tx_hash, error = %e, "Dropping transaction with invalid signatures");
                continue;
            }

            let snapshot = state.snapshot();
            let (pool_before, used_before) = (gas_pool, gas_used);
            match self.processor.apply_transaction(
                &context,
                &mut gas_pool,
                &mut state,
                &tx,
                &mut gas_used,
                &self.limits,
            ) {
                Ok(_) => included.push(tx),
                Err(e) => {
                    state.revert_to_snapshot(snapshot);
                    gas_pool = pool_before;
                    gas_used = used_before;
                    warn!(tx = %tx_hash, error = %e, "Dropping transaction");
                }
            }
        }

        engine.finalize(&header, &mut state)?;
        header.gas_used = gas_used;

        let headers = PendingHeaders {
            blocks: &self.blocks,
            pending: &header,
        };
        self.forks.update(&header, &mut state, &headers)?;
        header.state_root = state.commit();

        Ok(Block {
            header,
            transactions: included,
        })
    }
}
