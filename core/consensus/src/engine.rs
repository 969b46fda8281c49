// meridian/core/consensus/src/engine.rs

// Consensus engine capability used by block production and the state
// transition. Candidate, voting and governance actions are owned entirely by
// the engine.
use crate::ledger::{Ledger, LedgerError, LedgerExt};
use crate::params::ChainConfig;
use crate::types::{Action, ActionKind, BlockHeader, CandidateOp, InternalAction, Name};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),

    #[error("action kind {0} is not a consensus action")]
    NotConsensusAction(&'static str),

    #[error("candidate {0} already registered")]
    CandidateExists(Name),

    #[error("candidate {0} not found")]
    CandidateNotFound(Name),

    #[error("engine actions carry no value, got {0}")]
    UnexpectedValue(U256),

    #[error("block {number} produced by {got}, expected {expected}")]
    UnknownProducer { number: u64, expected: Name, got: Name },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Pluggable consensus engine
pub trait ConsensusEngine: Send + Sync {
    /// Account credited with the coinbase share of a block's fees
    fn author(&self, header: &BlockHeader) -> Name;

    /// Fill the engine-owned fields of a header under construction
    fn init_header(&self, header: &mut BlockHeader);

    /// Validate the engine-owned header fields and ready the state before
    /// the block's transactions are applied
    fn prepare(&self, header: &BlockHeader, ledger: &mut dyn Ledger) -> Result<(), EngineError>;

    /// Engine bookkeeping after every transaction of a block has been applied
    fn finalize(&self, header: &BlockHeader, ledger: &mut dyn Ledger) -> Result<(), EngineError>;

    /// Execute a candidate, voting or governance action
    fn process_action(
        &self,
        fork_id: u64,
        number: u64,
        config: &ChainConfig,
        ledger: &mut dyn Ledger,
        action: &Action,
    ) -> Result<Vec<InternalAction>, EngineError>;
}

/// Candidate record kept by [`SoloEngine`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInfo {
    pub name: Name,
    pub url: String,
    pub registered_at: u64,
    pub updated_at: u64,
}

fn candidate_key(name: &Name) -> String {
    format!("candidate/{name}")
}

fn produced_key(name: &Name) -> String {
    format!("produced/{name}")
}

/// Single-producer engine for development chains.
///
/// Candidate registration is recorded under the DPoS system account so the
/// full action pipeline can be exercised; elections, votes and stake
/// movement are not supported.
#[derive(Debug, Clone)]
pub struct SoloEngine {
    producer: Name,
}

impl SoloEngine {
    pub fn new(producer: Name) -> Self {
        Self { producer }
    }

    pub fn producer(&self) -> &Name {
        &self.producer
    }

    pub fn candidate(
        &self,
        config: &ChainConfig,
        ledger: &dyn Ledger,
        name: &Name,
    ) -> Result<Option<CandidateInfo>, EngineError> {
        Ok(ledger.get_record(config.dpos_name.as_str(), &candidate_key(name))?)
    }

    /// Number of blocks finalized with `name` as coinbase
    pub fn produced_blocks(&self, ledger: &dyn Ledger, name: &Name) -> Result<u64, EngineError> {
        Ok(ledger
            .get_record(name.as_str(), &produced_key(name))?
            .unwrap_or(0))
    }
}

impl ConsensusEngine for SoloEngine {
    fn author(&self, header: &BlockHeader) -> Name {
        header.coinbase.clone()
    }

    fn init_header(&self, header: &mut BlockHeader) {
        header.coinbase = self.producer.clone();
    }

    fn prepare(&self, header: &BlockHeader, _ledger: &mut dyn Ledger) -> Result<(), EngineError> {
        if header.coinbase != self.producer {
            return Err(EngineError::UnknownProducer {
                number: header.number,
                expected: self.producer.clone(),
                got: header.coinbase.clone(),
            });
        }
        Ok(())
    }

    fn finalize(&self, header: &BlockHeader, ledger: &mut dyn Ledger) -> Result<(), EngineError> {
        // Production counts are stored under the producer's own account
        let owner = header.coinbase.as_str();
        let key = produced_key(&header.coinbase);
        let produced: u64 = ledger.get_record(owner, &key)?.unwrap_or(0);
        ledger.put_record(owner, &key, &(produced + 1))?;
        Ok(())
    }

    fn process_action(
        &self,
        fork_id: u64,
        number: u64,
        config: &ChainConfig,
        ledger: &mut dyn Ledger,
        action: &Action,
    ) -> Result<Vec<InternalAction>, EngineError> {
        let op = match action.kind {
            ActionKind::Candidate(op) => op,
            other => return Err(EngineError::NotConsensusAction(other.label())),
        };
        if !action.value.is_zero() {
            return Err(EngineError::UnexpectedValue(action.value));
        }

        let owner = config.dpos_name.as_str();
        let key = candidate_key(&action.sender);
        let existing: Option<CandidateInfo> = ledger.get_record(owner, &key)?;
        let url = String::from_utf8_lossy(&action.payload).into_owned();

        match op {
            CandidateOp::Register => {
                if existing.is_some() {
                    return Err(EngineError::CandidateExists(action.sender.clone()));
                }
                let info = CandidateInfo {
                    name: action.sender.clone(),
                    url,
                    registered_at: number,
                    updated_at: number,
                };
                ledger.put_record(owner, &key, &info)?;
            }
            CandidateOp::Update => {
                let mut info =
                    existing.ok_or_else(|| EngineError::CandidateNotFound(action.sender.clone()))?;
                info.url = url;
                info.updated_at = number;
                ledger.put_record(owner, &key, &info)?;
            }
            CandidateOp::Unregister => {
                if existing.is_none() {
                    return Err(EngineError::CandidateNotFound(action.sender.clone()));
                }
                ledger.delete(owner, &key);
            }
            other => {
                return Err(EngineError::Unsupported(
                    ActionKind::Candidate(other).label(),
                ))
            }
        }

        debug!(
            fork_id,
            number,
            kind = action.kind.label(),
            candidate = %action.sender,
            "Processed consensus action"
        );

        Ok(vec![InternalAction::new(
            action.kind.label(),
            action.sender.clone(),
            config.dpos_name.clone(),
            action.asset_id,
            U256::zero(),
        )])
    }
}
