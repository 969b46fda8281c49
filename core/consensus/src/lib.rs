// meridian/core/consensus/src/lib.rs

pub mod crypto;
pub mod engine;
pub mod fork;
pub mod ledger;
pub mod metrics;
pub mod params;
pub mod types;

pub use crypto::CryptoError;
pub use engine::{CandidateInfo, ConsensusEngine, EngineError, SoloEngine};
pub use fork::{ForkController, ForkError, ForkInfo, HeaderReader, FORK_INFO_KEY};
pub use ledger::{Ledger, LedgerError, LedgerExt, SnapshotId};
pub use params::{ChainConfig, ChargeConfig, ForkConfig, LATEST_FORK_ID};
pub use types::*;
