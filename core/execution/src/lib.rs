// meridian/core/execution/src/lib.rs

pub mod accounts;
pub mod fees;
pub mod gas;
pub mod metrics;
pub mod processor;
pub mod receipt;
pub mod state;
pub mod transition;
pub mod types;
pub mod vm;

pub use accounts::{AccountContext, AccountManager};
pub use fees::{DistributeGas, DistributeKey, FeeCategory, FeeError, FeeRecorder, GasDistributionMap};
pub use gas::GasTable;
pub use processor::{apply_transaction, BlockOutcome, BlockProcessor, ExecutionLimits};
pub use receipt::{ActionResult, DetailAction, DetailTx, GasAllotment, Receipt, ReceiptStatus};
pub use state::{StateDB, StateRoot};
pub use transition::{
    needs_signature_check, StateTransition, TransitionEnv, TransitionError, TransitionOutcome,
};
pub use types::{
    Account, AccountError, ActionFailure, AssetInfo, Author, AuthorOwner, ExecutionError,
};
pub use vm::{AbortSignal, ExecutionFrame, NullVm, OvertimeGuard, VirtualMachine, VmContext, VmOutcome};
