// meridian/core/execution/src/vm.rs

// Contract execution capability and cooperative cancellation
use crate::accounts::AccountManager;
use crate::fees::GasDistributionMap;
use crate::types::ExecutionError;
use meridian_consensus::params::ChainConfig;
use meridian_consensus::types::{Action, InternalAction, Name};
use primitive_types::U256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::warn;

/// Cancellation flag polled by the execution capability at safe points
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raises an [`AbortSignal`] once a deadline passes. Dropping the guard
/// cancels the timer and waits for it, so no abort fires after the action
/// has finished.
pub struct OvertimeGuard {
    cancel: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl OvertimeGuard {
    pub fn arm(signal: AbortSignal, timeout: Duration) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                warn!(timeout_ms = timeout.as_millis() as u64, "Action execution over time, aborting");
                signal.abort();
            }
        });
        Self {
            cancel: Some(cancel),
            handle: Some(handle),
        }
    }
}

impl Drop for OvertimeGuard {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the timer thread immediately
        self.cancel.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Environment of one action
#[derive(Debug, Clone)]
pub struct VmContext<'a> {
    pub config: &'a ChainConfig,
    pub fork_id: u64,
    pub number: u64,
    pub coinbase: Name,
    pub gas_price: U256,
    /// Asset used to pay for gas
    pub fee_asset_id: u64,
    pub abort: AbortSignal,
}

/// Out-parameters the engine reads after each call
#[derive(Debug, Clone, Default)]
pub struct ExecutionFrame {
    pub internal_actions: Vec<InternalAction>,
    /// Founder shares accumulated by nested calls
    pub founder_gas: GasDistributionMap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmOutcome {
    pub output: Vec<u8>,
    pub gas_left: u64,
    pub error: Option<ExecutionError>,
}

impl VmOutcome {
    pub fn failed(gas_left: u64, error: ExecutionError) -> Self {
        Self {
            output: Vec::new(),
            gas_left,
            error: Some(error),
        }
    }
}

/// Contract execution capability
pub trait VirtualMachine: Send + Sync {
    fn create(
        &self,
        ctx: &VmContext<'_>,
        accounts: &mut AccountManager<'_>,
        frame: &mut ExecutionFrame,
        action: &Action,
        gas: u64,
    ) -> VmOutcome;

    fn call(
        &self,
        ctx: &VmContext<'_>,
        accounts: &mut AccountManager<'_>,
        frame: &mut ExecutionFrame,
        action: &Action,
        gas: u64,
    ) -> VmOutcome;

    /// Ask `contract` whether `sender` may move its bound asset. Returns the
    /// gas left and the decision.
    #[allow(clippy::too_many_arguments)]
    fn can_transfer_contract_asset(
        &self,
        ctx: &VmContext<'_>,
        accounts: &mut AccountManager<'_>,
        frame: &mut ExecutionFrame,
        sender: &Name,
        gas: u64,
        asset_id: u64,
        contract: &Name,
    ) -> (u64, bool);
}

/// Execution capability for chains without contracts
#[derive(Debug, Clone, Copy, Default)]
pub struct NullVm;

impl VirtualMachine for NullVm {
    fn create(
        &self,
        _ctx: &VmContext<'_>,
        _accounts: &mut AccountManager<'_>,
        _frame: &mut ExecutionFrame,
        _action: &Action,
        gas: u64,
    ) -> VmOutcome {
        VmOutcome::failed(gas, ExecutionError::ContractUnsupported)
    }

    fn call(
        &self,
        _ctx: &VmContext<'_>,
        _accounts: &mut AccountManager<'_>,
        _frame: &mut ExecutionFrame,
        _action: &Action,
        gas: u64,
    ) -> VmOutcome {
        VmOutcome::failed(gas, ExecutionError::ContractUnsupported)
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
