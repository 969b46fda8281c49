// meridian/core/execution/src/gas.rs

// Intrinsic gas charged before an action executes
use crate::types::ExecutionError;
use meridian_consensus::types::{Action, ActionKind};
use serde::{Deserialize, Serialize};

/// Gas costs charged before execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasTable {
    /// Base cost of any action
    pub action: u64,
    /// Base cost of a contract creation
    pub action_create: u64,
    /// Per zero byte of payload and remark
    pub data_zero: u64,
    /// Per non-zero byte of payload and remark
    pub data_non_zero: u64,
    /// Per signature beyond the first, sender and payer combined
    pub extra_signature: u64,
}

impl Default for GasTable {
    fn default() -> Self {
        Self {
            action: 100_000,
            action_create: 500_000,
            data_zero: 4,
            data_non_zero: 68,
            extra_signature: 3_000,
        }
    }
}

impl GasTable {
    /// Gas deducted from an action before dispatch
    pub fn intrinsic_gas(&self, action: &Action) -> Result<u64, ExecutionError> {
        let base = match action.kind {
            ActionKind::CreateContract => self.action_create,
            _ => self.action,
        };

        let (zeros, non_zeros) = action
            .payload
            .iter()
            .chain(action.remark.iter())
            .fold((0u64, 0u64), |(z, nz), b| {
                if *b == 0 {
                    (z + 1, nz)
                } else {
                    (z, nz + 1)
                }
            });

        let signatures = action.signatures.len()
            + action.payer.as_ref().map(|p| p.signatures.len()).unwrap_or(0);
        let extra_signatures = signatures.saturating_sub(1) as u64;

        [
            zeros.checked_mul(self.data_zero),
            non_zeros.checked_mul(self.data_non_zero),
            extra_signatures.checked_mul(self.extra_signature),
        ]
        .into_iter()
        .try_fold(base, |acc, part| acc.checked_add(part?))
        .ok_or(ExecutionError::GasOverflow)
    }
}
