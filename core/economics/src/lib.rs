// meridian/core/economics/src/lib.rs

pub mod fee_manager;

pub use fee_manager::{FeeRecord, SystemFeeManager, Withdrawal};
