// meridian/core/execution/src/metrics.rs

// Metrics for tracking applied actions and recorded fees
use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram, CounterVec, Histogram};

pub static ACTIONS_APPLIED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "meridian_actions_applied_total",
        "Number of actions applied",
        &["kind", "status"]
    )
    .expect("register meridian_actions_applied_total")
});

pub static ACTION_GAS_USED: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!("meridian_action_gas_used", "Gas used per action")
        .expect("register meridian_action_gas_used")
});

pub static SIGNATURE_CHECKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "meridian_signature_checks_total",
        "Signature checks by outcome of the author version cache",
        &["result"]
    )
    .expect("register meridian_signature_checks_total")
});

pub static FEE_RECORDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "meridian_fee_records_total",
        "Fee records written",
        &["category"]
    )
    .expect("register meridian_fee_records_total")
});
