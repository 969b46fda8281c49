// meridian/core/consensus/src/metrics.rs

// Metrics for fork voting
use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

pub static FORK_PROMOTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "meridian_fork_promotions_total",
        "Number of fork id promotions"
    )
    .expect("register meridian_fork_promotions_total")
});

pub static FORK_CURRENT_ID: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("meridian_fork_current_id", "Current fork id")
        .expect("register meridian_fork_current_id")
});
