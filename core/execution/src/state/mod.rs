// meridian/core/execution/src/state/mod.rs

pub mod state_db;

pub use state_db::{StateDB, StateRoot};
