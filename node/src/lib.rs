pub mod chain;
pub mod config;
pub mod devnet;
pub mod genesis;
pub mod logging;

pub use chain::{Chain, ChainError};
pub use config::NodeConfig;
