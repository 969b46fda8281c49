// meridian/core/consensus/src/fork.rs

// Hard-fork controller
// Tracks which consensus-rule version the network runs, promoting the next
// version once enough of the most recent blocks vote for it.
use crate::ledger::{Ledger, LedgerError};
use crate::metrics::{FORK_CURRENT_ID, FORK_PROMOTIONS_TOTAL};
use crate::params::{ForkConfig, LATEST_FORK_ID};
use crate::types::{BlockHeader, Name};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Ledger key of the fork record, stored under the chain name
pub const FORK_INFO_KEY: &str = "forkInfo";

#[derive(Debug, Error)]
pub enum ForkError {
    #[error("fork id {requested} not supported, latest supported fork id is {latest}")]
    UnsupportedForkId { requested: u64, latest: u64 },

    #[error("fork info not initialized for chain {0}")]
    NotInitialized(Name),

    #[error("invalid fork config: {0}")]
    InvalidConfig(String),

    #[error("fork info codec: {0}")]
    Codec(String),

    #[error("header {0} inside the fork window is missing")]
    MissingHeader(u64),

    #[error(
        "invalid header fork ids at block {number}: cur {header_cur}, next {header_next}, \
         actual cur {actual}"
    )]
    InvalidHeader {
        number: u64,
        header_cur: u64,
        header_next: u64,
        actual: u64,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Fork voting record persisted per chain.
///
/// The encoding is consensus critical: four fixed-width little-endian
/// integers in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ForkInfo {
    pub cur_fork_id: u64,
    pub next_fork_id: u64,
    pub cur_fork_id_block_num: u64,
    pub next_fork_id_block_num: u64,
}

impl ForkInfo {
    pub const ENCODED_LEN: usize = 32;

    pub fn encode(&self) -> Result<Vec<u8>, ForkError> {
        bincode::serialize(self).map_err(|e| ForkError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ForkError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(ForkError::Codec(format!(
                "expected {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            )));
        }
        bincode::deserialize(bytes).map_err(|e| ForkError::Codec(e.to_string()))
    }

    /// Drop the vote of the block leaving the window
    fn evict(&mut self, evicted_voted_next: bool) {
        if evicted_voted_next && self.next_fork_id_block_num > 0 {
            self.next_fork_id_block_num -= 1;
        } else if self.cur_fork_id_block_num > 0 {
            self.cur_fork_id_block_num -= 1;
        } else {
            self.next_fork_id_block_num = self.next_fork_id_block_num.saturating_sub(1);
        }
    }
}

/// Access to canonical headers by number
pub trait HeaderReader {
    fn header_by_number(&self, number: u64) -> Option<BlockHeader>;
}

/// Controls hard forking for one chain
#[derive(Debug, Clone)]
pub struct ForkController {
    config: ForkConfig,
    chain_name: Name,
}

impl ForkController {
    pub fn new(config: ForkConfig, chain_name: Name) -> Result<Self, ForkError> {
        if config.window == 0 {
            return Err(ForkError::InvalidConfig("window must be positive".into()));
        }
        if config.percentage == 0 || config.percentage > 100 {
            return Err(ForkError::InvalidConfig(format!(
                "percentage {} outside 1..=100",
                config.percentage
            )));
        }
        Ok(Self { config, chain_name })
    }

    pub fn config(&self) -> &ForkConfig {
        &self.config
    }

    /// Write the initial fork record unless one already exists
    pub fn init(&self, ledger: &mut dyn Ledger, cur_fork_id: u64) -> Result<(), ForkError> {
        if cur_fork_id > LATEST_FORK_ID {
            return Err(ForkError::UnsupportedForkId {
                requested: cur_fork_id,
                latest: LATEST_FORK_ID,
            });
        }

        let existing = ledger.get(self.chain_name.as_str(), FORK_INFO_KEY)?;
        if existing.map(|b| b.is_empty()).unwrap_or(true) {
            let info = ForkInfo {
                cur_fork_id,
                next_fork_id: cur_fork_id,
                ..Default::default()
            };
            self.put_fork_info(&info, ledger)?;
            info!(chain = %self.chain_name, cur_fork_id, "Initialized fork controller");
        }
        Ok(())
    }

    pub fn fork_info(&self, ledger: &dyn Ledger) -> Result<ForkInfo, ForkError> {
        match ledger.get(self.chain_name.as_str(), FORK_INFO_KEY)? {
            Some(bytes) if !bytes.is_empty() => ForkInfo::decode(&bytes),
            _ => Err(ForkError::NotInitialized(self.chain_name.clone())),
        }
    }

    fn put_fork_info(&self, info: &ForkInfo, ledger: &mut dyn Ledger) -> Result<(), ForkError> {
        ledger.put(self.chain_name.as_str(), FORK_INFO_KEY, info.encode()?);
        Ok(())
    }

    /// Count the vote of an accepted block and promote the next fork id when
    /// it holds the configured share of the window.
    pub fn update(
        &self,
        header: &BlockHeader,
        ledger: &mut dyn Ledger,
        headers: &dyn HeaderReader,
    ) -> Result<ForkInfo, ForkError> {
        let mut info = self.fork_info(ledger)?;
        let window = self.config.window;

        // Blocks on an older version count as votes for the current one
        let votes_next =
            header.cur_fork_id != header.next_fork_id && info.next_fork_id <= header.next_fork_id;

        if votes_next {
            if info.next_fork_id < header.next_fork_id {
                info.next_fork_id = header.next_fork_id;
                info.next_fork_id_block_num = 0;
            }
            info.next_fork_id_block_num += 1;
        } else {
            info.cur_fork_id_block_num += 1;
        }

        if info.cur_fork_id_block_num + info.next_fork_id_block_num >= window {
            let evicted_number = (header.number + 1)
                .checked_sub(window)
                .ok_or(ForkError::MissingHeader(0))?;
            let evicted = headers
                .header_by_number(evicted_number)
                .ok_or(ForkError::MissingHeader(evicted_number))?;
            info.evict(evicted.next_fork_id == info.next_fork_id);
        }

        if info.next_fork_id_block_num * 100 / window >= self.config.percentage {
            info!(
                from = info.cur_fork_id,
                to = info.next_fork_id,
                block = header.number,
                "Promoting fork id"
            );
            info.cur_fork_id = info.next_fork_id;
            info.cur_fork_id_block_num = info.next_fork_id_block_num;
            info.next_fork_id_block_num = 0;
            FORK_PROMOTIONS_TOTAL.inc();
        }

        FORK_CURRENT_ID.set(info.cur_fork_id as i64);
        debug!(
            block = header.number,
            cur = info.cur_fork_id,
            next = info.next_fork_id,
            cur_votes = info.cur_fork_id_block_num,
            next_votes = info.next_fork_id_block_num,
            "Fork votes updated"
        );

        self.put_fork_info(&info, ledger)?;
        Ok(info)
    }

    /// Current fork id and the latest fork id this binary supports
    pub fn current_fork_id(&self, ledger: &dyn Ledger) -> Result<(u64, u64), ForkError> {
        let info = self.fork_info(ledger)?;
        Ok((info.cur_fork_id, LATEST_FORK_ID))
    }

    /// A header must run the tracked current fork id and never propose a
    /// regression below it.
    pub fn check_fork_id(&self, header: &BlockHeader, ledger: &dyn Ledger) -> Result<(), ForkError> {
        let (cur_fork_id, _) = self.current_fork_id(ledger)?;
        if header.cur_fork_id != cur_fork_id || header.next_fork_id < cur_fork_id {
            return Err(ForkError::InvalidHeader {
                number: header.number,
                header_cur: header.cur_fork_id,
                header_next: header.next_fork_id,
                actual: cur_fork_id,
            });
        }
        Ok(())
    }

    /// Stamp a header under construction with the current and latest fork ids
    pub fn fill_fork_id(&self, header: &mut BlockHeader, ledger: &dyn Ledger) -> Result<(), ForkError> {
        let (cur_fork_id, next_fork_id) = self.current_fork_id(ledger)?;
        header.with_fork_id(cur_fork_id, next_fork_id);
        Ok(())
    }
}
