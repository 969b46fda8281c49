// meridian/core/consensus/src/ledger.rs

// Key-value state capability shared by the fork controller, the account model
// and the consensus engine
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Journal position returned by [`Ledger::snapshot`]
pub type SnapshotId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger read failed for {owner}/{key}: {reason}")]
    Read {
        owner: String,
        key: String,
        reason: String,
    },

    #[error("corrupt record {owner}/{key}: {reason}")]
    Decode {
        owner: String,
        key: String,
        reason: String,
    },

    #[error("failed to encode record {owner}/{key}: {reason}")]
    Encode {
        owner: String,
        key: String,
        reason: String,
    },
}

/// Per-owner key-value store with point-in-time rollback
pub trait Ledger {
    fn get(&self, owner: &str, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;

    fn put(&mut self, owner: &str, key: &str, value: Vec<u8>);

    fn delete(&mut self, owner: &str, key: &str);

    fn snapshot(&mut self) -> SnapshotId;

    fn revert_to_snapshot(&mut self, id: SnapshotId);
}

/// Typed access to bincode records stored in a [`Ledger`]
pub trait LedgerExt: Ledger {
    fn get_record<T: DeserializeOwned>(
        &self,
        owner: &str,
        key: &str,
    ) -> Result<Option<T>, LedgerError> {
        match self.get(owner, key)? {
            Some(bytes) if !bytes.is_empty() => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| LedgerError::Decode {
                    owner: owner.to_string(),
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            _ => Ok(None),
        }
    }

    fn put_record<T: Serialize>(
        &mut self,
        owner: &str,
        key: &str,
        record: &T,
    ) -> Result<(), LedgerError> {
        let bytes = bincode::serialize(record).map_err(|e| LedgerError::Encode {
            owner: owner.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.put(owner, key, bytes);
        Ok(())
    }
}

impl<L: Ledger + ?Sized> LedgerExt for L {}
