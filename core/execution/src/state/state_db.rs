// meridian/core/execution/src/state/state_db.rs

// In-memory ledger with an undo journal
use meridian_consensus::ledger::{Ledger, LedgerError, SnapshotId};
use meridian_consensus::types::Hash;
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;
use tracing::debug;

/// State root hash
pub type StateRoot = Hash;

type EntryKey = (String, String);

/// Undo record: the previous value of an entry (None if it was absent)
#[derive(Debug, Clone)]
struct JournalEntry {
    key: EntryKey,
    prev: Option<Vec<u8>>,
}

/// State database for one block.
///
/// Cloning yields an independent copy, so candidate blocks never share
/// mutable state.
#[derive(Debug, Clone, Default)]
pub struct StateDB {
    entries: BTreeMap<EntryKey, Vec<u8>>,
    journal: Vec<JournalEntry>,
}

impl StateDB {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, key: EntryKey, prev: Option<Vec<u8>>) {
        self.journal.push(JournalEntry { key, prev });
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of journaled writes since the last commit
    pub fn pending_changes(&self) -> usize {
        self.journal.len()
    }

    /// Current state root without committing
    pub fn root(&self) -> StateRoot {
        let mut hasher = Keccak256::new();
        for ((owner, key), value) in &self.entries {
            for part in [owner.as_bytes(), key.as_bytes(), value.as_slice()] {
                hasher.update((part.len() as u64).to_le_bytes());
                hasher.update(part);
            }
        }
        Hash::new(hasher.finalize().into())
    }

    /// Seal the pending changes and return the state root
    pub fn commit(&mut self) -> StateRoot {
        let root = self.root();
        let changes = self.journal.len();
        self.journal.clear();
        debug!(root = %root, changes, "State committed");
        root
    }
}

impl Ledger for StateDB {
    fn get(&self, owner: &str, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(self
            .entries
            .get(&(owner.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&mut self, owner: &str, key: &str, value: Vec<u8>) {
        let key = (owner.to_string(), key.to_string());
        let prev = self.entries.insert(key.clone(), value);
        self.record(key, prev);
    }

    fn delete(&mut self, owner: &str, key: &str) {
        let key = (owner.to_string(), key.to_string());
        if let Some(prev) = self.entries.remove(&key) {
            self.record(key, Some(prev));
        }
    }

    fn snapshot(&mut self) -> SnapshotId {
        self.journal.len()
    }

    fn revert_to_snapshot(&mut self, id: SnapshotId) {
        while self.journal.len() > id {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            match entry.prev {
                Some(prev) => {
                    self.entries.insert(entry.key, prev);
                }
                None => {
                    self.entries.remove(&entry.key);
                }
            }
        }
        debug!(snapshot = id, "State reverted to snapshot");
    }
}
