use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::ChainId;
use crate::signature::{PublicKeyBytes, SignatureBytes, SignedTransaction, TxId};

/// One outgoing multisig transaction awaiting quorum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub id: TxId,
    pub transaction: SignedTransaction,
    pub target_chain: ChainId,
    pub processed_signatures: HashSet<SignatureBytes>,
    pub contributors: HashSet<String>,
    pub public_key: PublicKeyBytes,
    pub creation_height: u64,
    pub inserted_at: u64,
    pub is_ready: bool,
}

/// Insertion-ordered registry of pending outgoing transactions.
///
/// Insertion order is preserved and doubles as the expiry scan order:
/// `expire` only ever removes a prefix, which is correct because
/// insertion order tracks `insertedAt` order.
#[derive(Default)]
pub struct PendingTransferRegistry {
    entries: IndexMap<TxId, PendingTransfer>,
}

impl PendingTransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry`, removing any prior entry with the same id first —
    /// re-authoring collapses to the latest entry.
    pub fn put(&mut self, entry: PendingTransfer) {
        self.entries.shift_remove(&entry.id);
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn get(&self, id: &TxId) -> Option<&PendingTransfer> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &TxId) -> Option<&mut PendingTransfer> {
        self.entries.get_mut(id)
    }

    pub fn remove(&mut self, id: &TxId) -> Option<PendingTransfer> {
        self.entries.shift_remove(id)
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn values(&self) -> impl Iterator<Item = &PendingTransfer> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes entries from the head while `now_ms - insertedAt >= multisig_expiry`,
    /// stopping at the first entry younger than the threshold.
    pub fn expire(&mut self, now_ms: u64, multisig_expiry: u64) -> Vec<PendingTransfer> {
        let mut expired = Vec::new();
        while let Some((_, entry)) = self.entries.first() {
            if now_ms.saturating_sub(entry.inserted_at) >= multisig_expiry {
                let (_, entry) = self.entries.shift_remove_index(0).expect("checked non-empty above");
                expired.push(entry);
            } else {
                break;
            }
        }
        expired
    }

    /// Fork-recovery clear — wipes the registry entirely.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
