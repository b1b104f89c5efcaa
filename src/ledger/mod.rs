pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Transfer;

/// A block header on one chain — all the Block Interleaver needs to order
/// and trim the two chains' streams against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub timestamp: u64,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Read-only (plus transaction submission) view of one chain. The
/// underlying storage and P2P transport are black boxes this node never
/// redesigns — only this contract.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// The chain's current best-known height (unconfirmed).
    async fn latest_height(&self) -> Result<u64, LedgerError>;

    /// Blocks with `height` in `(after, after + limit]`, capped at
    /// `max_height`. Used by the interleaver to fetch the next safe slice.
    async fn blocks_in_range(&self, after: u64, max_height: u64, limit: u32) -> Result<Vec<Block>, LedgerError>;

    async fn block_at(&self, height: u64) -> Result<Option<Block>, LedgerError>;

    /// Inbound transfers to `wallet` confirmed in the block at `height`.
    async fn inbound_transfers(&self, height: u64, wallet: &str) -> Result<Vec<Transfer>, LedgerError>;

    /// Outbound transfers from `wallet` confirmed in the block at `height`.
    async fn outbound_transfers(&self, height: u64, wallet: &str) -> Result<Vec<Transfer>, LedgerError>;

    /// Post a fully-signed multisig transaction to the network.
    async fn post_transaction(&self, transfer: &Transfer) -> Result<(), LedgerError>;
}
