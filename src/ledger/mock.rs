use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::model::Transfer;

use super::{Block, LedgerAdapter, LedgerError};

/// An in-memory ledger used by unit tests and `tests/scenarios.rs`.
///
/// Blocks and transfers are staged ahead of time with [`MockLedgerAdapter::push_block`];
/// `post_transaction` just records what was posted for assertions instead of
/// broadcasting anywhere.
#[derive(Clone, Default)]
pub struct MockLedgerAdapter {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    blocks: Vec<Block>,
    inbound: HashMap<u64, Vec<Transfer>>,
    outbound: HashMap<u64, Vec<Transfer>>,
    posted: Vec<Transfer>,
}

impl MockLedgerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_block(&self, block: Block) {
        self.inner.lock().await.blocks.push(block);
    }

    pub async fn push_inbound(&self, height: u64, transfer: Transfer) {
        self.inner.lock().await.inbound.entry(height).or_default().push(transfer);
    }

    pub async fn push_outbound(&self, height: u64, transfer: Transfer) {
        self.inner.lock().await.outbound.entry(height).or_default().push(transfer);
    }

    pub async fn posted(&self) -> Vec<Transfer> {
        self.inner.lock().await.posted.clone()
    }
}

#[async_trait]
impl LedgerAdapter for MockLedgerAdapter {
    async fn latest_height(&self) -> Result<u64, LedgerError> {
        Ok(self.inner.lock().await.blocks.iter().map(|b| b.height).max().unwrap_or(0))
    }

    async fn blocks_in_range(&self, after: u64, max_height: u64, limit: u32) -> Result<Vec<Block>, LedgerError> {
        let inner = self.inner.lock().await;
        let mut blocks: Vec<Block> = inner
            .blocks
            .iter()
            .copied()
            .filter(|b| b.height > after && b.height <= max_height)
            .collect();
        blocks.sort_by_key(|b| b.height);
        blocks.truncate(limit as usize);
        Ok(blocks)
    }

    async fn block_at(&self, height: u64) -> Result<Option<Block>, LedgerError> {
        Ok(self.inner.lock().await.blocks.iter().find(|b| b.height == height).copied())
    }

    async fn inbound_transfers(&self, height: u64, wallet: &str) -> Result<Vec<Transfer>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .inbound
            .get(&height)
            .map(|v| v.iter().filter(|t| t.recipient == wallet).cloned().collect())
            .unwrap_or_default())
    }

    async fn outbound_transfers(&self, height: u64, wallet: &str) -> Result<Vec<Transfer>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .outbound
            .get(&height)
            .map(|v| v.iter().filter(|t| t.sender == wallet).cloned().collect())
            .unwrap_or_default())
    }

    async fn post_transaction(&self, transfer: &Transfer) -> Result<(), LedgerError> {
        self.inner.lock().await.posted.push(transfer.clone());
        Ok(())
    }
}
