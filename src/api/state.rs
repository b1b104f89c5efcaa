use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::book::OrderBookEngine;
use crate::config::{ChainId, Config};
use crate::registry::PendingTransferRegistry;

#[derive(Debug, Clone, Copy)]
pub struct ChainHealth {
    pub height: u64,
    pub updated_at_ms: u64,
}

pub struct AppStateInner {
    pub config: Config,
    pub book: RwLock<OrderBookEngine>,
    pub registry: RwLock<PendingTransferRegistry>,
    pub chain_heights: RwLock<HashMap<ChainId, ChainHealth>>,
}

/// Shared handle to the node's live book, registry, and health state,
/// `Arc<RwLock<..>>`-wrapped so the API can read concurrently with the
/// block processing loop without a second copy of the data.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<AppStateInner>,
}

impl AppState {
    /// Builds the node's single shared state. The block-processing loop
    /// and the Query API both hold this same `Arc`, one `RwLock::write`
    /// per block against the other's reads — never a second copy.
    pub fn new(config: Config) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                config,
                book: RwLock::new(OrderBookEngine::new()),
                registry: RwLock::new(PendingTransferRegistry::new()),
                chain_heights: RwLock::new(HashMap::new()),
            }),
        }
    }
}
