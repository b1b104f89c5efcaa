use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::book::OrderBookEngine;
use crate::config::{ChainConfig, ChainId};
use crate::ledger::{Block, LedgerAdapter, LedgerError};
use crate::snapshot::{OrderBookSnapshot, SnapshotStore};

/// One safely-confirmed block handed to the Pipeline, tagged with whether
/// it is the last block of its chain's batch this tick — `is_last_block`
/// is what triggers the rebroadcast sweep for that chain.
#[derive(Debug, Clone, Copy)]
pub struct BlockEvent {
    pub chain_index: usize,
    pub height: u64,
    pub timestamp: u64,
    pub is_last_block: bool,
}

/// The result of one [`BlockInterleaver::tick`] call.
///
/// `recovered_from_fork` is set on the single tick where both chains are
/// observed progressing again after a stall — `events` is always empty on
/// that tick, since the caller must clear the Pending Transfer Registry and
/// restore the Order Book Engine from the last snapshot before any new
/// block is fetched against the freshly-reset cursors.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub events: Vec<BlockEvent>,
    pub recovered_from_fork: bool,
}

struct ChainTrack {
    id: ChainId,
    adapter: Arc<dyn LedgerAdapter>,
    config: ChainConfig,
    last_processed_height: u64,
    last_processed_timestamp: u64,
    last_fetched_timestamp: u64,
    last_seen_height: u64,
}

/// Merges the two chains' safe block streams into one timestamp-ordered,
/// causally-trimmed sequence and drives fork detection.
pub struct BlockInterleaver {
    chains: Vec<ChainTrack>,
    base_chain_index: usize,
    read_max_blocks: u32,
    read_blocks_interval_ms: u64,
    is_forked: bool,
}

impl BlockInterleaver {
    pub fn new(
        base_chain: ChainId,
        chains: Vec<(ChainId, Arc<dyn LedgerAdapter>, ChainConfig)>,
        read_max_blocks: u32,
        read_blocks_interval_ms: u64,
    ) -> Self {
        let base_chain_index = chains
            .iter()
            .position(|(id, _, _)| *id == base_chain)
            .expect("base chain must be among the configured chains");
        let chains = chains
            .into_iter()
            .map(|(id, adapter, config)| ChainTrack {
                id,
                adapter,
                config,
                last_processed_height: 0,
                last_processed_timestamp: 0,
                last_fetched_timestamp: 0,
                last_seen_height: 0,
            })
            .collect();
        BlockInterleaver { chains, base_chain_index, read_max_blocks, read_blocks_interval_ms, is_forked: false }
    }

    pub fn base_chain_id(&self) -> &ChainId {
        &self.chains[self.base_chain_index].id
    }

    pub fn chain_id(&self, index: usize) -> &ChainId {
        &self.chains[index].id
    }

    pub fn chain_config(&self, index: usize) -> &ChainConfig {
        &self.chains[index].config
    }

    pub fn is_forked(&self) -> bool {
        self.is_forked
    }

    pub fn idle_sleep_ms(&self) -> u64 {
        self.read_blocks_interval_ms
    }

    /// Restores interleaver cursors from a recovered snapshot: reset
    /// `lastProcessedTimestamp` to the snapshot's base-chain block
    /// timestamp and clear the fork flag.
    pub fn recover_from_snapshot(&mut self, snapshot: &OrderBookSnapshot, base_chain_timestamp: u64) {
        for chain in &mut self.chains {
            if let Some(height) = snapshot.chain_heights.get(&chain.id) {
                chain.last_processed_height = *height;
            }
        }
        self.chains[self.base_chain_index].last_processed_timestamp = base_chain_timestamp;
        self.is_forked = false;
    }

    /// Re-checks each chain's latest height against what was last seen.
    /// A chain that fails to strictly progress flips the fork flag; all
    /// chains progressing again clears it. Called once per tick before
    /// fetching new blocks.
    async fn update_fork_state(&mut self) -> Result<(), LedgerError> {
        let mut any_stalled = false;
        for chain in &mut self.chains {
            let latest = chain.adapter.latest_height().await?;
            if latest <= chain.last_seen_height && chain.last_seen_height > 0 {
                any_stalled = true;
            }
            chain.last_seen_height = chain.last_seen_height.max(latest);
        }
        if any_stalled && !self.is_forked {
            warn!("chain stopped progressing, entering fork recovery");
        }
        self.is_forked = any_stalled;
        Ok(())
    }

    /// One interleaver tick: fork check, fetch-merge-trim, return the
    /// ordered batch for the caller to hand to the Pipeline one block at a
    /// time. Empty batch means the caller should sleep `idle_sleep_ms`,
    /// unless `recovered_from_fork` is set (see [`TickOutcome`]).
    pub async fn tick(&mut self) -> Result<TickOutcome, LedgerError> {
        let was_forked = self.is_forked;
        self.update_fork_state().await?;
        if self.is_forked {
            return Ok(TickOutcome::default());
        }
        if was_forked {
            // Both chains just resumed. Surface the transition and skip
            // fetching this tick — the caller resets our cursors via
            // `recover_from_snapshot` before the next tick fetches anything.
            return Ok(TickOutcome { events: Vec::new(), recovered_from_fork: true });
        }

        let mut per_chain_blocks: Vec<Vec<Block>> = Vec::with_capacity(self.chains.len());
        for chain in &mut self.chains {
            let safe_height = chain.last_seen_height.saturating_sub(chain.config.required_confirmations);
            let blocks = chain
                .adapter
                .blocks_in_range(chain.last_processed_height, safe_height, self.read_max_blocks)
                .await?;
            if let Some(last) = blocks.last() {
                chain.last_fetched_timestamp = last.timestamp;
            }
            per_chain_blocks.push(blocks);
        }

        let mut merged: Vec<BlockEvent> = Vec::new();
        for (index, blocks) in per_chain_blocks.iter().enumerate() {
            for block in blocks {
                merged.push(BlockEvent { chain_index: index, height: block.height, timestamp: block.timestamp, is_last_block: false });
            }
        }
        // Timestamp ascending; base chain wins ties (deterministic tie-break).
        merged.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| (a.chain_index != self.base_chain_index).cmp(&(b.chain_index != self.base_chain_index)))
        });

        // Trim so no block's timestamp exceeds the other chain's last-fetched horizon.
        let other_horizon = |chain_index: usize| -> Option<u64> {
            self.chains
                .iter()
                .enumerate()
                .filter(|(i, c)| *i != chain_index && c.last_fetched_timestamp > 0)
                .map(|(_, c)| c.last_fetched_timestamp)
                .min()
        };
        let horizons: Vec<Option<u64>> = (0..self.chains.len()).map(other_horizon).collect();
        merged.retain(|event| horizons[event.chain_index].map_or(true, |h| event.timestamp <= h));

        // Flag the last retained event per chain.
        let mut last_index_per_chain: HashMap<usize, usize> = HashMap::new();
        for (i, event) in merged.iter().enumerate() {
            last_index_per_chain.insert(event.chain_index, i);
        }
        for (chain_index, i) in last_index_per_chain {
            merged[i].is_last_block = true;
            let _ = chain_index;
        }

        Ok(TickOutcome { events: merged, recovered_from_fork: false })
    }

    /// Called by the caller after a block finishes its pipeline phases
    /// without error — advances this chain's cursor.
    pub fn mark_processed(&mut self, chain_index: usize, height: u64, timestamp: u64) {
        let chain = &mut self.chains[chain_index];
        chain.last_processed_height = height;
        chain.last_processed_timestamp = timestamp;
        info!(chain = %chain.id, height, "block processed");
    }

    pub fn last_processed_height(&self, chain_index: usize) -> u64 {
        self.chains[chain_index].last_processed_height
    }
}

/// Loads the latest snapshot (if any) and restores both the order book and
/// the interleaver's per-chain cursors from it — used at startup and after
/// fork recovery.
pub async fn restore_from_snapshot(
    store: &SnapshotStore,
    book: &mut OrderBookEngine,
    interleaver: &mut BlockInterleaver,
    base_chain_adapter: &dyn LedgerAdapter,
) -> anyhow::Result<()> {
    let Some(snapshot) = store.load()? else { return Ok(()) };
    book.set_snapshot(snapshot.order_book.clone());
    let base_height = snapshot.chain_heights.get(interleaver.base_chain_id()).copied().unwrap_or(0);
    let base_chain_timestamp = base_chain_adapter
        .block_at(base_height)
        .await?
        .map(|b| b.timestamp)
        .unwrap_or(0);
    interleaver.recover_from_snapshot(&snapshot, base_chain_timestamp);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::ledger::mock::MockLedgerAdapter;
    use std::collections::HashMap as StdHashMap;

    fn chain_config() -> ChainConfig {
        ChainConfig {
            wallet_address: "w".into(),
            database: "db".into(),
            module_alias: "mock".into(),
            order_height_expiry: 100,
            required_confirmations: 0,
            read_max_blocks: 50,
            min_order_amount: 1,
            exchange_fee_base: 0,
            exchange_fee_rate: 0.0,
            dividend_rate: 0.5,
            dividend_start_height: 0,
            dividend_height_interval: 1000,
            dividend_height_offset: 0,
            rebroadcast_after_height: 1,
            rebroadcast_until_height: 10,
            dex_disabled_from_height: None,
            dex_moved_to_address: None,
            passphrase: crate::config::passphrase::PassphraseConfig::Passphrase { passphrase: "pw".into() },
            shared_passphrase: crate::config::PassphraseConfigAlias::SharedPassphrase { shared_passphrase: "shared".into() },
            multisig_members: vec![],
            required_signature_count: 1,
        }
    }

    fn interleaver_with(a: MockLedgerAdapter, b: MockLedgerAdapter) -> BlockInterleaver {
        BlockInterleaver::new(
            ChainId::new("A"),
            vec![
                (ChainId::new("A"), Arc::new(a) as Arc<dyn LedgerAdapter>, chain_config()),
                (ChainId::new("B"), Arc::new(b) as Arc<dyn LedgerAdapter>, chain_config()),
            ],
            100,
            1000,
        )
    }

    #[tokio::test]
    async fn tick_merges_by_timestamp_with_base_chain_tiebreak() {
        let a = MockLedgerAdapter::new();
        let b = MockLedgerAdapter::new();
        a.push_block(Block { height: 1, timestamp: 100 }).await;
        a.push_block(Block { height: 2, timestamp: 300 }).await;
        b.push_block(Block { height: 1, timestamp: 100 }).await;
        b.push_block(Block { height: 2, timestamp: 200 }).await;
        let mut interleaver = interleaver_with(a, b);

        let outcome = interleaver.tick().await.unwrap();
        let events = outcome.events;
        assert!(!outcome.recovered_from_fork);
        // Same timestamp (100) on both chains: base chain (index 0) wins the tie.
        assert_eq!(events[0].chain_index, 0);
        assert_eq!(events[0].height, 1);
        assert_eq!(events[1].chain_index, 1);
        assert_eq!(events[1].height, 1);
        // B's height 2 (timestamp 200) is within A's fetch horizon (300);
        // A's height 2 (timestamp 300) exceeds B's horizon (200) and is trimmed.
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].chain_index, 1);
        assert_eq!(events[2].height, 2);
    }

    #[tokio::test]
    async fn stalled_chain_flips_the_fork_flag() {
        let a = MockLedgerAdapter::new();
        let b = MockLedgerAdapter::new();
        a.push_block(Block { height: 1, timestamp: 100 }).await;
        let mut interleaver = interleaver_with(a, b);

        interleaver.tick().await.unwrap();
        assert!(!interleaver.is_forked());
        // Neither chain produced a new height this tick: both stall at 0.
        let outcome = interleaver.tick().await.unwrap();
        assert!(outcome.events.is_empty());
        assert!(!outcome.recovered_from_fork);
        assert!(interleaver.is_forked());
    }

    #[tokio::test]
    async fn resuming_both_chains_signals_recovery_before_fetching_again() {
        let a = MockLedgerAdapter::new();
        let b = MockLedgerAdapter::new();
        let a_handle = a.clone();
        let b_handle = b.clone();
        a.push_block(Block { height: 1, timestamp: 100 }).await;
        let mut interleaver = interleaver_with(a, b);

        interleaver.tick().await.unwrap(); // A progresses, B stays at 0.
        let stalled = interleaver.tick().await.unwrap(); // neither advances: fork.
        assert!(stalled.events.is_empty());
        assert!(!stalled.recovered_from_fork);
        assert!(interleaver.is_forked());

        // Both chains advance past their last-seen height: the fork resolves.
        a_handle.push_block(Block { height: 2, timestamp: 200 }).await;
        b_handle.push_block(Block { height: 1, timestamp: 150 }).await;
        let recovered = interleaver.tick().await.unwrap();
        assert!(recovered.recovered_from_fork);
        assert!(recovered.events.is_empty());
        assert!(!interleaver.is_forked());

        // The following tick fetches against the (now caller-reset) cursors.
        let resumed = interleaver.tick().await.unwrap();
        assert!(!resumed.recovered_from_fork);
        assert!(!resumed.events.is_empty());
    }

    #[tokio::test]
    async fn recover_from_snapshot_resets_cursors_and_clears_fork_flag() {
        let a = MockLedgerAdapter::new();
        let b = MockLedgerAdapter::new();
        a.push_block(Block { height: 50, timestamp: 5_000 }).await;
        let mut interleaver = interleaver_with(a, b);

        let mut chain_heights: StdHashMap<ChainId, u64> = StdHashMap::new();
        chain_heights.insert(ChainId::new("A"), 50);
        chain_heights.insert(ChainId::new("B"), 40);
        let snapshot = OrderBookSnapshot {
            order_book: crate::book::BookSnapshot { bid_limit_orders: vec![], ask_limit_orders: vec![] },
            chain_heights,
        };
        interleaver.recover_from_snapshot(&snapshot, 5_000);

        assert_eq!(interleaver.last_processed_height(0), 50);
        assert_eq!(interleaver.last_processed_height(1), 40);
        assert!(!interleaver.is_forked());
    }
}
