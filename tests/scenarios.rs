//! End-to-end scenarios driving `pipeline::process_block` directly against
//! an in-memory ledger, covering the cross-chain match, refund, expiry, and
//! snapshot-disable behaviors a full node exhibits over several blocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ed25519_dalek::SigningKey;

use dex_coordinator::book::{BookSnapshot, OrderBookEngine};
use dex_coordinator::clock::Clock;
use dex_coordinator::config::passphrase::PassphraseConfig;
use dex_coordinator::config::{ChainConfig, ChainId, Config, MultisigMemberConfig, PassphraseConfigAlias};
use dex_coordinator::dividend::DividendQueue;
use dex_coordinator::ledger::mock::MockLedgerAdapter;
use dex_coordinator::ledger::{Block, LedgerAdapter};
use dex_coordinator::model::order::{NewOrder, Side};
use dex_coordinator::model::price::Price;
use dex_coordinator::model::transfer::Transfer;
use dex_coordinator::network::NullPeerNetwork;
use dex_coordinator::pipeline::{self, PipelineChains, PipelineContext};
use dex_coordinator::registry::PendingTransferRegistry;
use dex_coordinator::scheduler::Scheduler;
use dex_coordinator::signature::SignatureCoordinator;
use dex_coordinator::snapshot::{OrderBookSnapshot, SnapshotStore};

struct FixedClock(AtomicU64);

impl FixedClock {
    fn new(ms: u64) -> Self {
        FixedClock(AtomicU64::new(ms))
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn chain_config(
    wallet: &str,
    order_height_expiry: u64,
    min_order_amount: u64,
    exchange_fee_rate: f64,
    dex_disabled_from_height: Option<u64>,
) -> ChainConfig {
    ChainConfig {
        wallet_address: wallet.into(),
        database: format!("db-{wallet}"),
        module_alias: "mock".into(),
        order_height_expiry,
        required_confirmations: 1,
        read_max_blocks: 50,
        min_order_amount,
        exchange_fee_base: 0,
        exchange_fee_rate,
        dividend_rate: 0.5,
        dividend_start_height: 0,
        dividend_height_interval: 1000,
        dividend_height_offset: 0,
        rebroadcast_after_height: 1_000_000,
        rebroadcast_until_height: 1_000_001,
        dex_disabled_from_height,
        dex_moved_to_address: None,
        passphrase: PassphraseConfig::Passphrase { passphrase: format!("pw-{wallet}") },
        shared_passphrase: PassphraseConfigAlias::SharedPassphrase { shared_passphrase: format!("shared-{wallet}") },
        multisig_members: vec![MultisigMemberConfig { public_key_hex: "aa".into(), address: format!("member-{wallet}") }],
        required_signature_count: 1,
    }
}

fn sample_config(min_order_amount: u64, exchange_fee_rate: f64, order_height_expiry: u64, dex_disabled_from_height: Option<u64>) -> Config {
    let mut chains = HashMap::new();
    chains.insert(ChainId::new("A"), chain_config("walletA", order_height_expiry, min_order_amount, exchange_fee_rate, dex_disabled_from_height));
    chains.insert(ChainId::new("B"), chain_config("walletB", order_height_expiry, min_order_amount, exchange_fee_rate, None));
    Config {
        chains,
        base_chain: ChainId::new("A"),
        passive_mode: false,
        multisig_expiry: 600_000,
        multisig_expiry_check_interval: 60_000,
        signature_broadcast_delay: 15_000,
        transaction_submit_delay: 5_000,
        read_blocks_interval: 1_000,
        read_max_blocks: 100,
        order_book_snapshot_finality: 100,
        order_book_snapshot_file_path: std::env::temp_dir().join(format!("dex-coordinator-scenarios-{}.json", std::process::id())),
        order_book_snapshot_backup_dir_path: std::env::temp_dir().join(format!("dex-coordinator-scenarios-backups-{}", std::process::id())),
        order_book_snapshot_backup_max_count: 10,
        api_default_page_limit: 20,
        api_max_page_limit: 100,
        api_max_filter_fields: 5,
    }
}

fn signer() -> SignatureCoordinator {
    let seed = [7u8; 32];
    let signing_key = SigningKey::from_bytes(&seed);
    SignatureCoordinator::new(signing_key, "own-member".into(), HashMap::new())
}

fn transfer(id: &str, source_chain: &str, sender: &str, recipient: &str, amount: u64, memo: &str, height: u64, timestamp: u64) -> Transfer {
    Transfer {
        id: id.into(),
        source_chain: ChainId::new(source_chain),
        sender: sender.into(),
        recipient: recipient.into(),
        amount,
        memo: memo.into(),
        height,
        timestamp,
        signatures: vec![],
    }
}

fn find_memo<'a>(registry: &'a PendingTransferRegistry, prefix: &str) -> &'a Transfer {
    registry
        .values()
        .map(|entry| &entry.transaction.transfer)
        .find(|t| t.memo.starts_with(prefix))
        .unwrap_or_else(|| panic!("no registered transfer with memo prefix {prefix}"))
}

#[tokio::test]
async fn basic_match_produces_t1_and_t2_payouts() {
    let config = sample_config(1, 0.0, 100, None);
    let mock_a = MockLedgerAdapter::new();
    let mock_b = MockLedgerAdapter::new();
    mock_b.push_inbound(1, transfer("ask1", "B", "senderB", "walletB", 100, "A,limit,2,wA", 1, 1000)).await;
    mock_a.push_inbound(1, transfer("bid1", "A", "senderA", "walletA", 200, "B,limit,2,wB", 1, 2000)).await;

    let chains = PipelineChains {
        ids: vec![ChainId::new("A"), ChainId::new("B")],
        configs: vec![config.chain(&ChainId::new("A")).clone(), config.chain(&ChainId::new("B")).clone()],
        adapters: vec![Arc::new(mock_a) as Arc<dyn LedgerAdapter>, Arc::new(mock_b) as Arc<dyn LedgerAdapter>],
        base_index: 0,
    };

    let mut book = OrderBookEngine::new();
    let mut registry = PendingTransferRegistry::new();
    let signer = signer();
    let network = NullPeerNetwork;
    let mut scheduler = Scheduler::new();
    let mut dividend_queue = DividendQueue::new(64);
    let store = SnapshotStore::new(config.order_book_snapshot_file_path.clone(), config.order_book_snapshot_backup_dir_path.clone(), 10);
    let clock = FixedClock::new(0);
    let mut last_snapshot: Option<OrderBookSnapshot> = None;

    let latest_heights: HashMap<ChainId, u64> = HashMap::from([(ChainId::new("A"), 1), (ChainId::new("B"), 1)]);

    {
        let mut ctx = PipelineContext {
            config: &config,
            book: &mut book,
            registry: &mut registry,
            signer: &signer,
            network: &network,
            scheduler: &mut scheduler,
            dividend_queue: &mut dividend_queue,
            snapshot_store: &store,
            clock: &clock,
            last_snapshot: &mut last_snapshot,
        };
        // ask1 rests first: it must be visible in the book before bid1 arrives.
        pipeline::process_block(&mut ctx, &chains, 1, 1, 1000, true, &latest_heights).await.unwrap();
        pipeline::process_block(&mut ctx, &chains, 0, 1, 2000, true, &latest_heights).await.unwrap();
    }

    assert_eq!(book.get_order_iterator().count(), 0);

    let t1 = find_memo(&registry, "t1,A,bid1");
    assert_eq!(t1.recipient, "wB");
    assert_eq!(t1.amount, 100);
    assert_eq!(t1.source_chain, ChainId::new("B"));

    let t2 = find_memo(&registry, "t2,B,ask1,bid1");
    assert_eq!(t2.recipient, "wA");
    assert_eq!(t2.amount, 200);
    assert_eq!(t2.source_chain, ChainId::new("A"));
}

#[tokio::test]
async fn partial_market_order_refunds_the_residual() {
    let config = sample_config(1, 0.0, 100, None);
    let mock_a = MockLedgerAdapter::new();
    let mock_b = MockLedgerAdapter::new();
    mock_b.push_inbound(1, transfer("ask1", "B", "senderB", "walletB", 100, "A,limit,2,wA", 1, 1000)).await;
    mock_a.push_inbound(2, transfer("mkt1", "A", "senderA", "walletA", 300, "B,market,wB", 2, 2000)).await;

    let chains = PipelineChains {
        ids: vec![ChainId::new("A"), ChainId::new("B")],
        configs: vec![config.chain(&ChainId::new("A")).clone(), config.chain(&ChainId::new("B")).clone()],
        adapters: vec![Arc::new(mock_a) as Arc<dyn LedgerAdapter>, Arc::new(mock_b) as Arc<dyn LedgerAdapter>],
        base_index: 0,
    };

    let mut book = OrderBookEngine::new();
    let mut registry = PendingTransferRegistry::new();
    let signer = signer();
    let network = NullPeerNetwork;
    let mut scheduler = Scheduler::new();
    let mut dividend_queue = DividendQueue::new(64);
    let store = SnapshotStore::new(config.order_book_snapshot_file_path.clone(), config.order_book_snapshot_backup_dir_path.clone(), 10);
    let clock = FixedClock::new(0);
    let mut last_snapshot: Option<OrderBookSnapshot> = None;
    let latest_heights: HashMap<ChainId, u64> = HashMap::from([(ChainId::new("A"), 2), (ChainId::new("B"), 1)]);

    let mut ctx = PipelineContext {
        config: &config,
        book: &mut book,
        registry: &mut registry,
        signer: &signer,
        network: &network,
        scheduler: &mut scheduler,
        dividend_queue: &mut dividend_queue,
        snapshot_store: &store,
        clock: &clock,
        last_snapshot: &mut last_snapshot,
    };
    pipeline::process_block(&mut ctx, &chains, 1, 1, 1000, true, &latest_heights).await.unwrap();
    pipeline::process_block(&mut ctx, &chains, 0, 2, 2000, true, &latest_heights).await.unwrap();
    drop(ctx);

    let t1 = find_memo(&registry, "t1,A,mkt1");
    assert_eq!(t1.recipient, "wB");
    assert_eq!(t1.amount, 100);

    let t2 = find_memo(&registry, "t2,B,ask1,mkt1");
    assert_eq!(t2.recipient, "wA");
    assert_eq!(t2.amount, 200);

    let refund = find_memo(&registry, "r4,mkt1");
    assert_eq!(refund.recipient, "senderA");
    assert_eq!(refund.amount, 100);
    assert_eq!(refund.source_chain, ChainId::new("A"));
}

fn resting_bid(order_id: &str, expiry_height: u64) -> NewOrder {
    NewOrder {
        id: dex_coordinator::model::order::OrderId::new(ChainId::new("A"), order_id),
        side: Side::Bid,
        source_chain: ChainId::new("A"),
        source_wallet_address: "senderA".into(),
        target_chain: ChainId::new("B"),
        target_wallet_address: "wB".into(),
        height: 5,
        expiry_height,
        timestamp: 500,
        price: Some(Price::from_f64(2.0).unwrap()),
        amount: 50,
    }
}

#[tokio::test]
async fn expiry_at_the_expiry_height_uses_the_current_block_timestamp() {
    let config = sample_config(1, 0.0, 10, None);
    let mock_a = MockLedgerAdapter::new();
    let mock_b = MockLedgerAdapter::new();

    let chains = PipelineChains {
        ids: vec![ChainId::new("A"), ChainId::new("B")],
        configs: vec![config.chain(&ChainId::new("A")).clone(), config.chain(&ChainId::new("B")).clone()],
        adapters: vec![Arc::new(mock_a) as Arc<dyn LedgerAdapter>, Arc::new(mock_b) as Arc<dyn LedgerAdapter>],
        base_index: 0,
    };

    let mut book = OrderBookEngine::new();
    book.add_order(resting_bid("bid1", 15));
    let mut registry = PendingTransferRegistry::new();
    let signer = signer();
    let network = NullPeerNetwork;
    let mut scheduler = Scheduler::new();
    let mut dividend_queue = DividendQueue::new(64);
    let store = SnapshotStore::new(config.order_book_snapshot_file_path.clone(), config.order_book_snapshot_backup_dir_path.clone(), 10);
    let clock = FixedClock::new(0);
    let mut last_snapshot: Option<OrderBookSnapshot> = None;
    let latest_heights: HashMap<ChainId, u64> = HashMap::from([(ChainId::new("A"), 15), (ChainId::new("B"), 0)]);

    let mut ctx = PipelineContext {
        config: &config,
        book: &mut book,
        registry: &mut registry,
        signer: &signer,
        network: &network,
        scheduler: &mut scheduler,
        dividend_queue: &mut dividend_queue,
        snapshot_store: &store,
        clock: &clock,
        last_snapshot: &mut last_snapshot,
    };
    pipeline::process_block(&mut ctx, &chains, 0, 15, 9_999, false, &latest_heights).await.unwrap();
    drop(ctx);

    let refund = find_memo(&registry, "r2,bid1");
    assert_eq!(refund.timestamp, 9_999);
    assert_eq!(refund.amount, 50);
    assert_eq!(refund.recipient, "senderA");
}

#[tokio::test]
async fn expiry_processed_late_uses_the_expiry_blocks_own_timestamp() {
    let config = sample_config(1, 0.0, 10, None);
    let mock_a = MockLedgerAdapter::new();
    mock_a.push_block(Block { height: 15, timestamp: 7_777 }).await;
    let mock_b = MockLedgerAdapter::new();

    let chains = PipelineChains {
        ids: vec![ChainId::new("A"), ChainId::new("B")],
        configs: vec![config.chain(&ChainId::new("A")).clone(), config.chain(&ChainId::new("B")).clone()],
        adapters: vec![Arc::new(mock_a) as Arc<dyn LedgerAdapter>, Arc::new(mock_b) as Arc<dyn LedgerAdapter>],
        base_index: 0,
    };

    let mut book = OrderBookEngine::new();
    book.add_order(resting_bid("bid1", 15));
    let mut registry = PendingTransferRegistry::new();
    let signer = signer();
    let network = NullPeerNetwork;
    let mut scheduler = Scheduler::new();
    let mut dividend_queue = DividendQueue::new(64);
    let store = SnapshotStore::new(config.order_book_snapshot_file_path.clone(), config.order_book_snapshot_backup_dir_path.clone(), 10);
    let clock = FixedClock::new(0);
    let mut last_snapshot: Option<OrderBookSnapshot> = None;
    let latest_heights: HashMap<ChainId, u64> = HashMap::from([(ChainId::new("A"), 16), (ChainId::new("B"), 0)]);

    let mut ctx = PipelineContext {
        config: &config,
        book: &mut book,
        registry: &mut registry,
        signer: &signer,
        network: &network,
        scheduler: &mut scheduler,
        dividend_queue: &mut dividend_queue,
        snapshot_store: &store,
        clock: &clock,
        last_snapshot: &mut last_snapshot,
    };
    // Height 16 is processed directly; 15 (the expiry height) was skipped by
    // the interleaver's merge, so the refund must still carry height 15's
    // own block timestamp rather than height 16's.
    pipeline::process_block(&mut ctx, &chains, 0, 16, 9_999, false, &latest_heights).await.unwrap();
    drop(ctx);

    let refund = find_memo(&registry, "r2,bid1");
    assert_eq!(refund.timestamp, 7_777);
}

#[tokio::test]
async fn closing_an_owned_order_refunds_remaining_plus_the_closers_amount() {
    let config = sample_config(1, 0.0, 10_000, None);
    let mock_a = MockLedgerAdapter::new();
    mock_a.push_inbound(20, transfer("close1", "A", "senderA", "walletA", 7, "B,close,bid1", 20, 3_000)).await;
    let mock_b = MockLedgerAdapter::new();

    let chains = PipelineChains {
        ids: vec![ChainId::new("A"), ChainId::new("B")],
        configs: vec![config.chain(&ChainId::new("A")).clone(), config.chain(&ChainId::new("B")).clone()],
        adapters: vec![Arc::new(mock_a) as Arc<dyn LedgerAdapter>, Arc::new(mock_b) as Arc<dyn LedgerAdapter>],
        base_index: 0,
    };

    let mut book = OrderBookEngine::new();
    book.add_order(resting_bid("bid1", 1_000));
    let mut registry = PendingTransferRegistry::new();
    let signer = signer();
    let network = NullPeerNetwork;
    let mut scheduler = Scheduler::new();
    let mut dividend_queue = DividendQueue::new(64);
    let store = SnapshotStore::new(config.order_book_snapshot_file_path.clone(), config.order_book_snapshot_backup_dir_path.clone(), 10);
    let clock = FixedClock::new(0);
    let mut last_snapshot: Option<OrderBookSnapshot> = None;
    let latest_heights: HashMap<ChainId, u64> = HashMap::from([(ChainId::new("A"), 20), (ChainId::new("B"), 0)]);

    let mut ctx = PipelineContext {
        config: &config,
        book: &mut book,
        registry: &mut registry,
        signer: &signer,
        network: &network,
        scheduler: &mut scheduler,
        dividend_queue: &mut dividend_queue,
        snapshot_store: &store,
        clock: &clock,
        last_snapshot: &mut last_snapshot,
    };
    pipeline::process_block(&mut ctx, &chains, 0, 20, 3_000, true, &latest_heights).await.unwrap();
    drop(ctx);

    assert_eq!(book.get_order_iterator().count(), 0);
    let refund = find_memo(&registry, "r3,bid1,close1");
    assert_eq!(refund.recipient, "senderA");
    assert_eq!(refund.amount, 57); // bid1's remaining (50) + the closer's own amount (7).
    assert_eq!(refund.source_chain, ChainId::new("A"));
}

#[tokio::test]
async fn closing_an_unknown_order_refunds_the_closers_own_amount() {
    let config = sample_config(1, 0.0, 10_000, None);
    let mock_a = MockLedgerAdapter::new();
    mock_a.push_inbound(20, transfer("close1", "A", "senderA", "walletA", 9, "B,close,missing", 20, 3_000)).await;
    let mock_b = MockLedgerAdapter::new();

    let chains = PipelineChains {
        ids: vec![ChainId::new("A"), ChainId::new("B")],
        configs: vec![config.chain(&ChainId::new("A")).clone(), config.chain(&ChainId::new("B")).clone()],
        adapters: vec![Arc::new(mock_a) as Arc<dyn LedgerAdapter>, Arc::new(mock_b) as Arc<dyn LedgerAdapter>],
        base_index: 0,
    };

    let mut book = OrderBookEngine::new();
    let mut registry = PendingTransferRegistry::new();
    let signer = signer();
    let network = NullPeerNetwork;
    let mut scheduler = Scheduler::new();
    let mut dividend_queue = DividendQueue::new(64);
    let store = SnapshotStore::new(config.order_book_snapshot_file_path.clone(), config.order_book_snapshot_backup_dir_path.clone(), 10);
    let clock = FixedClock::new(0);
    let mut last_snapshot: Option<OrderBookSnapshot> = None;
    let latest_heights: HashMap<ChainId, u64> = HashMap::from([(ChainId::new("A"), 20), (ChainId::new("B"), 0)]);

    let mut ctx = PipelineContext {
        config: &config,
        book: &mut book,
        registry: &mut registry,
        signer: &signer,
        network: &network,
        scheduler: &mut scheduler,
        dividend_queue: &mut dividend_queue,
        snapshot_store: &store,
        clock: &clock,
        last_snapshot: &mut last_snapshot,
    };
    pipeline::process_block(&mut ctx, &chains, 0, 20, 3_000, true, &latest_heights).await.unwrap();
    drop(ctx);

    let refund = find_memo(&registry, "r1,close1");
    assert_eq!(refund.recipient, "senderA");
    assert_eq!(refund.amount, 9);
    assert_eq!(refund.source_chain, ChainId::new("A"));
}

#[tokio::test]
async fn snapshot_finality_tick_refunds_resting_orders_when_dex_disabled_in_range() {
    let config = sample_config(1, 0.0, 10_000, Some(150));
    let mock_a = MockLedgerAdapter::new();
    let mock_b = MockLedgerAdapter::new();

    let chains = PipelineChains {
        ids: vec![ChainId::new("A"), ChainId::new("B")],
        configs: vec![config.chain(&ChainId::new("A")).clone(), config.chain(&ChainId::new("B")).clone()],
        adapters: vec![Arc::new(mock_a) as Arc<dyn LedgerAdapter>, Arc::new(mock_b) as Arc<dyn LedgerAdapter>],
        base_index: 0,
    };

    let mut book = OrderBookEngine::new();
    let mut registry = PendingTransferRegistry::new();
    let signer = signer();
    let network = NullPeerNetwork;
    let mut scheduler = Scheduler::new();
    let mut dividend_queue = DividendQueue::new(64);
    let store = SnapshotStore::new(config.order_book_snapshot_file_path.clone(), config.order_book_snapshot_backup_dir_path.clone(), 10);
    let clock = FixedClock::new(0);

    let resting_order = dex_coordinator::model::order::Order {
        id: dex_coordinator::model::order::OrderId::new(ChainId::new("A"), "bid1"),
        side: Side::Bid,
        source_chain: ChainId::new("A"),
        source_wallet_address: "senderA".into(),
        target_chain: ChainId::new("B"),
        target_wallet_address: "wB".into(),
        height: 50,
        expiry_height: 5_000,
        timestamp: 500,
        price: Price::from_f64(2.0).unwrap(),
        amount: 80,
        remaining: 80,
        sequence: 0,
    };
    let mut last_snapshot = Some(OrderBookSnapshot {
        order_book: BookSnapshot { bid_limit_orders: vec![resting_order], ask_limit_orders: vec![] },
        chain_heights: HashMap::from([(ChainId::new("A"), 100), (ChainId::new("B"), 100)]),
    });
    let latest_heights: HashMap<ChainId, u64> = HashMap::from([(ChainId::new("A"), 200), (ChainId::new("B"), 200)]);

    let mut ctx = PipelineContext {
        config: &config,
        book: &mut book,
        registry: &mut registry,
        signer: &signer,
        network: &network,
        scheduler: &mut scheduler,
        dividend_queue: &mut dividend_queue,
        snapshot_store: &store,
        clock: &clock,
        last_snapshot: &mut last_snapshot,
    };
    pipeline::process_block(&mut ctx, &chains, 0, 200, 12_345, true, &latest_heights).await.unwrap();
    drop(ctx);

    let refund = find_memo(&registry, "r6,bid1");
    assert_eq!(refund.recipient, "senderA");
    assert_eq!(refund.amount, 80);

    let new_snapshot = last_snapshot.expect("a new snapshot is captured after the tick");
    assert_eq!(new_snapshot.chain_heights.get(&ChainId::new("A")), Some(&200));

    let _ = std::fs::remove_file(&config.order_book_snapshot_file_path);
    let _ = std::fs::remove_dir_all(&config.order_book_snapshot_backup_dir_path);
}
