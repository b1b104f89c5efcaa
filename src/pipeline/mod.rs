//! The per-block workflow driven by the Block Interleaver: classify
//! intents, refund invalid categories, expire and close orders, match
//! trades, and tick the snapshot store. Phases run in a fixed order;
//! sibling failures within a phase are logged and do not abort the block.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::book::OrderBookEngine;
use crate::config::{ChainConfig, ChainId, Config};
use crate::dividend::{self, DividendQueue};
use crate::intent_parser;
use crate::ledger::LedgerAdapter;
use crate::model::intent::Intent;
use crate::model::memo;
use crate::model::order::{NewOrder, OrderId};
use crate::model::transfer::Transfer;
use crate::network::PeerNetwork;
use crate::registry::{PendingTransfer, PendingTransferRegistry};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::signature::{SignatureCoordinator, TxId};
use crate::snapshot::{OrderBookSnapshot, SnapshotStore};
use crate::clock::Clock;

/// Static per-chain wiring the pipeline needs but never mutates.
pub struct PipelineChains {
    pub ids: Vec<ChainId>,
    pub configs: Vec<ChainConfig>,
    pub adapters: Vec<Arc<dyn LedgerAdapter>>,
    pub base_index: usize,
}

impl PipelineChains {
    pub fn is_base(&self, chain: &ChainId) -> bool {
        self.ids[self.base_index] == *chain
    }

    fn index_of(&self, chain: &ChainId) -> Option<usize> {
        self.ids.iter().position(|id| id == chain)
    }
}

pub struct PipelineContext<'a> {
    pub config: &'a Config,
    pub book: &'a mut OrderBookEngine,
    pub registry: &'a mut PendingTransferRegistry,
    pub signer: &'a SignatureCoordinator,
    pub network: &'a dyn PeerNetwork,
    pub scheduler: &'a mut Scheduler,
    pub dividend_queue: &'a mut DividendQueue,
    pub snapshot_store: &'a SnapshotStore,
    pub clock: &'a dyn Clock,
    pub last_snapshot: &'a mut Option<OrderBookSnapshot>,
}

/// Processes one confirmed block from `chain_index`, running its nine
/// phases in order.
#[allow(clippy::too_many_arguments)]
pub async fn process_block(
    ctx: &mut PipelineContext<'_>,
    chains: &PipelineChains,
    chain_index: usize,
    height: u64,
    timestamp: u64,
    is_last_block: bool,
    latest_chain_heights: &HashMap<ChainId, u64>,
) -> anyhow::Result<()> {
    let chain_id = chains.ids[chain_index].clone();
    let chain_config = chains.configs[chain_index].clone();
    let adapter = chains.adapters[chain_index].clone();

    // Phase 1: rebroadcast sweep.
    if is_last_block {
        rebroadcast_sweep(ctx, chains, &chain_id, &chain_config, height, adapter.as_ref()).await;
    }

    // Phase 2: dividend scheduling.
    if dividend::is_dividend_tick(height, &chain_config) {
        ctx.dividend_queue.push(dividend::DividendJob {
            chain: chain_id.clone(),
            to_height: height,
            dividend_height_interval: chain_config.dividend_height_interval,
        });
    }

    // Phase 3: observe outbound — confirms and removes pending transfers.
    match adapter.outbound_transfers(height, &chain_config.wallet_address).await {
        Ok(outbound) => {
            for transfer in outbound {
                let id = TxId::new(chain_id.clone(), transfer.id.clone());
                ctx.registry.remove(&id);
            }
        }
        Err(err) => warn!(chain = %chain_id, %err, "ledger unavailable fetching outbound transfers"),
    }

    // Phase 4: parse inbound.
    let inbound = match adapter.inbound_transfers(height, &chain_config.wallet_address).await {
        Ok(transfers) => transfers,
        Err(err) => {
            warn!(chain = %chain_id, %err, "ledger unavailable fetching inbound transfers");
            return Ok(());
        }
    };
    let envelopes: Vec<_> = inbound
        .iter()
        .map(|transfer| intent_parser::parse(transfer, ctx.config, &chain_config, height, ctx.book))
        .collect();

    // Phase 5: refund rejections.
    if !ctx.config.passive_mode {
        for envelope in &envelopes {
            if !envelope.kind.is_rejection() {
                continue;
            }
            let memo = match &envelope.kind {
                Intent::Invalid { reason } => memo::r1_rejected(&envelope.transfer_id, reason),
                Intent::Oversized => memo::r1_rejected(&envelope.transfer_id, "Oversized"),
                Intent::Undersized => memo::r1_rejected(&envelope.transfer_id, "Undersized"),
                Intent::Moved { to_address } => {
                    memo::r5_moved(&OrderId::new(chain_id.clone(), envelope.transfer_id.clone()), to_address)
                }
                Intent::Disabled => memo::r6_disabled(&OrderId::new(chain_id.clone(), envelope.transfer_id.clone())),
                _ => unreachable!("filtered to rejection kinds above"),
            };
            let refund_amount = match &envelope.kind {
                Intent::Moved { .. } | Intent::Disabled => envelope.amount,
                _ => envelope.amount.saturating_sub(chain_config.exchange_fee_base),
            };
            author_and_register(ctx, chains, chain_index, height, envelope.source_wallet_address.clone(), refund_amount, memo, timestamp);
        }
    }

    // Phase 6: expire orders.
    let expired = if chains.is_base(&chain_id) { ctx.book.expire_bid_orders(height) } else { ctx.book.expire_ask_orders(height) };
    for order in expired {
        let refund_timestamp = if order.expiry_height == height {
            timestamp
        } else {
            match adapter.block_at(order.expiry_height).await {
                Ok(Some(block)) => block.timestamp,
                _ => timestamp,
            }
        };
        let Some(source_index) = chains.index_of(&order.source_chain) else { continue };
        let memo = memo::r2_expired(&order.id);
        author_and_register(ctx, chains, source_index, height, order.source_wallet_address.clone(), order.remaining, memo, refund_timestamp);
    }

    // Phase 7: close orders. The parser already rejected unknown, wrong-chain,
    // and wrong-wallet references; what's left is the order racing away
    // (expiring in phase 6, or a duplicate close landing earlier in this same
    // block) between phase 4's parse and here, which still refunds the
    // closer's own amount rather than dropping it.
    for envelope in &envelopes {
        let Intent::Close { order_id } = &envelope.kind else { continue };
        let closed = match ctx.book.get_order(order_id) {
            Some(existing) if existing.source_wallet_address == envelope.source_wallet_address => {
                let remaining = existing.remaining;
                let source_chain = existing.source_chain.clone();
                let recipient = existing.source_wallet_address.clone();
                if ctx.book.close_order(order_id).is_ok() {
                    if let Some(source_index) = chains.index_of(&source_chain) {
                        let memo = memo::r3_closed(order_id, &envelope.transfer_id);
                        let amount = remaining.saturating_add(envelope.amount);
                        author_and_register(ctx, chains, source_index, height, recipient, amount, memo, timestamp);
                    }
                    true
                } else {
                    false
                }
            }
            _ => false,
        };
        if !closed {
            if let Some(source_index) = chains.index_of(&envelope.source_chain) {
                let memo = memo::r1_rejected(&envelope.transfer_id, "Invalid operation");
                let refund_amount = envelope.amount.saturating_sub(chain_config.exchange_fee_base);
                author_and_register(ctx, chains, source_index, height, envelope.source_wallet_address.clone(), refund_amount, memo, timestamp);
            }
        }
    }

    // Phase 8: match orders.
    for envelope in &envelopes {
        let (target_chain, target_wallet_address, price) = match &envelope.kind {
            Intent::Limit { target_chain, target_wallet_address, price } => (target_chain.clone(), target_wallet_address.clone(), Some(*price)),
            Intent::Market { target_chain, target_wallet_address } => (target_chain.clone(), target_wallet_address.clone(), None),
            _ => continue,
        };
        let side = intent_parser::side_for_chain(ctx.config, &envelope.source_chain);
        let order_id = OrderId::new(envelope.source_chain.clone(), envelope.transfer_id.clone());
        let new_order = NewOrder {
            id: order_id.clone(),
            side,
            source_chain: envelope.source_chain.clone(),
            source_wallet_address: envelope.source_wallet_address.clone(),
            target_chain: target_chain.clone(),
            target_wallet_address: target_wallet_address.clone(),
            height: envelope.height,
            expiry_height: envelope.height + chain_config.order_height_expiry,
            timestamp: envelope.timestamp,
            price,
            amount: envelope.amount,
        };
        let result = ctx.book.add_order(new_order);

        if result.take_size > 0 {
            let Some(target_index) = chains.index_of(&target_chain) else { continue };
            let gross = if chains.is_base(&target_chain) { result.take_value } else { result.take_size };
            if let Some(payout) = net_payout(gross, &chains.configs[target_index]) {
                let memo = memo::t1_taker(&envelope.source_chain, &order_id);
                author_and_register(ctx, chains, target_index, height, target_wallet_address.clone(), payout, memo, result.taker.timestamp + 1);
            }
        }

        if result.taker.price.is_none() && result.taker.amount > 0 {
            let memo = memo::r4_unmatched(&order_id);
            author_and_register(ctx, chains, chain_index, height, envelope.source_wallet_address.clone(), result.taker.amount, memo, timestamp);
        }

        for maker_fill in &result.makers {
            let Some(maker_index) = chains.index_of(&maker_fill.order.target_chain) else { continue };
            let gross = if chains.is_base(&maker_fill.order.target_chain) { maker_fill.last_value_taken } else { maker_fill.last_size_taken };
            if let Some(payout) = net_payout(gross, &chains.configs[maker_index]) {
                let memo = memo::t2_maker(&maker_fill.order.source_chain, &maker_fill.order.id, &order_id);
                author_and_register(
                    ctx,
                    chains,
                    maker_index,
                    height,
                    maker_fill.order.target_wallet_address.clone(),
                    payout,
                    memo,
                    result.taker.timestamp + 1,
                );
            }
        }
    }

    // Phase 9: snapshot tick.
    if chains.is_base(&chain_id) && height > 0 && height % ctx.config.order_book_snapshot_finality == 0 {
        if let Some(prior) = ctx.last_snapshot.clone() {
            let prior_base_height = prior.chain_heights.get(&chain_id).copied().unwrap_or(0);
            if let Some(disabled_from) = chain_config.dex_disabled_from_height {
                if disabled_from > prior_base_height && disabled_from <= height {
                    let memo_for = |order_id: &OrderId| match &chain_config.dex_moved_to_address {
                        Some(addr) => memo::r5_moved(order_id, addr),
                        None => memo::r6_disabled(order_id),
                    };
                    for order in prior.order_book.bid_limit_orders.iter().chain(prior.order_book.ask_limit_orders.iter()) {
                        let Some(source_index) = chains.index_of(&order.source_chain) else { continue };
                        let m = memo_for(&order.id);
                        author_and_register(ctx, chains, source_index, height, order.source_wallet_address.clone(), order.remaining, m, timestamp);
                    }
                }
            }
            if let Err(err) = ctx.snapshot_store.save(&prior, prior_base_height) {
                error!(%err, "snapshot persistence failed, continuing with in-memory state");
            }
        }
        *ctx.last_snapshot = Some(OrderBookSnapshot { order_book: ctx.book.get_snapshot(), chain_heights: latest_chain_heights.clone() });
    }

    Ok(())
}

/// `floor(gross * (1 - exchangeFeeRate) - exchangeFeeBase)`, `None` if the
/// result would be zero or negative.
fn net_payout(gross: u64, chain_config: &ChainConfig) -> Option<u64> {
    let net = (gross as f64 * (1.0 - chain_config.exchange_fee_rate)).floor() - chain_config.exchange_fee_base as f64;
    if net > 0.0 {
        Some(net as u64)
    } else {
        warn!(gross, "payout underflow, no transaction authored");
        None
    }
}

/// Builds and registers one outgoing multisig transaction, scheduling its
/// delayed signature broadcast. No-op entirely in passive mode, since the
/// node is then observer-only.
#[allow(clippy::too_many_arguments)]
fn author_and_register(
    ctx: &mut PipelineContext<'_>,
    chains: &PipelineChains,
    target_chain_index: usize,
    creation_height: u64,
    recipient: String,
    amount: u64,
    memo: String,
    timestamp: u64,
) -> Option<TxId> {
    if ctx.config.passive_mode || amount == 0 {
        return None;
    }
    let target_chain = chains.ids[target_chain_index].clone();
    let raw_id = uuid::Uuid::new_v4().to_string();
    let transfer = Transfer {
        id: raw_id.clone(),
        source_chain: target_chain.clone(),
        sender: chains.configs[target_chain_index].wallet_address.clone(),
        recipient,
        amount,
        memo,
        height: creation_height,
        timestamp,
        signatures: vec![],
    };
    let signed = ctx.signer.author(transfer);
    let own_signature = signed.signatures[0].signature;
    let required = ctx.signer.wallet(&target_chain).map(|w| w.required_signature_count).unwrap_or(1);
    let is_ready = signed.signatures.len() >= required;
    let processed_signatures: HashSet<_> = signed.signatures.iter().map(|s| s.signature).collect();
    let tx_id = TxId::new(target_chain.clone(), raw_id);

    ctx.registry.put(PendingTransfer {
        id: tx_id.clone(),
        transaction: signed,
        target_chain: target_chain.clone(),
        processed_signatures,
        contributors: HashSet::from([ctx.signer.own_member_address.clone()]),
        public_key: ctx.signer.own_public_key,
        creation_height,
        inserted_at: ctx.clock.now_ms(),
        is_ready,
    });

    ctx.scheduler.schedule_after(
        Duration::from_millis(ctx.config.signature_broadcast_delay),
        ScheduledTask::BroadcastSignature { chain: target_chain, tx_id: tx_id.clone(), public_key: ctx.signer.own_public_key, signature: own_signature },
    );
    Some(tx_id)
}

async fn rebroadcast_sweep(
    ctx: &mut PipelineContext<'_>,
    _chains: &PipelineChains,
    chain_id: &ChainId,
    chain_config: &ChainConfig,
    safe_height: u64,
    adapter: &dyn LedgerAdapter,
) {
    let candidates: Vec<(TxId, bool, Transfer, Option<[u8; 64]>)> = ctx
        .registry
        .values()
        .filter(|entry| &entry.target_chain == chain_id)
        .filter_map(|entry| {
            let age = safe_height.saturating_sub(entry.creation_height);
            if age > chain_config.rebroadcast_after_height && age < chain_config.rebroadcast_until_height {
                let own_sig = entry.transaction.signatures.iter().find(|s| s.public_key == entry.public_key).map(|s| s.signature);
                Some((entry.id.clone(), entry.is_ready, entry.transaction.transfer.clone(), own_sig))
            } else {
                None
            }
        })
        .collect();

    for (tx_id, is_ready, transfer, own_sig) in candidates {
        if is_ready {
            if let Err(err) = adapter.post_transaction(&transfer).await {
                warn!(%tx_id, %err, "rebroadcast repost failed");
            }
        } else if let Some(signature) = own_sig {
            if let Err(err) = ctx.network.broadcast_signature(chain_id, &tx_id, ctx.signer.own_public_key, signature).await {
                warn!(%tx_id, %err, "rebroadcast signature emit failed");
            }
        }
    }
}
