use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ChainId;
use crate::model::price::Price;

/// Which side of the book an order rests on. Inbound transfers on the base
/// chain become bids; on the quote chain, asks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// An order id namespaced by its source chain.
///
/// The two ledgers are assumed to hand out disjoint transfer ids in
/// practice, but nothing in this node enforces that, so ids are carried as
/// `(chain, raw)` pairs everywhere a cross-chain collision would otherwise
/// be silently possible (registry keys, book id index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId {
    pub chain: ChainId,
    pub raw: String,
}

impl OrderId {
    pub fn new(chain: ChainId, raw: impl Into<String>) -> Self {
        OrderId { chain, raw: raw.into() }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.raw)
    }
}

/// A validated order intent about to be submitted to
/// [`crate::book::OrderBookEngine::add_order`].
///
/// `amount` is the bid's `value` (base currency) or the ask's `size` (quote
/// currency) depending on `side`; `price` is `None` for market orders.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub side: Side,
    pub source_chain: ChainId,
    pub source_wallet_address: String,
    pub target_chain: ChainId,
    pub target_wallet_address: String,
    pub height: u64,
    pub expiry_height: u64,
    pub timestamp: u64,
    pub price: Option<Price>,
    pub amount: u64,
}

/// A resting order held by the Order Book Engine. Only limit orders rest —
/// a market order's unmatched residual is refunded, never inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub source_chain: ChainId,
    pub source_wallet_address: String,
    pub target_chain: ChainId,
    pub target_wallet_address: String,
    pub height: u64,
    pub expiry_height: u64,
    pub timestamp: u64,
    pub price: Price,
    pub amount: u64,
    pub remaining: u64,
    /// Monotonic arrival sequence, the tie-break key within a price level.
    pub sequence: u64,
}

impl Order {
    pub fn from_new(order: &NewOrder, price: Price, sequence: u64) -> Self {
        Order {
            id: order.id.clone(),
            side: order.side,
            source_chain: order.source_chain.clone(),
            source_wallet_address: order.source_wallet_address.clone(),
            target_chain: order.target_chain.clone(),
            target_wallet_address: order.target_wallet_address.clone(),
            height: order.height,
            expiry_height: order.expiry_height,
            timestamp: order.timestamp,
            price,
            amount: order.amount,
            remaining: order.amount,
            sequence,
        }
    }

    pub fn is_fully_filled(&self) -> bool {
        self.remaining == 0
    }
}

/// One maker touched by an `addOrder` match. A maker appears at most once
/// per call — `last_value_taken`/`last_size_taken` are this call's whole
/// slice, not a running total.
#[derive(Debug, Clone)]
pub struct MakerFill {
    pub order: Order,
    pub last_value_taken: u64,
    pub last_size_taken: u64,
    pub fully_filled: bool,
}

/// The result of [`crate::book::OrderBookEngine::add_order`].
///
/// `take_value` is the total matched amount in base-currency units
/// (denominated the way a bid's `value` is); `take_size` is the total
/// matched amount in quote-currency units (the way an ask's `size` is).
/// Both accumulate across every fill in this call, regardless of which
/// side was the taker. `taker.amount` is mutated down to the unmatched
/// residual — the caller inserts it into the book (limit, residual > 0) or
/// refunds it (market, residual > 0).
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub taker: NewOrder,
    pub makers: Vec<MakerFill>,
    pub take_value: u64,
    pub take_size: u64,
}
