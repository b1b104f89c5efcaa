use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::order::{MakerFill, MatchResult, NewOrder, Order, OrderId, Side};
use crate::model::price::Price;

#[derive(Debug, Error)]
pub enum BookError {
    #[error("order {0} is not open")]
    NotOpen(OrderId),
}

type BidKey = (Reverse<Price>, u64);
type AskKey = (Price, u64);

/// A snapshot of the book's observable state — bids price-descending then
/// time-ascending, asks price-ascending then time-ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bid_limit_orders: Vec<Order>,
    pub ask_limit_orders: Vec<Order>,
}

/// Price-time priority limit order book for one (base, quote) pair.
///
/// Bid side keys price descending / arrival ascending; ask side keys price
/// ascending / arrival ascending. An id index gives O(1) lookup and a
/// per-side expiry index keyed by height gives ordered head-scan expiry.
#[derive(Default)]
pub struct OrderBookEngine {
    orders: HashMap<OrderId, Order>,
    bid_index: BTreeMap<BidKey, OrderId>,
    ask_index: BTreeMap<AskKey, OrderId>,
    bid_expiry: BTreeMap<u64, Vec<OrderId>>,
    ask_expiry: BTreeMap<u64, Vec<OrderId>>,
    next_sequence: u64,
}

impl OrderBookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    fn best_ask(&self) -> Option<OrderId> {
        self.ask_index.iter().next().map(|(_, id)| id.clone())
    }

    fn best_bid(&self) -> Option<OrderId> {
        self.bid_index.iter().next().map(|(_, id)| id.clone())
    }

    fn insert_order(&mut self, order: Order) {
        match order.side {
            Side::Bid => {
                self.bid_index.insert((Reverse(order.price), order.sequence), order.id.clone());
                self.bid_expiry.entry(order.expiry_height).or_default().push(order.id.clone());
                self.bid_expiry.get_mut(&order.expiry_height).unwrap().sort();
            }
            Side::Ask => {
                self.ask_index.insert((order.price, order.sequence), order.id.clone());
                self.ask_expiry.entry(order.expiry_height).or_default().push(order.id.clone());
                self.ask_expiry.get_mut(&order.expiry_height).unwrap().sort();
            }
        }
        self.orders.insert(order.id.clone(), order);
    }

    fn remove_resting(&mut self, id: &OrderId) -> Option<Order> {
        let order = self.orders.remove(id)?;
        match order.side {
            Side::Bid => {
                self.bid_index.remove(&(Reverse(order.price), order.sequence));
                if let Some(v) = self.bid_expiry.get_mut(&order.expiry_height) {
                    v.retain(|oid| oid != id);
                }
            }
            Side::Ask => {
                self.ask_index.remove(&(order.price, order.sequence));
                if let Some(v) = self.ask_expiry.get_mut(&order.expiry_height) {
                    v.retain(|oid| oid != id);
                }
            }
        }
        Some(order)
    }

    /// Match `order` against the opposite side, in priority order, while
    /// prices cross (limits) or unconditionally (markets). Residual limit
    /// remainder rests in the book; residual market remainder is left on
    /// `taker.amount` for the caller to refund.
    pub fn add_order(&mut self, mut order: NewOrder) -> MatchResult {
        let mut makers = Vec::new();
        let mut take_value: u64 = 0;
        let mut take_size: u64 = 0;

        loop {
            if order.amount == 0 {
                break;
            }
            let maker_id = match order.side {
                Side::Bid => self.best_ask(),
                Side::Ask => self.best_bid(),
            };
            let Some(maker_id) = maker_id else { break };
            let maker_price = self.orders.get(&maker_id).expect("indexed order present").price;

            if let Some(taker_price) = order.price {
                let crosses = match order.side {
                    Side::Bid => taker_price >= maker_price,
                    Side::Ask => taker_price <= maker_price,
                };
                if !crosses {
                    break;
                }
            }

            let (fill_value, fill_size) = {
                let maker = self.orders.get(&maker_id).expect("indexed order present");
                match order.side {
                    Side::Bid => {
                        let maker_base_equiv = maker_price.quote_to_base(maker.remaining);
                        let fill_value = order.amount.min(maker_base_equiv);
                        let fill_size = maker_price.base_to_quote(fill_value);
                        (fill_value, fill_size)
                    }
                    Side::Ask => {
                        let taker_base_equiv = maker_price.quote_to_base(order.amount);
                        let fill_value = maker.remaining.min(taker_base_equiv);
                        let fill_size = maker_price.base_to_quote(fill_value);
                        (fill_value, fill_size)
                    }
                }
            };

            if fill_value == 0 && fill_size == 0 {
                break;
            }

            match order.side {
                Side::Bid => {
                    order.amount -= fill_value;
                    self.orders.get_mut(&maker_id).unwrap().remaining -= fill_size;
                }
                Side::Ask => {
                    order.amount -= fill_size;
                    self.orders.get_mut(&maker_id).unwrap().remaining -= fill_value;
                }
            }

            take_value += fill_value;
            take_size += fill_size;

            let maker_snapshot = self.orders.get(&maker_id).expect("indexed order present").clone();
            let fully_filled = maker_snapshot.remaining == 0;
            makers.push(MakerFill {
                order: maker_snapshot,
                last_value_taken: fill_value,
                last_size_taken: fill_size,
                fully_filled,
            });

            if fully_filled {
                self.remove_resting(&maker_id);
            }
        }

        if order.amount > 0 {
            if let Some(price) = order.price {
                let seq = self.next_sequence();
                let resting = Order::from_new(&order, price, seq);
                self.insert_order(resting);
            }
        }

        MatchResult { taker: order, makers, take_value, take_size }
    }

    pub fn close_order(&mut self, id: &OrderId) -> Result<Order, BookError> {
        self.remove_resting(id).ok_or_else(|| BookError::NotOpen(id.clone()))
    }

    /// Remove and return all bid orders with `expiry_height <= height`, in
    /// ascending-height then ascending-id order.
    pub fn expire_bid_orders(&mut self, height: u64) -> Vec<Order> {
        self.expire(Side::Bid, height)
    }

    pub fn expire_ask_orders(&mut self, height: u64) -> Vec<Order> {
        self.expire(Side::Ask, height)
    }

    fn expire(&mut self, side: Side, height: u64) -> Vec<Order> {
        let expiry_index = match side {
            Side::Bid => &self.bid_expiry,
            Side::Ask => &self.ask_expiry,
        };
        let due_heights: Vec<u64> = expiry_index.range(..=height).map(|(h, _)| *h).collect();
        let mut due_ids = Vec::new();
        for h in due_heights {
            let ids = match side {
                Side::Bid => self.bid_expiry.remove(&h),
                Side::Ask => self.ask_expiry.remove(&h),
            };
            if let Some(mut ids) = ids {
                ids.sort();
                due_ids.extend(ids);
            }
        }
        let mut expired = Vec::with_capacity(due_ids.len());
        for id in due_ids {
            if let Some(order) = self.orders.remove(&id) {
                match order.side {
                    Side::Bid => {
                        self.bid_index.remove(&(Reverse(order.price), order.sequence));
                    }
                    Side::Ask => {
                        self.ask_index.remove(&(order.price, order.sequence));
                    }
                }
                expired.push(order);
            }
        }
        expired
    }

    pub fn get_order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn get_bid_iterator(&self) -> impl Iterator<Item = &Order> {
        self.bid_index.values().filter_map(move |id| self.orders.get(id))
    }

    pub fn get_ask_iterator(&self) -> impl Iterator<Item = &Order> {
        self.ask_index.values().filter_map(move |id| self.orders.get(id))
    }

    pub fn get_order_iterator(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn peek_bids(&self, n: usize) -> Vec<&Order> {
        self.get_bid_iterator().take(n).collect()
    }

    pub fn peek_asks(&self, n: usize) -> Vec<&Order> {
        self.get_ask_iterator().take(n).collect()
    }

    pub fn get_snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            bid_limit_orders: self.get_bid_iterator().cloned().collect(),
            ask_limit_orders: self.get_ask_iterator().cloned().collect(),
        }
    }

    pub fn set_snapshot(&mut self, snapshot: BookSnapshot) {
        self.clear();
        for order in snapshot.bid_limit_orders {
            let seq = self.next_sequence();
            self.insert_order(Order { sequence: seq, ..order });
        }
        for order in snapshot.ask_limit_orders {
            let seq = self.next_sequence();
            self.insert_order(Order { sequence: seq, ..order });
        }
    }

    pub fn clear(&mut self) {
        self.orders.clear();
        self.bid_index.clear();
        self.ask_index.clear();
        self.bid_expiry.clear();
        self.ask_expiry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainId;

    fn chain(s: &str) -> ChainId {
        ChainId::new(s)
    }

    fn new_order(id: &str, side: Side, amount: u64, price: f64, seq_height: u64) -> NewOrder {
        NewOrder {
            id: OrderId::new(chain(if side == Side::Bid { "A" } else { "B" }), id),
            side,
            source_chain: chain(if side == Side::Bid { "A" } else { "B" }),
            source_wallet_address: "src".into(),
            target_chain: chain(if side == Side::Bid { "B" } else { "A" }),
            target_wallet_address: "dst".into(),
            height: seq_height,
            expiry_height: seq_height + 100,
            timestamp: 1000 + seq_height,
            price: Some(Price::from_f64(price).unwrap()),
            amount,
        }
    }

    #[test]
    fn full_cross_chain_match_empties_book() {
        let mut book = OrderBookEngine::new();
        let ask_result = book.add_order(new_order("ask1", Side::Ask, 100, 2.0, 1));
        assert!(ask_result.makers.is_empty());

        let bid_result = book.add_order(new_order("bid1", Side::Bid, 200, 2.0, 2));
        assert_eq!(bid_result.take_value, 200);
        assert_eq!(bid_result.take_size, 100);
        assert_eq!(bid_result.taker.amount, 0);
        assert_eq!(bid_result.makers.len(), 1);
        assert!(bid_result.makers[0].fully_filled);
        assert_eq!(bid_result.makers[0].last_value_taken, 200);
        assert_eq!(bid_result.makers[0].last_size_taken, 100);

        assert_eq!(book.get_order_iterator().count(), 0);
    }

    #[test]
    fn market_order_partial_fill_leaves_residual_on_taker() {
        let mut book = OrderBookEngine::new();
        book.add_order(new_order("ask1", Side::Ask, 100, 2.0, 1));

        let mut market = new_order("mkt1", Side::Bid, 300, 2.0, 2);
        market.price = None;
        let result = book.add_order(market);

        assert_eq!(result.take_value, 200);
        assert_eq!(result.take_size, 100);
        assert_eq!(result.taker.amount, 100);
        assert_eq!(book.get_order_iterator().count(), 0);
    }

    #[test]
    fn expire_returns_orders_in_deterministic_id_order() {
        let mut book = OrderBookEngine::new();
        let mut o1 = new_order("bidB", Side::Bid, 10, 1.0, 5);
        o1.expiry_height = 15;
        let mut o2 = new_order("bidA", Side::Bid, 10, 1.0, 5);
        o2.expiry_height = 15;
        book.add_order(o1);
        book.add_order(o2);

        let expired = book.expire_bid_orders(15);
        assert_eq!(expired.len(), 2);
        assert_eq!(expired[0].id.raw, "bidA");
        assert_eq!(expired[1].id.raw, "bidB");
    }

    #[test]
    fn snapshot_round_trip_preserves_observable_state() {
        let mut book = OrderBookEngine::new();
        book.add_order(new_order("ask1", Side::Ask, 100, 2.0, 1));
        book.add_order(new_order("ask2", Side::Ask, 50, 3.0, 2));

        let snapshot = book.get_snapshot();
        let mut restored = OrderBookEngine::new();
        restored.set_snapshot(snapshot);

        let before: Vec<_> = book.get_ask_iterator().map(|o| (o.id.clone(), o.remaining)).collect();
        let after: Vec<_> = restored.get_ask_iterator().map(|o| (o.id.clone(), o.remaining)).collect();
        assert_eq!(before, after);
    }
}
