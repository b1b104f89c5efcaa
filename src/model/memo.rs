//! Encoders for the outbound memo codes and a splitter for inbound ones.
//! Comma-separated ASCII, first field is always the code.

use crate::config::ChainId;
use crate::model::order::OrderId;

pub fn split(memo: &str) -> Vec<&str> {
    memo.split(',').collect()
}

pub fn r1_rejected(tx_id: &str, reason: &str) -> String {
    format!("r1,{tx_id}: {reason}")
}

pub fn r2_expired(order_id: &OrderId) -> String {
    format!("r2,{}: Expired order", order_id.raw)
}

pub fn r3_closed(order_id: &OrderId, close_tx_id: &str) -> String {
    format!("r3,{},{close_tx_id}: Closed order", order_id.raw)
}

pub fn r4_unmatched(order_id: &OrderId) -> String {
    format!("r4,{}: Unmatched market order part", order_id.raw)
}

pub fn r5_moved(order_id: &OrderId, new_addr: &str) -> String {
    format!("r5,{},{new_addr}: DEX has moved", order_id.raw)
}

pub fn r6_disabled(order_id: &OrderId) -> String {
    format!("r6,{}: DEX has been disabled", order_id.raw)
}

pub fn t1_taker(src_chain: &ChainId, taker_order_id: &OrderId) -> String {
    format!("t1,{src_chain},{}: Orders taken", taker_order_id.raw)
}

pub fn t2_maker(src_chain: &ChainId, maker_order_id: &OrderId, taker_order_id: &OrderId) -> String {
    format!(
        "t2,{src_chain},{},{}: Order made",
        maker_order_id.raw, taker_order_id.raw
    )
}

pub fn d1_dividend(from_height: u64, to_height: u64) -> String {
    format!("d1,{from_height},{to_height}: Member dividend")
}
