use crate::book::OrderBookEngine;
use crate::config::{ChainConfig, ChainId, Config};
use crate::model::intent::{Intent, IntentEnvelope};
use crate::model::memo;
use crate::model::order::{OrderId, Side};
use crate::model::price::Price;
use crate::model::transfer::Transfer;

/// The oversized cutoff, kept as an explicit constant for cross-node
/// determinism rather than derived from the integer width in use.
pub const MAX_ORDER_AMOUNT: u64 = (1u64 << 53) - 1;

/// Decodes one inbound transfer's memo into a classified [`Intent`].
///
/// Evaluated as an ordered decision table, first match wins.
pub fn parse(
    transfer: &Transfer,
    config: &Config,
    source_chain_config: &ChainConfig,
    current_height: u64,
    book: &OrderBookEngine,
) -> IntentEnvelope {
    let kind = classify(transfer, config, source_chain_config, current_height, book);
    IntentEnvelope {
        transfer_id: transfer.id.clone(),
        source_chain: transfer.source_chain.clone(),
        source_wallet_address: transfer.sender.clone(),
        amount: transfer.amount,
        height: transfer.height,
        timestamp: transfer.timestamp,
        kind,
    }
}

fn classify(
    transfer: &Transfer,
    config: &Config,
    source_chain_config: &ChainConfig,
    current_height: u64,
    book: &OrderBookEngine,
) -> Intent {
    if transfer.amount > MAX_ORDER_AMOUNT {
        return Intent::Oversized;
    }

    if let Some(disabled_from) = source_chain_config.dex_disabled_from_height {
        if current_height >= disabled_from {
            return match &source_chain_config.dex_moved_to_address {
                Some(to_address) => Intent::Moved { to_address: to_address.clone() },
                None => Intent::Disabled,
            };
        }
    }

    let fields = memo::split(&transfer.memo);
    let Some(&field0) = fields.first() else {
        return Intent::Invalid { reason: "Invalid target chain".into() };
    };

    let target_chain = ChainId::new(field0);
    if target_chain == transfer.source_chain || !config.chains.contains_key(&target_chain) {
        return Intent::Invalid { reason: "Invalid target chain".into() };
    }

    let Some(&op) = fields.get(1) else {
        return Intent::Invalid { reason: "Invalid operation".into() };
    };

    if matches!(op, "limit" | "market") && transfer.amount < source_chain_config.min_order_amount {
        return Intent::Undersized;
    }

    match op {
        "limit" => classify_limit(&fields, transfer, config, &target_chain),
        "market" => classify_market(&fields, transfer, config, &target_chain, book),
        "close" => classify_close(&fields, transfer, book),
        _ => Intent::Invalid { reason: "Invalid operation".into() },
    }
}

fn classify_limit(fields: &[&str], transfer: &Transfer, config: &Config, target_chain: &ChainId) -> Intent {
    let Some(price_str) = fields.get(2) else {
        return Intent::Invalid { reason: "Invalid price".into() };
    };
    let Ok(price_value) = price_str.parse::<f64>() else {
        return Intent::Invalid { reason: "Invalid price".into() };
    };
    let Some(price) = Price::from_f64(price_value) else {
        return Intent::Invalid { reason: "Invalid price".into() };
    };

    let Some(wallet) = fields.get(3).filter(|w| !w.is_empty()) else {
        return Intent::Invalid { reason: "Invalid wallet address".into() };
    };

    if is_too_small_to_convert(transfer, config, target_chain, price) {
        return Intent::Invalid { reason: "Too small to convert".into() };
    }

    Intent::Limit {
        target_chain: target_chain.clone(),
        target_wallet_address: wallet.to_string(),
        price,
    }
}

fn classify_market(
    fields: &[&str],
    transfer: &Transfer,
    config: &Config,
    target_chain: &ChainId,
    book: &OrderBookEngine,
) -> Intent {
    let Some(wallet) = fields.get(2).filter(|w| !w.is_empty()) else {
        return Intent::Invalid { reason: "Invalid wallet address".into() };
    };

    let side = side_for_chain(config, &transfer.source_chain);
    let best_opposite_price = match side {
        Side::Bid => book.get_ask_iterator().next().map(|o| o.price),
        Side::Ask => book.get_bid_iterator().next().map(|o| o.price),
    };
    let Some(price) = best_opposite_price else {
        return Intent::Invalid { reason: "Too small to convert".into() };
    };

    if is_too_small_to_convert(transfer, config, target_chain, price) {
        return Intent::Invalid { reason: "Too small to convert".into() };
    }

    Intent::Market { target_chain: target_chain.clone(), target_wallet_address: wallet.to_string() }
}

/// Rejects (as `Invalid`, refunded via an `r1` in phase 5) when the
/// referenced order is missing, unknown, on a different source chain than
/// the closer, or owned by a different source wallet — a lookup against
/// the order's chain-namespaced id catches all three at once, since an
/// order actually resting under a different chain simply won't be found
/// under this one.
fn classify_close(fields: &[&str], transfer: &Transfer, book: &OrderBookEngine) -> Intent {
    let Some(raw_id) = fields.get(2).filter(|id| !id.is_empty()) else {
        return Intent::Invalid { reason: "Invalid operation".into() };
    };
    let order_id = OrderId::new(transfer.source_chain.clone(), raw_id.to_string());
    match book.get_order(&order_id) {
        Some(order) if order.source_wallet_address == transfer.sender => Intent::Close { order_id },
        _ => Intent::Invalid { reason: "Invalid operation".into() },
    }
}

/// Side assignment depends on source chain: base chain inbound is a bid,
/// quote chain inbound is an ask.
pub fn side_for_chain(config: &Config, source_chain: &ChainId) -> Side {
    if *source_chain == config.base_chain { Side::Bid } else { Side::Ask }
}

/// For a base-side (bid) order: `floor(amount / price) <= quoteExchangeFeeBase`.
/// For a quote-side (ask) order: `floor(amount * price) <= baseExchangeFeeBase`.
/// `price` is "base units per one quote unit" (see [`crate::model::price`]).
fn is_too_small_to_convert(transfer: &Transfer, config: &Config, target_chain: &ChainId, price: Price) -> bool {
    let side = side_for_chain(config, &transfer.source_chain);
    let target_config = config.chain(target_chain);
    match side {
        Side::Bid => price.base_to_quote(transfer.amount) <= target_config.exchange_fee_base,
        Side::Ask => price.quote_to_base(transfer.amount) <= target_config.exchange_fee_base,
    }
}
