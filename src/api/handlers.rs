use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Query, State};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::api::query::{self, QueryParams};
use crate::api::state::AppState;
use crate::model::order::Order;
use crate::registry::PendingTransfer;

#[derive(Debug, Serialize, Clone)]
pub struct OrderDto {
    pub id: String,
    pub side: &'static str,
    pub source_chain: String,
    pub source_wallet_address: String,
    pub target_chain: String,
    pub target_wallet_address: String,
    pub height: u64,
    pub expiry_height: u64,
    pub timestamp: u64,
    pub price: f64,
    pub amount: u64,
    pub remaining: u64,
}

impl From<&Order> for OrderDto {
    fn from(order: &Order) -> Self {
        OrderDto {
            id: order.id.to_string(),
            side: match order.side {
                crate::model::order::Side::Bid => "bid",
                crate::model::order::Side::Ask => "ask",
            },
            source_chain: order.source_chain.to_string(),
            source_wallet_address: order.source_wallet_address.clone(),
            target_chain: order.target_chain.to_string(),
            target_wallet_address: order.target_wallet_address.clone(),
            height: order.height,
            expiry_height: order.expiry_height,
            timestamp: order.timestamp,
            price: order.price.as_f64(),
            amount: order.amount,
            remaining: order.remaining,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct PendingTransferDto {
    pub id: String,
    pub target_chain: String,
    pub creation_height: u64,
    pub inserted_at: u64,
    pub is_ready: bool,
    pub signature_count: usize,
    pub contributors: Vec<String>,
}

impl From<&PendingTransfer> for PendingTransferDto {
    fn from(entry: &PendingTransfer) -> Self {
        PendingTransferDto {
            id: entry.id.to_string(),
            target_chain: entry.target_chain.to_string(),
            creation_height: entry.creation_height,
            inserted_at: entry.inserted_at,
            is_ready: entry.is_ready,
            signature_count: entry.processed_signatures.len(),
            contributors: entry.contributors.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MarketDto {
    pub base_chain: String,
    pub quote_chain: String,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub bid_depth: usize,
    pub ask_depth: usize,
}

pub async fn get_market(State(state): State<AppState>) -> Result<Json<MarketDto>, ApiError> {
    let book = state.inner.book.read().await;
    let best_bid = book.get_bid_iterator().next().map(|o| o.price.as_f64());
    let best_ask = book.get_ask_iterator().next().map(|o| o.price.as_f64());
    Ok(Json(MarketDto {
        base_chain: state.inner.config.base_chain().to_string(),
        quote_chain: state.inner.config.quote_chain().to_string(),
        best_bid,
        best_ask,
        bid_depth: book.get_bid_iterator().count(),
        ask_depth: book.get_ask_iterator().count(),
    }))
}

pub async fn get_bids(State(state): State<AppState>, Query(query): Query<QueryParams>) -> Result<Json<Vec<OrderDto>>, ApiError> {
    let book = state.inner.book.read().await;
    let items: Vec<OrderDto> = book.get_bid_iterator().map(OrderDto::from).collect();
    Ok(Json(query::paginate(items, |o| o.id.clone(), &query, &state.inner.config)?))
}

pub async fn get_asks(State(state): State<AppState>, Query(query): Query<QueryParams>) -> Result<Json<Vec<OrderDto>>, ApiError> {
    let book = state.inner.book.read().await;
    let items: Vec<OrderDto> = book.get_ask_iterator().map(OrderDto::from).collect();
    Ok(Json(query::paginate(items, |o| o.id.clone(), &query, &state.inner.config)?))
}

pub async fn get_orders(State(state): State<AppState>, Query(query): Query<QueryParams>) -> Result<Json<Vec<OrderDto>>, ApiError> {
    let book = state.inner.book.read().await;
    let items: Vec<OrderDto> = book.get_order_iterator().map(OrderDto::from).collect();
    Ok(Json(query::paginate(items, |o| o.id.clone(), &query, &state.inner.config)?))
}

pub async fn get_pending_transfers(State(state): State<AppState>, Query(query): Query<QueryParams>) -> Result<Json<Vec<PendingTransferDto>>, ApiError> {
    let registry = state.inner.registry.read().await;
    let items: Vec<PendingTransferDto> = registry.values().map(PendingTransferDto::from).collect();
    Ok(Json(query::paginate(items, |p| p.id.clone(), &query, &state.inner.config)?))
}

#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub status: &'static str,
    pub chains: Vec<ChainHealthDto>,
}

#[derive(Debug, Serialize)]
pub struct ChainHealthDto {
    pub chain: String,
    pub height: u64,
    pub stale: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthDto> {
    let heights = state.inner.chain_heights.read().await;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0);
    let stale_after = state.inner.config.read_blocks_interval.saturating_mul(3);
    let chains: Vec<ChainHealthDto> = heights
        .iter()
        .map(|(id, health)| ChainHealthDto { chain: id.to_string(), height: health.height, stale: now.saturating_sub(health.updated_at_ms) > stale_after })
        .collect();
    let status = if chains.iter().any(|c| c.stale) { "degraded" } else { "ok" };
    Json(HealthDto { status, chains })
}
