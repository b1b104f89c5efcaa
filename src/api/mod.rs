pub mod error;
pub mod handlers;
pub mod query;
pub mod state;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

pub use state::AppState;

/// Serves the read-only Query API plus the `/health` route, against a
/// shared [`AppState`] the block-processing loop also writes to.
pub async fn serve(host: &str, port: u16, state: AppState) -> Result<()> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/market", get(handlers::get_market))
        .route("/bids", get(handlers::get_bids))
        .route("/asks", get(handlers::get_asks))
        .route("/orders", get(handlers::get_orders))
        .route("/pending-transfers", get(handlers::get_pending_transfers))
        .layer(cors)
        .with_state(state);

    let addr = format!("{host}:{port}");
    tracing::info!(%addr, "query API listening");

    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    axum::serve(listener, app).await.context("running query API server")?;
    Ok(())
}
