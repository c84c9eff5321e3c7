//! Funds ledger HTTP shell entry point.
//!
//! Binds to the wallet/provider named by `RPC_URL` and exposes token details,
//! portfolios, deposits and sales over a small Axum REST API.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use funds_ledger::api::{self, ApiState};
use funds_ledger::config::Config;
use funds_ledger::rpc::RpcProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .build()?;
    let provider = RpcProvider::new(client, config.rpc_url.clone(), config.rpc_max_retries);

    info!(
        "Using provider {} (token {}, escrow {})",
        config.rpc_url, config.token_address, config.escrow_address
    );

    let state = Arc::new(ApiState {
        provider: Arc::new(provider),
        config: config.clone(),
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/token", get(api::get_token))
        .route("/portfolio/:account", get(api::get_portfolio))
        .route("/deposits", post(api::post_deposit))
        .route("/sales", post(api::post_sale))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
