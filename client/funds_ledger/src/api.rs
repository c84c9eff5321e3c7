//! Axum REST API handlers.
//!
//! Each request binds a fresh [`Session`] so that handles are always derived
//! from the account and network the wallet reports right now.

use std::sync::Arc;

use alloy_primitives::Address;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::chain::{Chain, TxReceipt};
use crate::config::Config;
use crate::errors::LedgerError;
use crate::lifecycle::{Action, LifecycleEvent, TracingNotifier, TxState};
use crate::orchestrator::{SellRequest, TransactionOrchestrator};
use crate::portfolio;
use crate::session::Session;

#[derive(Clone)]
pub struct ApiState {
    pub provider: Arc<dyn Chain>,
    pub config: Config,
}

impl ApiState {
    async fn session(&self) -> Result<Session, LedgerError> {
        Session::bind(self.provider.clone(), self.config.account).await
    }
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DepositBody {
    /// Human-entered token amount, e.g. `"10"` or `"2.5"`.
    pub amount: String,
    pub post_id: u64,
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub action: Action,
    pub state: TxState,
    pub receipt: Option<TxReceipt>,
    pub events: Vec<LifecycleEvent>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InvalidAmount(_)
        | LedgerError::InvalidAccount(_)
        | LedgerError::InvalidContractDescriptor(_)
        | LedgerError::Json(_) => StatusCode::BAD_REQUEST,
        LedgerError::NoDeposits(_) => StatusCode::NOT_FOUND,
        LedgerError::NoSigner => StatusCode::UNAUTHORIZED,
        LedgerError::SessionChanged(_) | LedgerError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        LedgerError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        LedgerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(err: LedgerError) -> Response {
    (
        status_for(&err),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn action_response(
    outcome: Result<TxReceipt, LedgerError>,
    orch: &TransactionOrchestrator<'_>,
    mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
) -> Response {
    let mut collected = Vec::new();
    while let Ok(ev) = events.try_recv() {
        collected.push(ev);
    }
    let (status, receipt, error) = match outcome {
        Ok(receipt) => (StatusCode::OK, Some(receipt), None),
        Err(e) => (status_for(&e), None, Some(e.to_string())),
    };
    (
        status,
        Json(ActionResponse {
            action: orch.action(),
            state: orch.state(),
            receipt,
            events: collected,
            error,
        }),
    )
        .into_response()
}

fn parse_account(raw: &str) -> Result<Address, LedgerError> {
    raw.parse()
        .map_err(|_| LedgerError::InvalidAccount(format!("{raw:?} is not an address")))
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /token`
///
/// Token name, symbol, decimals and the connected account's balance.
pub async fn get_token(State(state): State<Arc<ApiState>>) -> Response {
    let result = async {
        let session = state.session().await?;
        let token = session.token(&state.config.token_address)?;
        token.describe(session.account()).await
    }
    .await;
    match result {
        Ok(details) => (StatusCode::OK, Json(details)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /portfolio/:account`
pub async fn get_portfolio(
    State(state): State<Arc<ApiState>>,
    Path(account): Path<String>,
) -> Response {
    let result = async {
        let account = parse_account(&account)?;
        let session = state.session().await?;
        let escrow = session.escrow(&state.config.escrow_address)?;
        portfolio::get_portfolio(&escrow, account).await
    }
    .await;
    match result {
        Ok(p) => (StatusCode::OK, Json(p)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /deposits`
pub async fn post_deposit(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<DepositBody>,
) -> Response {
    let session = match state.session().await {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    let contracts = state.config.contracts();
    let (tx, rx) = mpsc::unbounded_channel();
    let notifier = (TracingNotifier, tx);

    let mut orch =
        TransactionOrchestrator::new(&session, &contracts, state.config.timeouts(), &notifier);
    let outcome = orch.deposit_funds(&body.amount, body.post_id).await;
    action_response(outcome, &orch, rx)
}

/// `POST /sales`
///
/// The deposit must appear in the caller's portfolio, on the requested post
/// and holding at least the requested amount, before a settlement is sent.
pub async fn post_sale(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SellRequest>,
) -> Response {
    let session = match state.session().await {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    let known = async {
        let escrow = session.escrow(&state.config.escrow_address)?;
        let held = portfolio::get_portfolio(&escrow, session.account()).await?;
        held.sellable(req.deposit_id, req.post_id, req.amount).map(|_| ())
    }
    .await;
    if let Err(e) = known {
        return error_response(e);
    }

    let contracts = state.config.contracts();
    let (tx, rx) = mpsc::unbounded_channel();
    let notifier = (TracingNotifier, tx);

    let mut orch =
        TransactionOrchestrator::new(&session, &contracts, state.config.timeouts(), &notifier);
    let outcome = orch.sell_funds(&req).await;
    action_response(outcome, &orch, rx)
}
