//! JSON-RPC provider client. Talks to the wallet/node over HTTP.
//!
//! ## Resilience
//!
//! * Reads are retried with exponential back-off when the RPC returns a soft
//!   error or rate-limit response, up to [`MAX_BACKOFF_SECS`] seconds between
//!   attempts and `max_retries` attempts in total.
//! * `eth_sendTransaction` is sent exactly once. A failed submission is
//!   reported to the caller, who decides whether to start the action over.

use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::chain::{Chain, TxReceipt, TxRequest};
use crate::errors::{LedgerError, Result};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;

/// `eth_sendTransaction` waits on the user; the signature timeout configured
/// on the orchestrator is the real bound.
const SEND_REQUEST_TIMEOUT: Duration = Duration::from_secs(3600);

/// EIP-1193: the user rejected the request in the wallet.
const USER_REJECTED: i64 = 4001;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Value,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    /// Errors that will not go away by asking again.
    fn is_hard(&self) -> bool {
        matches!(
            self.code,
            -32600 | -32601 | -32602 | 3 | USER_REJECTED | 4100 | 4200 | 4900 | 4901
        ) || self.message.contains("execution reverted")
    }

    fn into_error(self) -> LedgerError {
        if self.code == USER_REJECTED {
            LedgerError::WalletRejected(self.message)
        } else {
            LedgerError::Rpc {
                code: self.code,
                message: self.message,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReceipt {
    pub transaction_hash: B256,
    pub block_number: Option<String>,
    pub gas_used: Option<String>,
    pub status: Option<String>,
}

impl RawReceipt {
    fn into_receipt(self) -> Result<TxReceipt> {
        let status = self
            .status
            .as_deref()
            .ok_or_else(|| LedgerError::Decode("receipt has no status field".to_string()))?;
        Ok(TxReceipt {
            tx_hash: self.transaction_hash,
            block_number: self.block_number.as_deref().map(parse_quantity).transpose()?,
            gas_used: self.gas_used.as_deref().map(parse_quantity).transpose()?,
            success: parse_quantity(status)? == 1,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RpcProvider {
    client: Client,
    url: String,
    max_retries: u32,
}

impl RpcProvider {
    pub fn new(client: Client, url: impl Into<String>, max_retries: u32) -> Self {
        Self {
            client,
            url: url.into(),
            max_retries: max_retries.max(1),
        }
    }

    /// Send one request and return the raw `result` value.
    async fn request_once(
        &self,
        method: &str,
        params: &Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        debug!("rpc -> {method} {params}");
        let mut req = self.client.post(&self.url);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let resp = req
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: RpcResponse = resp.json().await?;
        if let Some(err) = body.error {
            return Err(err.into_error());
        }
        Ok(body.result)
    }

    /// Read request with back-off on transient failures.
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempt = 1;

        loop {
            match self.request_once(method, &params, None).await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    warn!(
                        "{method} failed (attempt {attempt}/{}, will retry in {backoff}s): {e}",
                        self.max_retries
                    );
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_transient(e: &LedgerError) -> bool {
    match e {
        LedgerError::Http(err) => {
            err.is_connect()
                || err.is_timeout()
                || err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS)
        }
        LedgerError::Rpc { code, message } => !RpcError {
            code: *code,
            message: message.clone(),
        }
        .is_hard(),
        _ => false,
    }
}

#[async_trait]
impl Chain for RpcProvider {
    async fn accounts(&self) -> Result<Vec<Address>> {
        let v = self.request("eth_accounts", json!([])).await?;
        Ok(serde_json::from_value(v)?)
    }

    async fn chain_id(&self) -> Result<u64> {
        let v = self.request("eth_chainId", json!([])).await?;
        parse_quantity(v.as_str().unwrap_or_default())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let v = self
            .request("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        parse_bytes(v.as_str().unwrap_or_default())
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<B256> {
        let v = self
            .request_once(
                "eth_sendTransaction",
                &build_tx_params(&tx),
                Some(SEND_REQUEST_TIMEOUT),
            )
            .await?;
        Ok(serde_json::from_value(v)?)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>> {
        let v = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        let raw: RawReceipt = serde_json::from_value(v)?;
        raw.into_receipt().map(Some)
    }
}

fn build_tx_params(tx: &TxRequest) -> Value {
    json!([{
        "from": tx.from,
        "to": tx.to,
        "data": tx.data,
    }])
}

// ─────────────────────────────────────────────────────────
// Hex helpers
// ─────────────────────────────────────────────────────────

/// Parse a JSON-RPC quantity (`"0x1a"`).
pub fn parse_quantity(s: &str) -> Result<u64> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::Decode(format!("quantity without 0x prefix: {s:?}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|_| LedgerError::Decode(format!("invalid quantity: {s:?}")))
}

/// Parse JSON-RPC data (`"0x…"`); an empty result (`"0x"`) is empty bytes.
pub fn parse_bytes(s: &str) -> Result<Bytes> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::Decode(format!("data without 0x prefix: {s:?}")))?;
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| LedgerError::Decode(format!("invalid hex data: {e}")))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
