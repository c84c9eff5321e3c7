//! The wallet/provider boundary.
//!
//! Everything the ledger client needs from the outside world goes through
//! [`Chain`]: which account is connected, which network it is on, read-only
//! contract calls, and sending a transaction for the wallet to sign.

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::Serialize;

use crate::errors::Result;

/// A transaction handed to the wallet for signing and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    /// `true` when the transaction executed, `false` when it reverted.
    pub success: bool,
}

#[async_trait]
pub trait Chain: Send + Sync {
    /// Accounts the wallet currently exposes, preferred account first.
    async fn accounts(&self) -> Result<Vec<Address>>;

    /// Identifier of the network the wallet is connected to.
    async fn chain_id(&self) -> Result<u64>;

    /// Execute a read-only call against the latest confirmed state.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Ask the wallet to sign and broadcast `tx`; resolves to its hash.
    async fn send_transaction(&self, tx: TxRequest) -> Result<B256>;

    /// Receipt for `hash`, or `None` while it is still pending.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>>;
}
