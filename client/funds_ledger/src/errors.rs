//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("No signer: no wallet account is connected")]
    NoSigner,

    #[error("Invalid contract descriptor: {0}")]
    InvalidContractDescriptor(String),

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Session changed: {0}")]
    SessionChanged(String),

    #[error("Approval failed: {0}")]
    ApprovalFailed(String),

    #[error("Deposit failed: {0}")]
    DepositFailed(String),

    #[error("Settlement failed: {0}")]
    SettlementFailed(String),

    #[error("No deposits recorded for {0}")]
    NoDeposits(String),

    #[error("Timed out after {secs}s waiting for {waiting_for}")]
    ConfirmationTimeout { waiting_for: String, secs: u64 },

    #[error("Invalid lifecycle transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::lifecycle::TxState,
        to: crate::lifecycle::TxState,
    },

    #[error("Transaction {0} reverted")]
    Reverted(String),

    #[error("Wallet rejected the request: {0}")]
    WalletRejected(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<alloy_sol_types::Error> for LedgerError {
    fn from(e: alloy_sol_types::Error) -> Self {
        LedgerError::Decode(e.to_string())
    }
}

impl LedgerError {
    /// Detail carried into a step-level failure (`ApprovalFailed`, ...).
    pub fn reason(&self) -> String {
        match self {
            LedgerError::WalletRejected(msg) => format!("rejected in wallet: {msg}"),
            LedgerError::Reverted(tx) => format!("transaction {tx} reverted"),
            LedgerError::Rpc { code, message } => format!("rpc error {code}: {message}"),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
