//! Application configuration loaded from environment variables.

use std::time::Duration;

use alloy_primitives::Address;

use crate::errors::{LedgerError, Result};
use crate::orchestrator::{ContractAddresses, Timeouts};
use crate::session::parse_contract_address;

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint of the wallet/provider (e.g. http://127.0.0.1:8545)
    pub rpc_url: String,
    /// ERC-20 token deposited into the escrow
    pub token_address: String,
    /// Escrow contract holding deposits per post
    pub escrow_address: String,
    /// Account to sign with; the wallet's preferred account when unset
    pub account: Option<Address>,
    /// Port for the REST API server
    pub api_port: u16,
    /// Per-request HTTP timeout towards the provider
    pub request_timeout_secs: u64,
    /// Attempts for a read call before giving up
    pub rpc_max_retries: u32,
    /// How long the wallet may take to sign a transaction
    pub signature_timeout_secs: u64,
    /// How long a sent transaction may take to be mined
    pub confirmation_timeout_secs: u64,
    /// Delay between receipt polls
    pub receipt_poll_interval_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` reads the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            get(key).ok_or_else(|| {
                LedgerError::Config(format!("{key} environment variable is required"))
            })
        };
        let parsed = |key: &str, default: &str| -> Result<u64> {
            get(key)
                .unwrap_or_else(|| default.to_string())
                .parse()
                .map_err(|_| LedgerError::Config(format!("Invalid {key}")))
        };

        let token_address = required("TOKEN_ADDRESS")?;
        parse_contract_address(&token_address)
            .map_err(|e| LedgerError::Config(format!("Invalid TOKEN_ADDRESS: {e}")))?;
        let escrow_address = required("ESCROW_ADDRESS")?;
        parse_contract_address(&escrow_address)
            .map_err(|e| LedgerError::Config(format!("Invalid ESCROW_ADDRESS: {e}")))?;

        let account = get("ACCOUNT")
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<Address>()
                    .map_err(|_| LedgerError::Config("Invalid ACCOUNT".to_string()))
            })
            .transpose()?;

        Ok(Config {
            rpc_url: get("RPC_URL").unwrap_or_else(|| "http://127.0.0.1:8545".to_string()),
            token_address,
            escrow_address,
            account,
            api_port: u16::try_from(parsed("API_PORT", "3002")?)
                .map_err(|_| LedgerError::Config("Invalid API_PORT".to_string()))?,
            request_timeout_secs: parsed("REQUEST_TIMEOUT_SECS", "30")?,
            rpc_max_retries: u32::try_from(parsed("RPC_MAX_RETRIES", "5")?)
                .map_err(|_| LedgerError::Config("Invalid RPC_MAX_RETRIES".to_string()))?,
            signature_timeout_secs: parsed("SIGNATURE_TIMEOUT_SECS", "120")?,
            confirmation_timeout_secs: parsed("CONFIRMATION_TIMEOUT_SECS", "300")?,
            receipt_poll_interval_ms: parsed("RECEIPT_POLL_INTERVAL_MS", "1000")?,
        })
    }

    pub fn contracts(&self) -> ContractAddresses {
        ContractAddresses {
            token: self.token_address.clone(),
            escrow: self.escrow_address.clone(),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            signature: Duration::from_secs(self.signature_timeout_secs),
            confirmation: Duration::from_secs(self.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.receipt_poll_interval_ms),
        }
    }
}
