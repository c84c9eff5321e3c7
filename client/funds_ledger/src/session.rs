//! A signer bound to the connected account and network.
//!
//! The shell builds a new [`Session`] whenever the wallet reports a different
//! account or network. Contract handles borrow the session they came from, so
//! a handle can never be used with a signer other than the one it was built
//! for.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::Address;
use tracing::info;

use crate::chain::Chain;
use crate::contracts::{EscrowHandle, TokenHandle};
use crate::errors::{LedgerError, Result};

#[derive(Clone)]
pub struct Session {
    provider: Arc<dyn Chain>,
    account: Address,
    chain_id: u64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Bind to `account`, or to the wallet's preferred account when `None`.
    ///
    /// Fails with [`LedgerError::NoSigner`] when the wallet exposes no
    /// account, or not the requested one.
    pub async fn bind(provider: Arc<dyn Chain>, account: Option<Address>) -> Result<Self> {
        let accounts = provider.accounts().await?;
        let account = match account {
            Some(wanted) if accounts.contains(&wanted) => wanted,
            Some(_) => return Err(LedgerError::NoSigner),
            None => *accounts.first().ok_or(LedgerError::NoSigner)?,
        };
        let chain_id = provider.chain_id().await?;

        info!("Session bound to {account} on chain {chain_id}");
        Ok(Self {
            provider,
            account,
            chain_id,
        })
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn provider(&self) -> &dyn Chain {
        self.provider.as_ref()
    }

    /// Handle on the token contract at `address`. No network call.
    pub fn token(&self, address: &str) -> Result<TokenHandle<'_>> {
        Ok(TokenHandle::new(self, parse_contract_address(address)?))
    }

    /// Handle on the escrow contract at `address`. No network call.
    pub fn escrow(&self, address: &str) -> Result<EscrowHandle<'_>> {
        Ok(EscrowHandle::new(self, parse_contract_address(address)?))
    }

    /// Fail with [`LedgerError::SessionChanged`] if the wallet has switched
    /// account or network since this session was bound.
    pub async fn ensure_current(&self) -> Result<()> {
        let accounts = self.provider.accounts().await?;
        if !accounts.contains(&self.account) {
            return Err(LedgerError::SessionChanged(format!(
                "account {} is no longer connected",
                self.account
            )));
        }
        let chain_id = self.provider.chain_id().await?;
        if chain_id != self.chain_id {
            return Err(LedgerError::SessionChanged(format!(
                "network switched from {} to {chain_id}",
                self.chain_id
            )));
        }
        Ok(())
    }
}

/// Parse a `0x`-prefixed, 20-byte contract address. The zero address is
/// rejected since no contract lives there.
pub fn parse_contract_address(s: &str) -> Result<Address> {
    let s = s.trim();
    let digits = s.strip_prefix("0x").unwrap_or("");
    if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(LedgerError::InvalidContractDescriptor(format!(
            "malformed contract address: {s:?}"
        )));
    }
    let address: Address = s
        .parse()
        .map_err(|_| LedgerError::InvalidContractDescriptor(format!("bad address: {s:?}")))?;
    if address.is_zero() {
        return Err(LedgerError::InvalidContractDescriptor(
            "contract address is the zero address".to_string(),
        ));
    }
    Ok(address)
}
