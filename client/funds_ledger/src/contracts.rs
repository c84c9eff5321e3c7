//! Typed bindings for the token and escrow contracts.
//!
//! Call data is built from the `sol!` declarations below. Every value that
//! comes back from the chain is ABI-decoded with validation before anything
//! else looks at it.

use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall};
use serde::Serialize;
use tracing::debug;

use crate::chain::{TxReceipt, TxRequest};
use crate::errors::{LedgerError, Result};
use crate::session::Session;
use crate::units;

sol! {
    #[sol(all_derives)]
    interface IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address owner) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    #[sol(all_derives)]
    interface IEscrow {
        struct Deposit {
            uint256 postId;
            uint256 amount;
            uint256 startDate;
        }

        function depositFunds(uint256 amount, uint256 postId) external;
        function sellFunds(
            uint256 postId,
            uint256 depositId,
            uint256 amount,
            uint256 likes,
            uint256 views,
            uint256 shares,
            uint256 followers
        ) external;
        function getUserDeposits(address user) external view returns (Deposit[] memory);
    }
}

// ─────────────────────────────────────────────────────────
// Shared plumbing
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ContractHandle<'s> {
    session: &'s Session,
    address: Address,
}

impl<'s> ContractHandle<'s> {
    async fn read<C: SolCall>(&self, call: C) -> Result<C::Return> {
        let out = self
            .session
            .provider()
            .call(self.address, Bytes::from(call.abi_encode()))
            .await?;
        debug!("{} on {} returned {} bytes", C::SIGNATURE, self.address, out.len());
        Ok(C::abi_decode_returns(&out, true)?)
    }

    async fn send<C: SolCall>(&self, call: C) -> Result<PendingTx<'s>> {
        let tx = TxRequest {
            from: self.session.account(),
            to: self.address,
            data: Bytes::from(call.abi_encode()),
        };
        let hash = self.session.provider().send_transaction(tx).await?;
        debug!("{} sent to {} as {hash}", C::SIGNATURE, self.address);
        Ok(PendingTx {
            session: self.session,
            hash,
        })
    }
}

/// A transaction the wallet has broadcast but the chain has not yet mined.
#[derive(Debug)]
pub struct PendingTx<'s> {
    session: &'s Session,
    hash: B256,
}

impl PendingTx<'_> {
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// Poll for the receipt every `poll_interval` until the transaction is
    /// mined. A reverted transaction is an error. This never gives up on its
    /// own; callers bound it with a timeout.
    pub async fn confirm(self, poll_interval: Duration) -> Result<TxReceipt> {
        loop {
            if let Some(receipt) = self
                .session
                .provider()
                .transaction_receipt(self.hash)
                .await?
            {
                if !receipt.success {
                    return Err(LedgerError::Reverted(self.hash.to_string()));
                }
                return Ok(receipt);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

// ─────────────────────────────────────────────────────────
// Token
// ─────────────────────────────────────────────────────────

/// Name, symbol, precision and the connected account's balance, read fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenDescriptor {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Normalized decimal string.
    pub balance: String,
    /// Balance in whole tokens, fraction dropped.
    pub whole_balance: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenHandle<'s>(ContractHandle<'s>);

impl<'s> TokenHandle<'s> {
    pub(crate) fn new(session: &'s Session, address: Address) -> Self {
        Self(ContractHandle { session, address })
    }

    pub fn address(&self) -> Address {
        self.0.address
    }

    /// Token precision; rejects values whose scale does not fit in 256 bits.
    pub async fn decimals(&self) -> Result<u8> {
        let decimals = self.0.read(IERC20::decimalsCall {}).await?._0;
        if units::scale(decimals).is_none() {
            return Err(LedgerError::Decode(format!(
                "token reports unsupported decimals: {decimals}"
            )));
        }
        Ok(decimals)
    }

    pub async fn name(&self) -> Result<String> {
        Ok(self.0.read(IERC20::nameCall {}).await?._0)
    }

    pub async fn symbol(&self) -> Result<String> {
        Ok(self.0.read(IERC20::symbolCall {}).await?._0)
    }

    pub async fn balance_of(&self, owner: Address) -> Result<U256> {
        Ok(self.0.read(IERC20::balanceOfCall { owner }).await?._0)
    }

    /// Let `spender` pull up to `amount` base units. Overwrites any previous
    /// allowance rather than adding to it.
    pub async fn approve(&self, spender: Address, amount: U256) -> Result<PendingTx<'s>> {
        self.0.send(IERC20::approveCall { spender, amount }).await
    }

    pub async fn describe(&self, account: Address) -> Result<TokenDescriptor> {
        let (name, symbol, decimals, raw_balance) = tokio::try_join!(
            self.name(),
            self.symbol(),
            self.decimals(),
            self.balance_of(account),
        )?;
        Ok(TokenDescriptor {
            name,
            symbol,
            decimals,
            balance: units::from_base_units(raw_balance, decimals),
            whole_balance: units::whole_units(raw_balance, decimals).to_string(),
        })
    }
}

// ─────────────────────────────────────────────────────────
// Escrow
// ─────────────────────────────────────────────────────────

/// A deposit as the escrow contract reports it, after range checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDeposit {
    pub post_id: u64,
    pub amount: U256,
    /// Unix seconds.
    pub start_date: i64,
}

impl TryFrom<IEscrow::Deposit> for RawDeposit {
    type Error = LedgerError;

    fn try_from(d: IEscrow::Deposit) -> Result<Self> {
        let post_id = u64::try_from(d.postId)
            .map_err(|_| LedgerError::Decode(format!("postId out of range: {}", d.postId)))?;
        let start_date = i64::try_from(d.startDate)
            .map_err(|_| LedgerError::Decode(format!("startDate out of range: {}", d.startDate)))?;
        Ok(RawDeposit {
            post_id,
            amount: d.amount,
            start_date,
        })
    }
}

/// Engagement figures reported for a post when a deposit is settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct EngagementMetrics {
    pub likes: u64,
    pub views: u64,
    pub shares: u64,
    pub followers: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct EscrowHandle<'s>(ContractHandle<'s>);

impl<'s> EscrowHandle<'s> {
    pub(crate) fn new(session: &'s Session, address: Address) -> Self {
        Self(ContractHandle { session, address })
    }

    pub fn address(&self) -> Address {
        self.0.address
    }

    pub async fn deposit_funds(&self, amount: U256, post_id: u64) -> Result<PendingTx<'s>> {
        self.0
            .send(IEscrow::depositFundsCall {
                amount,
                postId: U256::from(post_id),
            })
            .await
    }

    pub async fn sell_funds(
        &self,
        post_id: u64,
        deposit_id: u64,
        amount: U256,
        metrics: EngagementMetrics,
    ) -> Result<PendingTx<'s>> {
        self.0
            .send(IEscrow::sellFundsCall {
                postId: U256::from(post_id),
                depositId: U256::from(deposit_id),
                amount,
                likes: U256::from(metrics.likes),
                views: U256::from(metrics.views),
                shares: U256::from(metrics.shares),
                followers: U256::from(metrics.followers),
            })
            .await
    }

    /// Deposits held by `user`, in on-chain order.
    pub async fn get_user_deposits(&self, user: Address) -> Result<Vec<RawDeposit>> {
        self.0
            .read(IEscrow::getUserDepositsCall { user })
            .await?
            ._0
            .into_iter()
            .map(RawDeposit::try_from)
            .collect()
    }
}
