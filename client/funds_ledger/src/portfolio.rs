//! Reconstructs a user's portfolio from the escrow contract's deposit list.

use alloy_primitives::{Address, U256};
use chrono::DateTime;
use serde::Serialize;
use tracing::debug;

use crate::contracts::{EscrowHandle, RawDeposit};
use crate::errors::{LedgerError, Result};
use crate::units;

/// Precision of the deposited token. Deposits are always scaled with this,
/// never with a freshly queried value.
pub const PORTFOLIO_DECIMALS: u8 = 18;

const START_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositRecord {
    pub post_id: u64,
    /// Position in the account's on-chain deposit list.
    pub deposit_id: u64,
    /// Normalized decimal string.
    pub amount: String,
    #[serde(skip)]
    pub amount_base_units: U256,
    pub start_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    /// Sum of every deposit, normalized.
    pub invested_amount: String,
    #[serde(skip)]
    pub invested_base_units: U256,
    /// Post of the first deposit. Only meaningful for single-post portfolios.
    pub post_id: Option<u64>,
    pub invest_array: Vec<DepositRecord>,
}

impl Portfolio {
    pub fn is_empty(&self) -> bool {
        self.invest_array.is_empty()
    }

    /// Look up a deposit by its identifier.
    pub fn deposit(&self, deposit_id: u64) -> Result<&DepositRecord> {
        self.invest_array
            .iter()
            .find(|d| d.deposit_id == deposit_id)
            .ok_or_else(|| LedgerError::NoDeposits(format!("deposit {deposit_id}")))
    }

    /// The deposit a sale of `amount` base units against `post_id` would draw
    /// from. The deposit must belong to that post and hold at least `amount`.
    pub fn sellable(
        &self,
        deposit_id: u64,
        post_id: u64,
        amount: U256,
    ) -> Result<&DepositRecord> {
        let record = self.deposit(deposit_id)?;
        if record.post_id != post_id {
            return Err(LedgerError::NoDeposits(format!(
                "deposit {deposit_id} on post {post_id}"
            )));
        }
        if amount > record.amount_base_units {
            return Err(LedgerError::InvalidAmount(format!(
                "{amount} exceeds the {} base units held in deposit {deposit_id}",
                record.amount_base_units
            )));
        }
        Ok(record)
    }
}

/// Fetch and project the deposits of `account`. An account with no deposits
/// yields an empty portfolio with a zero total.
pub async fn get_portfolio(escrow: &EscrowHandle<'_>, account: Address) -> Result<Portfolio> {
    let raw = escrow.get_user_deposits(account).await?;
    debug!("{account} has {} deposits", raw.len());
    build_portfolio(raw)
}

/// Project raw deposits, preserving on-chain order.
pub fn build_portfolio(raw: Vec<RawDeposit>) -> Result<Portfolio> {
    let mut invested = U256::ZERO;
    let mut records = Vec::with_capacity(raw.len());

    for (index, deposit) in raw.into_iter().enumerate() {
        invested = invested.checked_add(deposit.amount).ok_or_else(|| {
            LedgerError::Decode("total deposited amount overflows 256 bits".to_string())
        })?;
        records.push(DepositRecord {
            post_id: deposit.post_id,
            deposit_id: index as u64,
            amount: units::from_base_units(deposit.amount, PORTFOLIO_DECIMALS),
            amount_base_units: deposit.amount,
            start_date: format_start_date(deposit.start_date)?,
        });
    }

    Ok(Portfolio {
        invested_amount: units::from_base_units(invested, PORTFOLIO_DECIMALS),
        invested_base_units: invested,
        post_id: records.first().map(|r| r.post_id),
        invest_array: records,
    })
}

fn format_start_date(unix_secs: i64) -> Result<String> {
    DateTime::from_timestamp(unix_secs, 0)
        .map(|dt| dt.format(START_DATE_FORMAT).to_string())
        .ok_or_else(|| LedgerError::Decode(format!("startDate is not a valid time: {unix_secs}")))
}
