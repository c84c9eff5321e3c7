//! In-memory [`Chain`] for tests: answers token/escrow reads, records every
//! transaction request, and mines (or reverts, rejects, stalls) them on
//! command.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;

use crate::chain::{Chain, TxReceipt, TxRequest};
use crate::contracts::{IEscrow, IERC20};
use crate::errors::{LedgerError, Result};

pub const ALICE: Address = Address::new([0xa1; 20]);
pub const BOB: Address = Address::new([0xb0; 20]);
pub const TOKEN: &str = "0x7070707070707070707070707070707070707070";
pub const ESCROW: &str = "0xe5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5";

const ONE_TOKEN: u128 = 1_000_000_000_000_000_000;

/// What happens to the next transaction sent with a given selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Mined,
    Reverted,
    /// The user declines in the wallet; nothing is broadcast.
    Rejected,
    /// Broadcast but never mined.
    Stalled,
}

struct State {
    accounts: Vec<Address>,
    chain_id: u64,
    decimals: u8,
    balance: U256,
    deposits: Vec<IEscrow::Deposit>,
    corrupt_reads: bool,
    scripted: HashMap<[u8; 4], VecDeque<TxOutcome>>,
    requests: Vec<TxRequest>,
    mined: HashMap<B256, TxOutcome>,
}

pub struct MockChain {
    state: Mutex<State>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                accounts: vec![ALICE, BOB],
                chain_id: 31337,
                decimals: 18,
                balance: U256::from(100 * ONE_TOKEN),
                deposits: Vec::new(),
                corrupt_reads: false,
                scripted: HashMap::new(),
                requests: Vec::new(),
                mined: HashMap::new(),
            }),
        }
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().unwrap().accounts = accounts;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().unwrap().chain_id = chain_id;
    }

    pub fn set_decimals(&self, decimals: u8) {
        self.state.lock().unwrap().decimals = decimals;
    }

    pub fn set_balance(&self, balance: U256) {
        self.state.lock().unwrap().balance = balance;
    }

    /// Record a deposit with `amount` in base units.
    pub fn add_deposit(&self, post_id: u64, amount: U256, start_date: u64) {
        self.state.lock().unwrap().deposits.push(IEscrow::Deposit {
            postId: U256::from(post_id),
            amount,
            startDate: U256::from(start_date),
        });
    }

    pub fn corrupt_reads(&self) {
        self.state.lock().unwrap().corrupt_reads = true;
    }

    /// Queue the outcome of the next transaction calling `selector`.
    /// Unscripted transactions are mined successfully.
    pub fn script(&self, selector: [u8; 4], outcome: TxOutcome) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(selector)
            .or_default()
            .push_back(outcome);
    }

    /// Every transaction the client asked the wallet to send, including
    /// rejected ones.
    pub fn sent(&self) -> Vec<TxRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn sent_with(&self, selector: [u8; 4]) -> Vec<TxRequest> {
        self.sent()
            .into_iter()
            .filter(|tx| tx.data.starts_with(&selector))
            .collect()
    }
}

fn selector(data: &[u8]) -> [u8; 4] {
    let mut sel = [0u8; 4];
    if data.len() >= 4 {
        sel.copy_from_slice(&data[..4]);
    }
    sel
}

#[async_trait]
impl Chain for MockChain {
    async fn accounts(&self) -> Result<Vec<Address>> {
        Ok(self.state.lock().unwrap().accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().chain_id)
    }

    async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes> {
        let state = self.state.lock().unwrap();
        if state.corrupt_reads {
            return Ok(Bytes::from(vec![0x01, 0x02, 0x03]));
        }
        let sel = selector(&data);
        let out = if sel == IERC20::nameCall::SELECTOR {
            IERC20::nameCall::abi_encode_returns(&("Dego Token".to_string(),))
        } else if sel == IERC20::symbolCall::SELECTOR {
            IERC20::symbolCall::abi_encode_returns(&("DEGO".to_string(),))
        } else if sel == IERC20::decimalsCall::SELECTOR {
            IERC20::decimalsCall::abi_encode_returns(&(state.decimals,))
        } else if sel == IERC20::balanceOfCall::SELECTOR {
            IERC20::balanceOfCall::abi_encode_returns(&(state.balance,))
        } else if sel == IEscrow::getUserDepositsCall::SELECTOR {
            IEscrow::getUserDepositsCall::abi_encode_returns(&(state.deposits.clone(),))
        } else {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: format!("execution reverted: unknown selector 0x{}", hex::encode(sel)),
            });
        };
        Ok(Bytes::from(out))
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<B256> {
        let mut state = self.state.lock().unwrap();
        let outcome = state
            .scripted
            .get_mut(&selector(&tx.data))
            .and_then(VecDeque::pop_front)
            .unwrap_or(TxOutcome::Mined);
        state.requests.push(tx);

        if outcome == TxOutcome::Rejected {
            return Err(LedgerError::WalletRejected(
                "User denied transaction signature".to_string(),
            ));
        }
        let hash = B256::with_last_byte(state.requests.len() as u8);
        state.mined.insert(hash, outcome);
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>> {
        let state = self.state.lock().unwrap();
        let receipt = |success| TxReceipt {
            tx_hash: hash,
            block_number: Some(state.requests.len() as u64),
            gas_used: Some(21_000),
            success,
        };
        Ok(match state.mined.get(&hash) {
            Some(TxOutcome::Mined) => Some(receipt(true)),
            Some(TxOutcome::Reverted) => Some(receipt(false)),
            _ => None,
        })
    }
}
