//! Runs value-moving actions against the escrow contract.
//!
//! A deposit is two transactions: the token allowance grant for the escrow,
//! then the escrow deposit itself. The second is only sent once the first has
//! been mined successfully. A settlement moves funds out of escrow and needs
//! no allowance, so it is a single transaction.
//!
//! Every step is bounded twice: once while the wallet collects a signature
//! and once while the chain mines the transaction.

use std::future::Future;
use std::time::Duration;

use alloy_primitives::U256;
use serde::Deserialize;
use tracing::{error, info};

use crate::chain::TxReceipt;
use crate::contracts::{EngagementMetrics, PendingTx};
use crate::errors::{LedgerError, Result};
use crate::lifecycle::{Action, Lifecycle, LifecycleEvent, Notifier, Step, TxState};
use crate::session::Session;
use crate::units;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// How long the wallet may take to sign and broadcast.
    pub signature: Duration,
    /// How long a broadcast transaction may take to be mined.
    pub confirmation: Duration,
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            signature: Duration::from_secs(120),
            confirmation: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Where the token and escrow contracts live on the connected network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAddresses {
    pub token: String,
    pub escrow: String,
}

/// A request to liquidate a deposit.
///
/// `amount` is already in base units; unlike deposits, nothing here scales
/// a human-entered value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SellRequest {
    pub post_id: u64,
    pub deposit_id: u64,
    pub amount: U256,
    #[serde(flatten)]
    pub metrics: EngagementMetrics,
}

/// Drives one action at a time for a bound session.
///
/// An instance is meant for a single request. If an action's future is
/// dropped before it finishes, the instance stays in its in-flight state and
/// refuses further actions with `InvalidTransition`; build a new one instead.
pub struct TransactionOrchestrator<'a> {
    session: &'a Session,
    contracts: &'a ContractAddresses,
    timeouts: Timeouts,
    notifier: &'a dyn Notifier,
    lifecycle: Lifecycle,
}

impl<'a> TransactionOrchestrator<'a> {
    pub fn new(
        session: &'a Session,
        contracts: &'a ContractAddresses,
        timeouts: Timeouts,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            session,
            contracts,
            timeouts,
            notifier,
            lifecycle: Lifecycle::new(Action::Deposit),
        }
    }

    /// State of the most recent action.
    pub fn state(&self) -> TxState {
        self.lifecycle.state()
    }

    pub fn action(&self) -> Action {
        self.lifecycle.action()
    }

    /// Approve the escrow for `raw_amount` tokens, then deposit them against
    /// `post_id`.
    ///
    /// Input and session problems are reported before anything is sent and
    /// produce no notifications. Once the approval is pending, exactly one
    /// failure or one final success notification follows.
    pub async fn deposit_funds(&mut self, raw_amount: &str, post_id: u64) -> Result<TxReceipt> {
        self.lifecycle.restart(Action::Deposit)?;

        let token = self.session.token(&self.contracts.token)?;
        let escrow = self.session.escrow(&self.contracts.escrow)?;
        self.session.ensure_current().await?;

        let decimals = token.decimals().await?;
        let amount = units::to_base_units(raw_amount, decimals)?;
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount(format!(
                "{raw_amount} is less than one base unit"
            )));
        }
        info!(
            "Depositing {raw_amount} ({amount} base units) on post {post_id} from {}",
            self.session.account()
        );

        let ev = self.lifecycle.begin_approval()?;
        self.publish(&ev);
        match self
            .run_step(Step::Approval, token.approve(escrow.address(), amount))
            .await
        {
            Ok(receipt) => {
                info!("Allowance confirmed in {}", receipt.tx_hash);
                let ev = self.lifecycle.approval_confirmed()?;
                self.publish(&ev);
            }
            Err(e) => return Err(self.fail(step_error(Step::Approval, e))),
        }

        let ev = self.lifecycle.begin_submission()?;
        self.publish(&ev);
        match self
            .run_step(Step::Deposit, escrow.deposit_funds(amount, post_id))
            .await
        {
            Ok(receipt) => {
                let ev = self.lifecycle.submission_confirmed()?;
                self.publish(&ev);
                Ok(receipt)
            }
            Err(e) => Err(self.fail(step_error(Step::Deposit, e))),
        }
    }

    /// Settle deposit `deposit_id` on `post_id` using the reported engagement.
    pub async fn sell_funds(&mut self, req: &SellRequest) -> Result<TxReceipt> {
        self.lifecycle.restart(Action::Settlement)?;

        if req.amount.is_zero() {
            return Err(LedgerError::InvalidAmount(
                "settlement amount must be positive".to_string(),
            ));
        }
        let escrow = self.session.escrow(&self.contracts.escrow)?;
        self.session.ensure_current().await?;
        info!(
            "Selling deposit {} on post {} ({} base units, {:?})",
            req.deposit_id, req.post_id, req.amount, req.metrics
        );

        let ev = self.lifecycle.begin_submission()?;
        self.publish(&ev);
        match self
            .run_step(
                Step::Settlement,
                escrow.sell_funds(req.post_id, req.deposit_id, req.amount, req.metrics),
            )
            .await
        {
            Ok(receipt) => {
                let ev = self.lifecycle.submission_confirmed()?;
                self.publish(&ev);
                Ok(receipt)
            }
            Err(e) => Err(self.fail(step_error(Step::Settlement, e))),
        }
    }

    fn publish(&self, event: &LifecycleEvent) {
        self.notifier.notify(event);
    }

    /// Move to `Failed`, publish the failure and hand the error back.
    fn fail(&mut self, err: LedgerError) -> LedgerError {
        match self.lifecycle.fail(&err) {
            Ok(ev) => self.publish(&ev),
            Err(e) => error!("Could not record failure ({err}): {e}"),
        }
        err
    }

    /// Wait for the wallet to broadcast, then for the chain to mine.
    async fn run_step<'s, F>(&self, step: Step, send: F) -> Result<TxReceipt>
    where
        F: Future<Output = Result<PendingTx<'s>>>,
    {
        let pending = tokio::time::timeout(self.timeouts.signature, send)
            .await
            .map_err(|_| timed_out(format!("{step:?} signature"), self.timeouts.signature))??;
        info!("{step:?} transaction {} broadcast", pending.hash());

        tokio::time::timeout(
            self.timeouts.confirmation,
            pending.confirm(self.timeouts.poll_interval),
        )
        .await
        .map_err(|_| timed_out(format!("{step:?} confirmation"), self.timeouts.confirmation))?
    }
}

fn timed_out(waiting_for: String, after: Duration) -> LedgerError {
    LedgerError::ConfirmationTimeout {
        waiting_for,
        secs: after.as_secs(),
    }
}

/// Classify a step error; timeouts keep their own kind.
fn step_error(step: Step, e: LedgerError) -> LedgerError {
    if matches!(e, LedgerError::ConfirmationTimeout { .. }) {
        return e;
    }
    match step {
        Step::Approval => LedgerError::ApprovalFailed(e.reason()),
        Step::Deposit => LedgerError::DepositFailed(e.reason()),
        Step::Settlement => LedgerError::SettlementFailed(e.reason()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use alloy_sol_types::SolCall;

    use super::*;
    use crate::contracts::{IEscrow, IERC20};
    use crate::lifecycle::EventKind;
    use crate::mock::{MockChain, TxOutcome, ALICE, ESCROW, TOKEN};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<LifecycleEvent>>);

    impl Notifier for Recorder {
        fn notify(&self, event: &LifecycleEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<LifecycleEvent> {
            self.0.lock().unwrap().clone()
        }

        fn outcomes(&self) -> Vec<(Step, EventKind)> {
            self.events()
                .into_iter()
                .filter(|e| e.is_terminal())
                .map(|e| (e.step, e.kind))
                .collect()
        }
    }

    fn addresses() -> ContractAddresses {
        ContractAddresses {
            token: TOKEN.to_string(),
            escrow: ESCROW.to_string(),
        }
    }

    fn fast() -> Timeouts {
        Timeouts {
            signature: Duration::from_secs(5),
            confirmation: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }

    async fn bound(chain: &Arc<MockChain>) -> Session {
        Session::bind(chain.clone(), None).await.unwrap()
    }

    fn ten_tokens() -> U256 {
        U256::from(10u8) * U256::from(10u8).pow(U256::from(18u8))
    }

    #[tokio::test]
    async fn deposit_approves_then_deposits() {
        let chain = Arc::new(MockChain::new());
        let session = bound(&chain).await;
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        let receipt = orch.deposit_funds("10", 1).await.unwrap();
        assert!(receipt.success);
        assert_eq!(orch.state(), TxState::Confirmed);

        let sent = chain.sent();
        assert_eq!(sent.len(), 2);
        let approve = IERC20::approveCall::abi_decode(&sent[0].data, true).unwrap();
        assert_eq!(approve.amount, ten_tokens());
        assert_eq!(approve.spender, session.escrow(ESCROW).unwrap().address());
        assert_eq!(sent[0].from, ALICE);

        let deposit = IEscrow::depositFundsCall::abi_decode(&sent[1].data, true).unwrap();
        assert_eq!(deposit.amount, ten_tokens());
        assert_eq!(deposit.postId, U256::from(1u8));

        assert_eq!(
            recorder.outcomes(),
            vec![
                (Step::Approval, EventKind::Succeeded),
                (Step::Deposit, EventKind::Succeeded),
            ]
        );
        assert_eq!(recorder.events().len(), 4);
    }

    #[tokio::test]
    async fn reverted_approval_never_deposits() {
        let chain = Arc::new(MockChain::new());
        chain.script(IERC20::approveCall::SELECTOR, TxOutcome::Reverted);
        let session = bound(&chain).await;
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        let err = orch.deposit_funds("10", 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::ApprovalFailed(_)));
        assert_eq!(orch.state(), TxState::Failed);
        assert!(chain
            .sent_with(IEscrow::depositFundsCall::SELECTOR)
            .is_empty());
        assert_eq!(
            recorder.outcomes(),
            vec![(Step::Approval, EventKind::Failed)]
        );
    }

    #[tokio::test]
    async fn wallet_rejection_is_an_approval_failure() {
        let chain = Arc::new(MockChain::new());
        chain.script(IERC20::approveCall::SELECTOR, TxOutcome::Rejected);
        let session = bound(&chain).await;
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        let err = orch.deposit_funds("1.5", 9).await.unwrap_err();
        match err {
            LedgerError::ApprovalFailed(reason) => assert!(reason.contains("rejected")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(chain.sent().len(), 1);
        assert_eq!(recorder.outcomes().len(), 1);
    }

    #[tokio::test]
    async fn reverted_deposit_keeps_confirmed_approval() {
        let chain = Arc::new(MockChain::new());
        chain.script(IEscrow::depositFundsCall::SELECTOR, TxOutcome::Reverted);
        let session = bound(&chain).await;
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        let err = orch.deposit_funds("10", 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::DepositFailed(_)));
        assert_eq!(orch.state(), TxState::Failed);
        assert_eq!(
            recorder.outcomes(),
            vec![
                (Step::Approval, EventKind::Succeeded),
                (Step::Deposit, EventKind::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn retry_after_failure_starts_from_approval() {
        let chain = Arc::new(MockChain::new());
        chain.script(IEscrow::depositFundsCall::SELECTOR, TxOutcome::Reverted);
        let session = bound(&chain).await;
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        assert!(orch.deposit_funds("10", 1).await.is_err());
        orch.deposit_funds("10", 1).await.unwrap();
        assert_eq!(orch.state(), TxState::Confirmed);

        let selectors: Vec<[u8; 4]> = chain
            .sent()
            .iter()
            .map(|tx| tx.data[..4].try_into().unwrap())
            .collect();
        assert_eq!(
            selectors,
            vec![
                IERC20::approveCall::SELECTOR,
                IEscrow::depositFundsCall::SELECTOR,
                IERC20::approveCall::SELECTOR,
                IEscrow::depositFundsCall::SELECTOR,
            ]
        );
    }

    #[tokio::test]
    async fn invalid_amount_touches_nothing() {
        let chain = Arc::new(MockChain::new());
        let session = bound(&chain).await;
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        for bad in ["", "-3", "ten", "0"] {
            assert!(matches!(
                orch.deposit_funds(bad, 1).await,
                Err(LedgerError::InvalidAmount(_))
            ));
        }
        assert!(chain.sent().is_empty());
        assert!(recorder.events().is_empty());
        assert_eq!(orch.state(), TxState::Idle);
    }

    #[tokio::test]
    async fn stale_session_is_refused() {
        let chain = Arc::new(MockChain::new());
        let session = bound(&chain).await;
        chain.set_chain_id(5);
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        assert!(matches!(
            orch.deposit_funds("10", 1).await,
            Err(LedgerError::SessionChanged(_))
        ));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test]
    async fn malformed_contract_address_is_refused() {
        let chain = Arc::new(MockChain::new());
        let session = bound(&chain).await;
        let contracts = ContractAddresses {
            token: "not-an-address".to_string(),
            escrow: ESCROW.to_string(),
        };
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        assert!(matches!(
            orch.deposit_funds("10", 1).await,
            Err(LedgerError::InvalidContractDescriptor(_))
        ));
        assert!(chain.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unmined_approval_times_out() {
        let chain = Arc::new(MockChain::new());
        chain.script(IERC20::approveCall::SELECTOR, TxOutcome::Stalled);
        let session = bound(&chain).await;
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        let err = orch.deposit_funds("10", 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::ConfirmationTimeout { secs: 10, .. }));
        assert_eq!(orch.state(), TxState::Failed);
        assert!(chain
            .sent_with(IEscrow::depositFundsCall::SELECTOR)
            .is_empty());
        assert_eq!(
            recorder.outcomes(),
            vec![(Step::Approval, EventKind::Failed)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_action_blocks_the_instance() {
        let chain = Arc::new(MockChain::new());
        chain.script(IERC20::approveCall::SELECTOR, TxOutcome::Stalled);
        let session = bound(&chain).await;
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), orch.deposit_funds("10", 1)).await;
        assert!(abandoned.is_err());
        assert_eq!(orch.state(), TxState::Approving);

        assert!(matches!(
            orch.deposit_funds("10", 1).await,
            Err(LedgerError::InvalidTransition {
                from: TxState::Approving,
                to: TxState::Idle
            })
        ));
        assert_eq!(chain.sent().len(), 1);

        let mut fresh = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);
        fresh.deposit_funds("10", 1).await.unwrap();
        assert_eq!(fresh.state(), TxState::Confirmed);
        assert_eq!(fresh.action(), Action::Deposit);
    }

    #[tokio::test]
    async fn sell_submits_settlement_without_approval() {
        let chain = Arc::new(MockChain::new());
        let session = bound(&chain).await;
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        let req = SellRequest {
            post_id: 4,
            deposit_id: 0,
            amount: ten_tokens(),
            metrics: EngagementMetrics {
                likes: 120,
                views: 4_000,
                shares: 7,
                followers: 950,
            },
        };
        orch.sell_funds(&req).await.unwrap();
        assert_eq!(orch.state(), TxState::Confirmed);

        let sent = chain.sent();
        assert_eq!(sent.len(), 1);
        let call = IEscrow::sellFundsCall::abi_decode(&sent[0].data, true).unwrap();
        assert_eq!(call.postId, U256::from(4u8));
        assert_eq!(call.depositId, U256::ZERO);
        assert_eq!(call.amount, ten_tokens());
        assert_eq!(call.likes, U256::from(120u8));
        assert_eq!(call.views, U256::from(4_000u16));
        assert_eq!(call.shares, U256::from(7u8));
        assert_eq!(call.followers, U256::from(950u16));
        assert_eq!(
            recorder.outcomes(),
            vec![(Step::Settlement, EventKind::Succeeded)]
        );
    }

    #[tokio::test]
    async fn reverted_settlement_is_reported() {
        let chain = Arc::new(MockChain::new());
        chain.script(IEscrow::sellFundsCall::SELECTOR, TxOutcome::Reverted);
        let session = bound(&chain).await;
        let contracts = addresses();
        let recorder = Recorder::default();
        let mut orch = TransactionOrchestrator::new(&session, &contracts, fast(), &recorder);

        let req = SellRequest {
            post_id: 4,
            deposit_id: 2,
            amount: U256::from(1u8),
            metrics: EngagementMetrics::default(),
        };
        assert!(matches!(
            orch.sell_funds(&req).await,
            Err(LedgerError::SettlementFailed(_))
        ));
        assert_eq!(orch.state(), TxState::Failed);
        assert_eq!(
            recorder.outcomes(),
            vec![(Step::Settlement, EventKind::Failed)]
        );
    }
}
