//! Settlement action coordinator.
//!
//! Two kinds of user actions flow through here:
//! - quote decisions (accept / reject), forwarded to the marketplace
//! - on-chain actions against the RFQ's escrow vault, driven through
//!   `TxState` and published on a watch channel
//!
//! Both take a `Confirmed<T>`; the coordinator never prompts. At most one
//! quote action per RFQ and one transaction per wallet are outstanding at a
//! time. Successful actions ask the poller for an immediate refresh.

pub mod intent;

pub use intent::{Confirmed, OnChainAction, QuoteAction, TransactionIntent, TxState};

use crate::lifecycle::{PollState, RefreshHandle};
use crate::onchain::{ContractCall, ReceiptStatus, Wallet, WalletError};
use crate::store::{DocumentStore, QuoteDecision, StoreError};
use alloy::primitives::TxHash;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Lowercased fragments that identify a gas estimation refusal.
const ESTIMATION_SIGNATURES: &[&str] = &[
    "action=\"estimategas\"",
    "gas required exceeds allowance",
    "cannot estimate gas",
];

const USER_REJECTION_SIGNATURES: &[&str] = &["user rejected", "user denied", "rejected by user"];

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("an action for {subject} is already in progress")]
    ActionConflict { subject: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("quote action for {rfq_id} was not applied: {reason}")]
    QuoteNotApplied { rfq_id: String, reason: String },
    #[error("RFQ {rfq_id} is not ready: {reason}")]
    NotReady { rfq_id: String, reason: String },
    #[error("transaction rejected in wallet")]
    WalletRejection,
    #[error("not authorized / not whitelisted: {0}")]
    EstimationFailure(String),
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: TxHash },
    #[error("no receipt for {tx_hash} before timeout")]
    ReceiptTimeout { tx_hash: TxHash },
    #[error("wallet error: {0}")]
    Wallet(String),
}

impl SettlementError {
    /// The state a transaction ends in when it fails with this error.
    pub fn terminal_state(&self) -> TxState {
        match self {
            SettlementError::WalletRejection | SettlementError::EstimationFailure(_) => {
                TxState::Rejected
            }
            _ => TxState::Failed,
        }
    }

    /// A user cancel, surfaced quietly rather than as an error banner.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SettlementError::WalletRejection)
    }

    pub fn user_message(&self) -> String {
        match self {
            SettlementError::EstimationFailure(_) => {
                "Transaction not authorized: this wallet is not whitelisted for the escrow vault."
                    .to_string()
            }
            SettlementError::WalletRejection => "Transaction cancelled.".to_string(),
            SettlementError::ActionConflict { .. } => {
                "Another action is still in progress. Wait for it to finish.".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub fn classify_wallet_error(err: WalletError) -> SettlementError {
    match err {
        WalletError::UserRejected => SettlementError::WalletRejection,
        WalletError::Estimation(msg) => SettlementError::EstimationFailure(msg),
        WalletError::Rpc(msg) | WalletError::Config(msg) => {
            let lower = msg.to_lowercase();
            if USER_REJECTION_SIGNATURES.iter().any(|s| lower.contains(s)) {
                SettlementError::WalletRejection
            } else if ESTIMATION_SIGNATURES.iter().any(|s| lower.contains(s)) {
                SettlementError::EstimationFailure(msg)
            } else {
                SettlementError::Wallet(msg)
            }
        }
    }
}

pub struct SettlementCoordinator {
    store: Arc<dyn DocumentStore>,
    wallet: Option<Arc<dyn Wallet>>,
    poll_state: watch::Receiver<PollState>,
    refresh: RefreshHandle,
    quotes_in_flight: Mutex<HashSet<String>>,
    tx_outstanding: AtomicBool,
    next_intent_id: AtomicU64,
    intent_tx: watch::Sender<Option<TransactionIntent>>,
    receipt_timeout: Duration,
}

/// Releases a per-RFQ quote slot on drop.
struct QuoteSlot<'a> {
    slots: &'a Mutex<HashSet<String>>,
    rfq_id: String,
}

impl Drop for QuoteSlot<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(&self.rfq_id);
    }
}

/// Releases the wallet slot on drop.
struct TxSlot<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TxSlot<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        wallet: Option<Arc<dyn Wallet>>,
        poll_state: watch::Receiver<PollState>,
        refresh: RefreshHandle,
        receipt_timeout: Duration,
    ) -> Self {
        let (intent_tx, _rx) = watch::channel(None);
        Self {
            store,
            wallet,
            poll_state,
            refresh,
            quotes_in_flight: Mutex::new(HashSet::new()),
            tx_outstanding: AtomicBool::new(false),
            next_intent_id: AtomicU64::new(1),
            intent_tx,
            receipt_timeout,
        }
    }

    pub fn subscribe_intents(&self) -> watch::Receiver<Option<TransactionIntent>> {
        self.intent_tx.subscribe()
    }

    pub fn current_intent(&self) -> Option<TransactionIntent> {
        self.intent_tx.borrow().clone()
    }

    pub fn has_outstanding_transaction(&self) -> bool {
        self.tx_outstanding.load(Ordering::SeqCst)
    }

    /// Drops a surfaced outcome. Outstanding intents are kept.
    pub fn dismiss_outcome(&self) {
        self.intent_tx.send_if_modified(|current| match current {
            Some(intent) if intent.state.is_terminal() => {
                *current = None;
                true
            }
            _ => false,
        });
    }

    pub async fn accept_quote(&self, confirmed: Confirmed<QuoteAction>) -> Result<(), SettlementError> {
        self.decide_quote(QuoteDecision::Accept, confirmed).await
    }

    pub async fn reject_quote(&self, confirmed: Confirmed<QuoteAction>) -> Result<(), SettlementError> {
        self.decide_quote(QuoteDecision::Reject, confirmed).await
    }

    fn claim_quote(&self, rfq_id: &str) -> Result<QuoteSlot<'_>, SettlementError> {
        let mut slots = self.quotes_in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !slots.insert(rfq_id.to_string()) {
            return Err(SettlementError::ActionConflict {
                subject: format!("RFQ {rfq_id}"),
            });
        }
        Ok(QuoteSlot {
            slots: &self.quotes_in_flight,
            rfq_id: rfq_id.to_string(),
        })
    }

    async fn decide_quote(
        &self,
        decision: QuoteDecision,
        confirmed: Confirmed<QuoteAction>,
    ) -> Result<(), SettlementError> {
        let confirmed_at = confirmed.confirmed_at();
        let QuoteAction { rfq_id, quote_id } = confirmed.into_inner();
        let _slot = self.claim_quote(&rfq_id)?;

        info!(
            rfq = %rfq_id,
            quote = %quote_id,
            %decision,
            confirmed_at = %confirmed_at.to_rfc3339(),
            "submitting quote decision"
        );
        let ack = self.store.quote_action(decision, &rfq_id, &quote_id).await?;
        if !ack.success {
            let reason = ack.error.unwrap_or_else(|| "upstream returned success=false".to_string());
            warn!(rfq = %rfq_id, %decision, %reason, "quote decision not applied");
            return Err(SettlementError::QuoteNotApplied { rfq_id, reason });
        }

        info!(rfq = %rfq_id, %decision, "quote decision applied");
        self.refresh.refresh_now();
        Ok(())
    }

    fn resolve_call(&self, action: &OnChainAction) -> Result<ContractCall, SettlementError> {
        let state = self.poll_state.borrow();
        let doc = state
            .snapshot
            .get(action.rfq_id())
            .ok_or_else(|| SettlementError::NotReady {
                rfq_id: action.rfq_id().to_string(),
                reason: "not in the current snapshot".to_string(),
            })?;
        action.build_call(doc)
    }

    fn publish(&self, intent: &TransactionIntent) {
        self.intent_tx.send_replace(Some(intent.clone()));
    }

    fn fail(&self, mut intent: TransactionIntent, err: SettlementError) -> SettlementError {
        intent.state = err.terminal_state();
        if err.is_cancellation() {
            info!(intent = intent.id, action = %intent.action, "transaction cancelled by user");
        } else {
            warn!(
                intent = intent.id,
                action = %intent.action,
                state = %intent.state,
                error = %err,
                "transaction did not complete"
            );
        }
        self.publish(&intent);
        err
    }

    /// Sends an on-chain action and follows it to a receipt.
    ///
    /// Every state change is published to `subscribe_intents()`. On failure
    /// the intent is left in `Rejected` or `Failed` until dismissed.
    pub async fn submit_on_chain_action(
        &self,
        confirmed: Confirmed<OnChainAction>,
    ) -> Result<TransactionIntent, SettlementError> {
        let wallet = self
            .wallet
            .clone()
            .ok_or_else(|| SettlementError::Wallet("no wallet configured".to_string()))?;

        if self
            .tx_outstanding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SettlementError::ActionConflict {
                subject: "wallet".to_string(),
            });
        }
        let _slot = TxSlot {
            flag: &self.tx_outstanding,
        };

        let confirmed_at = confirmed.confirmed_at();
        let action = confirmed.into_inner();
        let call = self.resolve_call(&action)?;
        let mut intent = TransactionIntent {
            id: self.next_intent_id.fetch_add(1, Ordering::SeqCst),
            action,
            call,
            state: TxState::Idle,
            tx_hash: None,
        };
        self.publish(&intent);

        intent.state = TxState::Submitted;
        self.publish(&intent);
        info!(
            intent = intent.id,
            action = %intent.action,
            to = %intent.call.address,
            confirmed_at = %confirmed_at.to_rfc3339(),
            "transaction submitted to wallet"
        );

        let tx_hash = match wallet.write_contract(&intent.call).await {
            Ok(hash) => hash,
            Err(e) => return Err(self.fail(intent, classify_wallet_error(e))),
        };

        intent.tx_hash = Some(tx_hash);
        intent.state = TxState::Confirming;
        self.publish(&intent);

        let receipt = tokio::time::timeout(self.receipt_timeout, wallet.wait_for_receipt(tx_hash)).await;
        match receipt {
            Ok(Ok(ReceiptStatus::Success)) => {
                intent.state = TxState::Confirmed;
                self.publish(&intent);
                info!(intent = intent.id, action = %intent.action, tx = %tx_hash, "transaction confirmed");
                self.refresh.refresh_now();
                Ok(intent)
            }
            Ok(Ok(ReceiptStatus::Reverted)) => Err(self.fail(intent, SettlementError::Reverted { tx_hash })),
            Ok(Err(e)) => Err(self.fail(intent, classify_wallet_error(e))),
            Err(_) => Err(self.fail(intent, SettlementError::ReceiptTimeout { tx_hash })),
        }
    }
}
