//! User intents and the transaction state they move through.

use crate::onchain::{abi, ContractCall};
use crate::rfq::{RfqDocument, STEP_EXIT_PROPOSAL};
use crate::settlement::SettlementError;
use alloy::primitives::{Address, TxHash, B256, U256};
use chrono::{DateTime, Utc};
use std::str::FromStr;

/// An action the user explicitly confirmed. Constructing one is the
/// confirmation; the coordinator does not ask again.
#[derive(Debug, Clone)]
pub struct Confirmed<T> {
    action: T,
    confirmed_at: DateTime<Utc>,
}

impl<T> Confirmed<T> {
    pub fn by_user(action: T) -> Self {
        Self {
            action,
            confirmed_at: Utc::now(),
        }
    }

    pub fn action(&self) -> &T {
        &self.action
    }

    pub fn confirmed_at(&self) -> DateTime<Utc> {
        self.confirmed_at
    }

    pub fn into_inner(self) -> T {
        self.action
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteAction {
    pub rfq_id: String,
    pub quote_id: String,
}

impl QuoteAction {
    pub fn new(rfq_id: impl Into<String>, quote_id: impl Into<String>) -> Self {
        Self {
            rfq_id: rfq_id.into(),
            quote_id: quote_id.into(),
        }
    }
}

/// On-chain settlement actions against an RFQ's escrow vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnChainAction {
    Deposit { rfq_id: String, amount: U256 },
    AcceptExit { rfq_id: String },
    CollectRewards { rfq_id: String },
}

impl OnChainAction {
    pub fn rfq_id(&self) -> &str {
        match self {
            OnChainAction::Deposit { rfq_id, .. }
            | OnChainAction::AcceptExit { rfq_id }
            | OnChainAction::CollectRewards { rfq_id } => rfq_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OnChainAction::Deposit { .. } => "deposit",
            OnChainAction::AcceptExit { .. } => "acceptExit",
            OnChainAction::CollectRewards { .. } => "collectRewards",
        }
    }

    /// Encodes the call against the document's escrow vault.
    pub fn build_call(&self, doc: &RfqDocument) -> Result<ContractCall, SettlementError> {
        let not_ready = |reason: &str| SettlementError::NotReady {
            rfq_id: doc.id.clone(),
            reason: reason.to_string(),
        };

        let vault = doc
            .vault_address()
            .ok_or_else(|| not_ready("no escrow vault yet"))?;
        let address = Address::from_str(vault)
            .map_err(|_| not_ready(&format!("invalid escrow vault address {vault}")))?;

        let call = match self {
            OnChainAction::Deposit { amount, .. } => ContractCall {
                address,
                function_name: "deposit",
                calldata: abi::deposit_calldata(),
                value: Some(*amount),
            },
            OnChainAction::AcceptExit { .. } => {
                let proposal_id = exit_proposal_id(doc).ok_or_else(|| not_ready("no exit proposal id"))?;
                ContractCall {
                    address,
                    function_name: "acceptExit",
                    calldata: abi::accept_exit_calldata(proposal_id),
                    value: None,
                }
            }
            OnChainAction::CollectRewards { .. } => ContractCall {
                address,
                function_name: "collectRewards",
                calldata: abi::collect_rewards_calldata(),
                value: None,
            },
        };
        Ok(call)
    }
}

impl std::fmt::Display for OnChainAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(rfq={})", self.name(), self.rfq_id())
    }
}

/// `proposal_id` of the exit proposal step: a 0x-prefixed 32-byte hex string.
pub fn exit_proposal_id(doc: &RfqDocument) -> Option<B256> {
    let raw = doc.step(STEP_EXIT_PROPOSAL)?.field_str("proposal_id")?;
    B256::from_str(raw.trim()).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    /// Handed to the wallet, waiting for signature and broadcast.
    Submitted,
    /// Broadcast; waiting for the receipt.
    Confirming,
    Confirmed,
    /// Declined by the user or refused at gas estimation.
    Rejected,
    Failed,
}

impl TxState {
    pub fn is_outstanding(&self) -> bool {
        matches!(self, TxState::Submitted | TxState::Confirming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Confirmed | TxState::Rejected | TxState::Failed)
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxState::Idle => write!(f, "IDLE"),
            TxState::Submitted => write!(f, "SUBMITTED"),
            TxState::Confirming => write!(f, "CONFIRMING"),
            TxState::Confirmed => write!(f, "CONFIRMED"),
            TxState::Rejected => write!(f, "REJECTED"),
            TxState::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub id: u64,
    pub action: OnChainAction,
    pub call: ContractCall,
    pub state: TxState,
    pub tx_hash: Option<TxHash>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfq::tests::{doc, step};
    use crate::rfq::{EscrowVault, RfqStatus};
    use serde_json::json;

    const VAULT: &str = "0x00000000000000000000000000000000000000aa";
    const PROPOSAL: &str = "0x5f1e7d3c9a0b2e4f6a8c1d3e5f7a9b0c2d4e6f8a1b3c5d7e9f0a2b4c6d8e0f12";

    fn with_vault() -> RfqDocument {
        let mut d = doc("r1", RfqStatus::Active);
        d.unique_escrow_vault = Some(EscrowVault {
            vault_address: VAULT.to_string(),
            extra: serde_json::Map::new(),
        });
        d
    }

    #[test]
    fn test_deposit_targets_vault_with_value() {
        let action = OnChainAction::Deposit {
            rfq_id: "r1".into(),
            amount: U256::from(1_000u64),
        };
        let call = action.build_call(&with_vault()).unwrap();
        assert_eq!(call.address, Address::from_str(VAULT).unwrap());
        assert_eq!(call.function_name, "deposit");
        assert_eq!(call.value, Some(U256::from(1_000u64)));
    }

    #[test]
    fn test_accept_exit_needs_proposal_id() {
        let action = OnChainAction::AcceptExit { rfq_id: "r1".into() };
        let mut d = with_vault();
        assert!(matches!(
            action.build_call(&d),
            Err(SettlementError::NotReady { .. })
        ));

        let mut exit = step("1");
        exit.fields.insert("proposal_id".into(), json!(PROPOSAL));
        d.settlement_steps.insert(STEP_EXIT_PROPOSAL.into(), exit);
        let proposal = B256::from_str(PROPOSAL).unwrap();
        assert_eq!(exit_proposal_id(&d), Some(proposal));
        let call = action.build_call(&d).unwrap();
        assert_eq!(call.function_name, "acceptExit");
        assert_eq!(call.calldata, abi::accept_exit_calldata(proposal));
        assert_eq!(call.value, None);
    }

    #[test]
    fn test_missing_vault_is_not_ready() {
        let action = OnChainAction::CollectRewards { rfq_id: "r1".into() };
        match action.build_call(&doc("r1", RfqStatus::Active)) {
            Err(SettlementError::NotReady { rfq_id, reason }) => {
                assert_eq!(rfq_id, "r1");
                assert!(reason.contains("vault"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_proposal_id_must_be_bytes32() {
        let action = OnChainAction::AcceptExit { rfq_id: "r1".into() };
        for bad in [json!(3), json!("0x2a"), json!("not hex")] {
            let mut d = with_vault();
            let mut exit = step("1");
            exit.fields.insert("proposal_id".into(), bad);
            d.settlement_steps.insert(STEP_EXIT_PROPOSAL.into(), exit);
            assert_eq!(exit_proposal_id(&d), None);
            assert!(matches!(
                action.build_call(&d),
                Err(SettlementError::NotReady { .. })
            ));
        }
    }

    #[test]
    fn test_state_classes() {
        assert!(TxState::Submitted.is_outstanding());
        assert!(TxState::Confirming.is_outstanding());
        assert!(!TxState::Idle.is_outstanding());
        assert!(TxState::Rejected.is_terminal());
        assert!(!TxState::Confirming.is_terminal());
    }
}
