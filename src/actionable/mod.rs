//! Documents waiting on a human decision.
//!
//! An RFQ is actionable while it is active and no quote has been accepted,
//! or while an exit proposal exists that the withdrawal recipient has not
//! yet settled.

use crate::rfq::{
    RfqDocument, Snapshot, STEP_ACCEPTED_QUOTE, STEP_EXIT_PROPOSAL,
    STEP_WITHDRAWAL_RECIPIENT_SETTLEMENT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    /// Accept or reject the best quote.
    QuoteDecision,
    /// Accept the open exit proposal.
    ExitProposal,
}

pub fn pending_action(doc: &RfqDocument) -> Option<PendingAction> {
    if doc.is_active() && !doc.has_step(STEP_ACCEPTED_QUOTE) {
        return Some(PendingAction::QuoteDecision);
    }
    if doc.has_step(STEP_EXIT_PROPOSAL) && !doc.has_step(STEP_WITHDRAWAL_RECIPIENT_SETTLEMENT) {
        return Some(PendingAction::ExitProposal);
    }
    None
}

pub fn is_actionable(doc: &RfqDocument) -> bool {
    pending_action(doc).is_some()
}

pub fn actionable(snapshot: &Snapshot) -> Vec<&RfqDocument> {
    snapshot.iter().filter(|d| is_actionable(d)).collect()
}

pub fn pending_count(snapshot: &Snapshot) -> usize {
    snapshot.iter().filter(|d| is_actionable(d)).count()
}
