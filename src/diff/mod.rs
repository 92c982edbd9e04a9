//! Snapshot differ.
//!
//! Compares the previous and the new snapshot and yields at most one
//! `ChangeEvent` per active document, chosen by strict priority:
//! new settlement steps, then a changed best quote, then anything else.
//! Documents that are not active in the new snapshot are ignored, so
//! resolved RFQs never produce alerts. Nothing is emitted on the first poll.

use crate::rfq::display::humanize_step_name;
use crate::rfq::{BestQuote, RfqDocument, RfqStatus, Snapshot};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    /// New or reactivated active document.
    StatusChanged { status: RfqStatus },
    /// Step names added since the last poll, sorted.
    NewSettlementStep { steps: Vec<String> },
    QuoteChanged {
        previous: Option<BestQuote>,
        current: Option<BestQuote>,
    },
    OtherUpdate,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::StatusChanged { .. } => "status_changed",
            ChangeKind::NewSettlementStep { .. } => "new_settlement_step",
            ChangeKind::QuoteChanged { .. } => "quote_changed",
            ChangeKind::OtherUpdate => "other_update",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub rfq_id: String,
    pub kind: ChangeKind,
}

fn quote_label(quote: &Option<BestQuote>) -> String {
    match quote {
        Some(q) => q.quote.to_string(),
        None => "none".to_string(),
    }
}

impl ChangeEvent {
    /// Text shown to the user.
    pub fn message(&self) -> String {
        match &self.kind {
            ChangeKind::StatusChanged { .. } => {
                format!("New active RFQ {}", self.rfq_id)
            }
            ChangeKind::NewSettlementStep { steps } => {
                let names: Vec<String> = steps.iter().map(|s| humanize_step_name(s)).collect();
                let noun = if steps.len() == 1 { "step" } else { "steps" };
                format!(
                    "New settlement {} for RFQ {}: {}",
                    noun,
                    self.rfq_id,
                    names.join(", ")
                )
            }
            ChangeKind::QuoteChanged { current: Some(q), .. } => {
                format!("New best quote for RFQ {}: {}", self.rfq_id, q.quote)
            }
            ChangeKind::QuoteChanged { current: None, .. } => {
                format!("Best quote withdrawn for RFQ {}", self.rfq_id)
            }
            ChangeKind::OtherUpdate => format!("RFQ {} was updated", self.rfq_id),
        }
    }

    /// Stable identity of this change: same document and same change
    /// content always yield the same key.
    pub fn identity(&self) -> String {
        let detail = match &self.kind {
            ChangeKind::StatusChanged { status } => status.to_string(),
            ChangeKind::NewSettlementStep { steps } => steps.join("+"),
            ChangeKind::QuoteChanged { previous, current } => {
                let id = current
                    .as_ref()
                    .and_then(|q| q.quote_id.clone())
                    .unwrap_or_default();
                format!("{}->{}#{}", quote_label(previous), quote_label(current), id)
            }
            ChangeKind::OtherUpdate => String::new(),
        };
        format!("{}:{}:{}", self.rfq_id, self.kind.as_str(), detail)
    }
}

impl std::fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind, self.rfq_id)
    }
}

fn classify(old: &RfqDocument, new: &RfqDocument) -> Option<ChangeKind> {
    let mut new_steps: Vec<String> = new
        .settlement_steps
        .keys()
        .filter(|k| !old.settlement_steps.contains_key(*k))
        .cloned()
        .collect();
    if !new_steps.is_empty() {
        new_steps.sort();
        return Some(ChangeKind::NewSettlementStep { steps: new_steps });
    }

    if old.best_quote != new.best_quote {
        return Some(ChangeKind::QuoteChanged {
            previous: old.best_quote.clone(),
            current: new.best_quote.clone(),
        });
    }

    if old != new {
        return Some(ChangeKind::OtherUpdate);
    }

    None
}

/// Changes between two consecutive snapshots, in new-snapshot order.
/// `previous` is `None` before the first successful poll.
pub fn diff(previous: Option<&Snapshot>, current: &Snapshot) -> Vec<ChangeEvent> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let old_active: HashMap<&str, &RfqDocument> = previous
        .active()
        .map(|d| (d.id.as_str(), d))
        .collect();

    current
        .active()
        .filter_map(|doc| {
            let kind = match old_active.get(doc.id.as_str()) {
                None => Some(ChangeKind::StatusChanged { status: doc.status }),
                Some(old) => classify(old, doc),
            }?;
            Some(ChangeEvent {
                rfq_id: doc.id.clone(),
                kind,
            })
        })
        .collect()
}
